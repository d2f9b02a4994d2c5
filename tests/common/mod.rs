// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![allow(dead_code)]

use distlock::config::LockConfig;
use distlock::error::{LockError, Result};
use distlock::locking::{AcquireRequest, HolderId, LockInterceptor, LockRegistry, LockType};
use distlock::store::{LockStore, MemoryLockStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub fn memory_interceptor(config: LockConfig) -> (LockInterceptor, Arc<MemoryLockStore>) {
    let store = Arc::new(MemoryLockStore::new());
    let registry = Arc::new(LockRegistry::new(store.clone(), config));
    (LockInterceptor::new(registry), store)
}

/// Takes `key` (already namespaced) for `holder` directly in the store.
pub fn hold(store: &dyn LockStore, key: &str, holder: &str, kind: LockType, lease: Duration) {
    let mut request = AcquireRequest::new(
        key.into(),
        HolderId::new(holder),
        kind,
        Duration::ZERO,
        lease,
    );
    assert!(store.try_acquire(&mut request).unwrap(), "{key} is already held");
}

/// Memory store whose operations can be switched to fail like an unreachable server.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryLockStore,
    fail_acquire: AtomicBool,
    fail_release: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_acquire(&self, fail: bool) {
        self.fail_acquire.store(fail, Ordering::SeqCst);
    }

    pub fn fail_release(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryLockStore {
        &self.inner
    }

    fn unreachable(key: &str) -> LockError {
        LockError::Store {
            key: key.to_string(),
            details: "connection refused".to_string(),
        }
    }
}

impl LockStore for FlakyStore {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn supports(&self, kind: LockType) -> bool {
        self.inner.supports(kind)
    }

    fn try_acquire(&self, request: &mut AcquireRequest<'_>) -> Result<bool> {
        if self.fail_acquire.load(Ordering::SeqCst) {
            return Err(Self::unreachable(request.store_key()));
        }
        self.inner.try_acquire(request)
    }

    fn release(&self, key: &str, kind: LockType, holder: &HolderId) -> Result<bool> {
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(Self::unreachable(key));
        }
        self.inner.release(key, kind, holder)
    }

    fn is_held_by(&self, key: &str, kind: LockType, holder: &HolderId) -> Result<bool> {
        self.inner.is_held_by(key, kind, holder)
    }

    fn renew(&self, key: &str, kind: LockType, holder: &HolderId, lease: Duration) -> Result<bool> {
        self.inner.renew(key, kind, holder, lease)
    }
}
