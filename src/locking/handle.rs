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

use crate::error::{LockError, Result};
use crate::locking::acquisition::AcquireRequest;
use crate::locking::interceptor::DEFAULT_FAILURE_MESSAGE;
use crate::locking::kind::{HolderId, LockKey, LockType};
use crate::store::LockStore;
use log::{debug, warn};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Local wrapper around one key's lock state in the store.
///
/// The store stays the source of truth. The handle only remembers which
/// holders acquired through it so the registry can tell whether evicting it
/// would drop a live hold.
pub struct LockHandle {
    key: LockKey,
    store_key: String,
    store: Arc<dyn LockStore>,
    acquiring: AtomicUsize,
    holds: Mutex<HashMap<(HolderId, LockType), u32>>,
    last_used: AtomicU64,
}

impl LockHandle {
    pub(crate) fn new(key: LockKey, store_key: String, store: Arc<dyn LockStore>) -> Self {
        Self {
            key,
            store_key,
            store,
            acquiring: AtomicUsize::new(0),
            holds: Mutex::new(HashMap::new()),
            last_used: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn store_key(&self) -> &str {
        &self.store_key
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    pub fn supports(&self, kind: LockType) -> bool {
        self.store.supports(kind)
    }

    /// Builds an acquisition request addressed at this handle's store key.
    pub fn request<'a>(
        &self,
        holder: HolderId,
        kind: LockType,
        wait: Duration,
        lease: Duration,
    ) -> AcquireRequest<'a> {
        AcquireRequest::new(self.key.clone(), holder, kind, wait, lease)
            .with_store_key(self.store_key.clone())
    }

    /// Runs `request` against the store, recording the hold on success.
    pub fn acquire(&self, request: &mut AcquireRequest<'_>) -> Result<bool> {
        self.acquiring.fetch_add(1, Ordering::AcqRel);
        let outcome = self.store.try_acquire(request);
        if let Ok(true) = outcome {
            *self
                .holds()
                .entry((request.holder().clone(), request.kind()))
                .or_insert(0) += 1;
        }
        self.acquiring.fetch_sub(1, Ordering::AcqRel);
        outcome
    }

    pub fn try_acquire(
        &self,
        holder: &HolderId,
        kind: LockType,
        wait: Duration,
        lease: Duration,
    ) -> Result<bool> {
        let mut request = self.request(holder.clone(), kind, wait, lease);
        self.acquire(&mut request)
    }

    /// Acquires and wraps the hold in a guard that releases on drop.
    pub fn lock(
        self: &Arc<Self>,
        holder: HolderId,
        kind: LockType,
        wait: Duration,
        lease: Duration,
    ) -> Result<HeldLock> {
        let mut request = self.request(holder.clone(), kind, wait, lease);
        if self.acquire(&mut request)? {
            Ok(HeldLock {
                handle: Arc::clone(self),
                holder,
                kind,
                acquired_at: Instant::now(),
                released: false,
            })
        } else {
            Err(LockError::AcquisitionFailed {
                key: self.key.to_string(),
                message: DEFAULT_FAILURE_MESSAGE.to_string(),
                waited_secs: request.elapsed().as_secs_f64(),
            })
        }
    }

    /// Releases one hold of `holder`. Never touches another holder's lock.
    pub fn release(&self, holder: &HolderId, kind: LockType) -> Result<bool> {
        self.forget(holder, kind);
        self.store
            .release(&self.store_key, kind, holder)
            .map_err(|err| self.release_error(err))
    }

    pub fn is_held_by(&self, holder: &HolderId, kind: LockType) -> Result<bool> {
        self.store.is_held_by(&self.store_key, kind, holder)
    }

    pub fn renew(&self, holder: &HolderId, kind: LockType, lease: Duration) -> Result<bool> {
        self.store.renew(&self.store_key, kind, holder, lease)
    }

    /// True while an acquisition is in flight or a hold taken through this
    /// handle has not been released.
    pub fn is_pinned(&self) -> bool {
        self.acquiring.load(Ordering::Acquire) > 0 || !self.holds().is_empty()
    }

    /// Drops the local record of a hold that the store no longer has.
    pub(crate) fn forget(&self, holder: &HolderId, kind: LockType) {
        let mut holds = self.holds();
        let slot = (holder.clone(), kind);
        if let Some(count) = holds.get_mut(&slot) {
            *count -= 1;
            if *count == 0 {
                holds.remove(&slot);
            }
        }
    }

    pub(crate) fn touch(&self, tick: u64) {
        self.last_used.fetch_max(tick, Ordering::AcqRel);
    }

    pub(crate) fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Acquire)
    }

    fn holds(&self) -> MutexGuard<'_, HashMap<(HolderId, LockType), u32>> {
        self.holds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_error(&self, err: LockError) -> LockError {
        match err {
            LockError::Store { details, .. } => LockError::Release {
                key: self.key.to_string(),
                details,
            },
            other => LockError::Release {
                key: self.key.to_string(),
                details: other.to_string(),
            },
        }
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.key)
            .field("store_key", &self.store_key)
            .field("store", &self.store.name())
            .field("pinned", &self.is_pinned())
            .finish()
    }
}

/// A hold taken through [`LockHandle::lock`], released when dropped.
#[derive(Debug)]
pub struct HeldLock {
    handle: Arc<LockHandle>,
    holder: HolderId,
    kind: LockType,
    acquired_at: Instant,
    released: bool,
}

impl HeldLock {
    pub fn key(&self) -> &LockKey {
        self.handle.key()
    }

    pub fn holder(&self) -> &HolderId {
        &self.holder
    }

    pub fn kind(&self) -> LockType {
        self.kind
    }

    pub fn is_held(&self) -> Result<bool> {
        self.handle.is_held_by(&self.holder, self.kind)
    }

    pub fn release(mut self) -> Result<bool> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<bool> {
        if self.released {
            return Ok(false);
        }
        self.released = true;
        let released = self.handle.release(&self.holder, self.kind)?;
        debug!(
            "Released {} lock {} after {:.3}s",
            self.kind,
            self.handle.key(),
            self.acquired_at.elapsed().as_secs_f64()
        );
        Ok(released)
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        if let Err(err) = self.release_inner() {
            warn!("Failed to release lock {} during drop: {err}", self.handle.key());
        }
    }
}
