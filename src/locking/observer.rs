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

//! Observer interfaces for lock lifecycle instrumentation.
//!
//! Observers decouple the interceptor and the stores from whoever needs to
//! react to contention or cleanup problems. Release failures in particular are
//! never returned over a successful operation result, so an observer is the
//! only place they surface besides the log.

use crate::error::LockError;
use crate::locking::kind::LockKey;
use crate::locking::state::InterceptorState;
use std::sync::Mutex;
use std::time::Duration;

/// Observer hooks for lock lifecycle events.
pub trait LockObserver: Send + Sync {
    fn on_transition(&self, _key: Option<&LockKey>, _from: InterceptorState, _to: InterceptorState) {
    }

    fn on_wait_start(&self, _key: &LockKey, _wait: Duration) {}

    fn on_retry(&self, _key: &LockKey, _attempt: usize, _elapsed: Duration, _remaining: Duration) {}

    fn on_acquired(&self, _key: &LockKey, _waited: Duration) {}

    fn on_timeout(&self, _key: &LockKey, _waited: Duration) {}

    fn on_cancelled(&self, _key: &LockKey, _waited: Duration) {}

    fn on_release_failed(&self, _key: &LockKey, _error: &LockError) {}
}

/// Observer implementation that performs no work.
#[derive(Debug, Default)]
pub struct NoopLockObserver;

impl LockObserver for NoopLockObserver {}

/// Collects release failures so callers can inspect them after the fact.
#[derive(Debug, Default)]
pub struct ReleaseFailureCollector {
    failures: Mutex<Vec<(LockKey, String)>>,
}

impl ReleaseFailureCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains the recorded failures.
    pub fn take(&self) -> Vec<(LockKey, String)> {
        match self.failures.lock() {
            Ok(mut failures) => std::mem::take(&mut *failures),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.failures
            .lock()
            .map(|failures| failures.is_empty())
            .unwrap_or(true)
    }
}

impl LockObserver for ReleaseFailureCollector {
    fn on_release_failed(&self, key: &LockKey, error: &LockError) {
        let entry = (key.clone(), error.to_string());
        match self.failures.lock() {
            Ok(mut failures) => failures.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

/// Fans events out to several observers in registration order.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<std::sync::Arc<dyn LockObserver>>,
}

impl CompositeObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: std::sync::Arc<dyn LockObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl LockObserver for CompositeObserver {
    fn on_transition(&self, key: Option<&LockKey>, from: InterceptorState, to: InterceptorState) {
        for observer in &self.observers {
            observer.on_transition(key, from, to);
        }
    }

    fn on_wait_start(&self, key: &LockKey, wait: Duration) {
        for observer in &self.observers {
            observer.on_wait_start(key, wait);
        }
    }

    fn on_retry(&self, key: &LockKey, attempt: usize, elapsed: Duration, remaining: Duration) {
        for observer in &self.observers {
            observer.on_retry(key, attempt, elapsed, remaining);
        }
    }

    fn on_acquired(&self, key: &LockKey, waited: Duration) {
        for observer in &self.observers {
            observer.on_acquired(key, waited);
        }
    }

    fn on_timeout(&self, key: &LockKey, waited: Duration) {
        for observer in &self.observers {
            observer.on_timeout(key, waited);
        }
    }

    fn on_cancelled(&self, key: &LockKey, waited: Duration) {
        for observer in &self.observers {
            observer.on_cancelled(key, waited);
        }
    }

    fn on_release_failed(&self, key: &LockKey, error: &LockError) {
        for observer in &self.observers {
            observer.on_release_failed(key, error);
        }
    }
}
