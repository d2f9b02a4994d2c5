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

//! Bounded cache of lock handles keyed by resolved lock key.
//!
//! Handles are created at most once per key even under concurrent `obtain`
//! calls, because construction happens inside the map's per-shard entry lock.
//! When the cache grows past capacity the least recently used handle that
//! nobody is holding or using is dropped. Dropping a handle never changes
//! store state.

use crate::config::LockConfig;
use crate::locking::handle::LockHandle;
use crate::locking::kind::LockKey;
use crate::store::LockStore;
use dashmap::DashMap;
use log::{debug, trace};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub struct LockRegistry {
    store: Arc<dyn LockStore>,
    config: LockConfig,
    handles: DashMap<LockKey, Arc<LockHandle>>,
    clock: AtomicU64,
    eviction: Mutex<()>,
}

impl LockRegistry {
    pub fn new(store: Arc<dyn LockStore>, config: LockConfig) -> Self {
        Self {
            store,
            handles: DashMap::with_capacity(config.cache_capacity),
            config,
            clock: AtomicU64::new(0),
            eviction: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn LockStore> {
        &self.store
    }

    pub fn capacity(&self) -> usize {
        self.config.cache_capacity
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn contains(&self, key: &LockKey) -> bool {
        self.handles.contains_key(key)
    }

    /// Returns the cached handle for `key`, creating it on first use.
    pub fn obtain(&self, key: &LockKey) -> Arc<LockHandle> {
        let tick = self.clock.fetch_add(1, Ordering::AcqRel) + 1;

        if let Some(existing) = self.handles.get(key) {
            existing.touch(tick);
            return Arc::clone(existing.value());
        }

        let handle = {
            let entry = self.handles.entry(key.clone()).or_insert_with(|| {
                trace!("Creating lock handle for {key}");
                Arc::new(LockHandle::new(
                    key.clone(),
                    key.namespaced(&self.config.key_prefix),
                    Arc::clone(&self.store),
                ))
            });
            Arc::clone(entry.value())
        };
        handle.touch(tick);

        if self.handles.len() > self.capacity() {
            self.evict();
        }
        handle
    }

    fn evict(&self) {
        let _serialized = self.eviction.lock().unwrap_or_else(PoisonError::into_inner);

        let mut attempts = self.handles.len();
        while self.handles.len() > self.capacity() && attempts > 0 {
            attempts -= 1;
            let victim = self
                .handles
                .iter()
                .filter(|entry| is_evictable(entry.value()))
                .min_by_key(|entry| entry.value().last_used())
                .map(|entry| entry.key().clone());

            let Some(victim) = victim else {
                debug!(
                    "Lock registry over capacity ({} > {}) with every handle in use",
                    self.handles.len(),
                    self.capacity()
                );
                return;
            };

            if self
                .handles
                .remove_if(&victim, |_, handle| is_evictable(handle))
                .is_some()
            {
                trace!("Evicted lock handle for {victim}");
            }
        }
    }
}

/// Only the registry references the handle and no hold or wait goes through it.
fn is_evictable(handle: &Arc<LockHandle>) -> bool {
    Arc::strong_count(handle) == 1 && !handle.is_pinned()
}

impl fmt::Debug for LockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockRegistry")
            .field("store", &self.store.name())
            .field("len", &self.handles.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
