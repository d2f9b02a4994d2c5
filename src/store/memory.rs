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

//! In-process coordination store.
//!
//! Mirrors the semantics of a remote lease store: leases expire lazily on
//! access, releases are conditioned on holder identity, fair requests queue
//! behind a FIFO of tickets, and readers yield to waiting writers.

use crate::error::{LockError, Result};
use crate::locking::acquisition::AcquireRequest;
use crate::locking::cancellation::CANCELLATION_POLL;
use crate::locking::kind::{HolderId, LockType};
use crate::store::LockStore;
use log::{debug, trace};
use std::cmp;
use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Lease {
    holder: HolderId,
    kind: LockType,
    count: u32,
    expires_at: Instant,
}

impl Lease {
    fn new(holder: HolderId, kind: LockType, lease: Duration) -> Self {
        Self {
            holder,
            kind,
            count: 1,
            expires_at: Instant::now() + lease,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }

    fn reenter(&mut self, lease: Duration) {
        self.count = self.count.saturating_add(1);
        self.expires_at = cmp::max(self.expires_at, Instant::now() + lease);
    }
}

#[derive(Debug, Default)]
struct KeyState {
    exclusive: Option<Lease>,
    readers: HashMap<HolderId, Lease>,
    fair_queue: VecDeque<u64>,
    waiting_writers: usize,
}

impl KeyState {
    fn purge_expired(&mut self, key: &str, now: Instant) {
        if let Some(lease) = &self.exclusive
            && !lease.is_live(now)
        {
            debug!(
                "Lease on {key} held by {} ({}) expired without release",
                lease.holder, lease.kind
            );
            self.exclusive = None;
        }
        self.readers.retain(|_, lease| lease.is_live(now));
    }

    fn is_idle(&self) -> bool {
        self.exclusive.is_none()
            && self.readers.is_empty()
            && self.fair_queue.is_empty()
            && self.waiting_writers == 0
    }

    fn owns_exclusive(&self, holder: &HolderId) -> bool {
        self.exclusive
            .as_ref()
            .is_some_and(|lease| &lease.holder == holder)
    }

    fn exclusive_is_free(&self) -> bool {
        self.exclusive.is_none() && self.readers.is_empty()
    }
}

#[derive(Debug, Default)]
struct StoreState {
    keys: HashMap<String, KeyState>,
    next_ticket: u64,
}

/// Lease store kept in process memory. Useful as the single arbiter for all
/// threads of one process and as a reference for remote store adapters.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    state: Mutex<StoreState>,
    changed: Condvar,
}

enum Step {
    Granted,
    Wait,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any live hold exists on `key`.
    pub fn is_locked(&self, key: &str) -> Result<bool> {
        let mut state = self.lock_state(key)?;
        let locked = match state.keys.get_mut(key) {
            Some(entry) => {
                entry.purge_expired(key, Instant::now());
                !entry.exclusive_is_free()
            }
            None => false,
        };
        Self::prune(&mut state, key);
        Ok(locked)
    }

    /// Drops every key whose leases have all expired and nobody waits on.
    /// Returns how many keys were dropped.
    pub fn purge_expired(&self) -> Result<usize> {
        let mut state = self.lock_state("*")?;
        let now = Instant::now();
        let before = state.keys.len();
        state.keys.retain(|key, entry| {
            entry.purge_expired(key, now);
            !entry.is_idle()
        });
        let dropped = before - state.keys.len();
        if dropped > 0 {
            debug!("Dropped {dropped} idle key(s) from memory store");
        }
        Ok(dropped)
    }

    /// Removes `key`'s entry once nothing holds or waits on it.
    fn prune(state: &mut StoreState, key: &str) {
        if state.keys.get(key).is_some_and(KeyState::is_idle) {
            state.keys.remove(key);
        }
    }

    fn lock_state(&self, key: &str) -> Result<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| LockError::store(key, "memory store state poisoned"))
    }

    fn attempt(
        state: &mut StoreState,
        request: &AcquireRequest<'_>,
        ticket: &mut Option<u64>,
    ) -> Step {
        let key = request.store_key();
        let holder = request.holder();
        let kind = request.kind();
        let now = Instant::now();
        let next_ticket = &mut state.next_ticket;
        let entry = state.keys.entry(key.to_string()).or_default();
        entry.purge_expired(key, now);

        if kind.is_shared() {
            if let Some(lease) = entry.readers.get_mut(holder) {
                lease.reenter(request.lease());
                return Step::Granted;
            }
            let blocked_by_writer = match &entry.exclusive {
                Some(lease) => &lease.holder != holder,
                None => entry.waiting_writers > 0,
            };
            if blocked_by_writer {
                return Step::Wait;
            }
            entry
                .readers
                .insert(holder.clone(), Lease::new(holder.clone(), kind, request.lease()));
            return Step::Granted;
        }

        if entry.owns_exclusive(holder) {
            if let Some(lease) = entry.exclusive.as_mut() {
                lease.reenter(request.lease());
            }
            if let Some(own) = ticket.take() {
                entry.fair_queue.retain(|queued| *queued != own);
            }
            return Step::Granted;
        }

        if kind == LockType::Fair {
            let own = *ticket.get_or_insert_with(|| {
                let issued = *next_ticket;
                *next_ticket = next_ticket.wrapping_add(1);
                entry.fair_queue.push_back(issued);
                issued
            });
            if entry.fair_queue.front() != Some(&own) || !entry.exclusive_is_free() {
                return Step::Wait;
            }
            entry.fair_queue.pop_front();
            *ticket = None;
        } else if !entry.exclusive_is_free() {
            return Step::Wait;
        }

        entry.exclusive = Some(Lease::new(holder.clone(), kind, request.lease()));
        Step::Granted
    }

    fn abandon(state: &mut StoreState, key: &str, ticket: Option<u64>) {
        if let Some(entry) = state.keys.get_mut(key)
            && let Some(own) = ticket
        {
            entry.fair_queue.retain(|queued| *queued != own);
        }
        Self::prune(state, key);
    }
}

impl LockStore for MemoryLockStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn supports(&self, _kind: LockType) -> bool {
        true
    }

    fn try_acquire(&self, request: &mut AcquireRequest<'_>) -> Result<bool> {
        let key = request.store_key().to_string();
        let exclusive = request.kind().is_exclusive();
        let mut state = self.lock_state(&key)?;
        let mut ticket: Option<u64> = None;
        let mut registered_writer = false;

        loop {
            if request.cancellation().is_cancelled() {
                Self::unregister_writer(&mut state, &key, registered_writer);
                Self::abandon(&mut state, &key, ticket);
                self.changed.notify_all();
                return Err(request.interrupted());
            }

            if let Step::Granted = Self::attempt(&mut state, request, &mut ticket) {
                Self::unregister_writer(&mut state, &key, registered_writer);
                trace!(
                    "Granted {} lock on {key} to {} after {} retries",
                    request.kind(),
                    request.holder(),
                    request.retries()
                );
                request.notify_acquired();
                return Ok(true);
            }

            if request.is_non_blocking() || request.budget().is_expired() {
                Self::unregister_writer(&mut state, &key, registered_writer);
                Self::abandon(&mut state, &key, ticket);
                self.changed.notify_all();
                request.notify_timeout();
                return Ok(false);
            }

            if exclusive && !registered_writer {
                if let Some(entry) = state.keys.get_mut(&key) {
                    entry.waiting_writers += 1;
                    registered_writer = true;
                }
            }

            request.record_wait_start();
            let slice = cmp::min(request.remaining(), CANCELLATION_POLL.saturating_mul(5));
            state = self
                .changed
                .wait_timeout(state, slice)
                .map_err(|_| LockError::store(&key, "memory store state poisoned"))?
                .0;
            request.record_retry();
        }
    }

    fn release(&self, key: &str, kind: LockType, holder: &HolderId) -> Result<bool> {
        let mut state = self.lock_state(key)?;
        let now = Instant::now();
        let Some(entry) = state.keys.get_mut(key) else {
            return Ok(false);
        };
        entry.purge_expired(key, now);

        let released = if kind.is_shared() {
            match entry.readers.get_mut(holder) {
                Some(lease) if lease.count > 1 => {
                    lease.count -= 1;
                    true
                }
                Some(_) => {
                    entry.readers.remove(holder);
                    true
                }
                None => false,
            }
        } else {
            match entry.exclusive.as_mut() {
                Some(lease) if &lease.holder == holder => {
                    if lease.count > 1 {
                        lease.count -= 1;
                    } else {
                        entry.exclusive = None;
                    }
                    true
                }
                _ => false,
            }
        };

        Self::prune(&mut state, key);
        drop(state);
        if released {
            self.changed.notify_all();
        }
        Ok(released)
    }

    fn is_held_by(&self, key: &str, kind: LockType, holder: &HolderId) -> Result<bool> {
        let mut state = self.lock_state(key)?;
        let held = match state.keys.get_mut(key) {
            Some(entry) => {
                entry.purge_expired(key, Instant::now());
                if kind.is_shared() {
                    entry.readers.contains_key(holder)
                } else {
                    entry.owns_exclusive(holder)
                }
            }
            None => false,
        };
        Self::prune(&mut state, key);
        Ok(held)
    }

    fn renew(
        &self,
        key: &str,
        kind: LockType,
        holder: &HolderId,
        lease: Duration,
    ) -> Result<bool> {
        let mut state = self.lock_state(key)?;
        let now = Instant::now();
        let Some(entry) = state.keys.get_mut(key) else {
            return Ok(false);
        };
        entry.purge_expired(key, now);
        let target = if kind.is_shared() {
            entry.readers.get_mut(holder)
        } else {
            entry
                .exclusive
                .as_mut()
                .filter(|current| &current.holder == holder)
        };
        let renewed = match target {
            Some(current) => {
                current.expires_at = now + lease;
                true
            }
            None => false,
        };
        Self::prune(&mut state, key);
        Ok(renewed)
    }
}

impl MemoryLockStore {
    fn unregister_writer(state: &mut StoreState, key: &str, registered: bool) {
        if !registered {
            return;
        }
        if let Some(entry) = state.keys.get_mut(key) {
            entry.waiting_writers = entry.waiting_writers.saturating_sub(1);
        }
    }
}
