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

use crate::error::LockError;
use crate::locking::cancellation::CancellationToken;
use crate::locking::kind::{HolderId, LockKey, LockType};
use crate::locking::observer::LockObserver;
use std::cmp;
use std::time::{Duration, Instant};

/// Exponential backoff configuration used while polling for locks.
#[derive(Debug, Clone)]
pub struct PollingBackoff {
    initial: Duration,
    factor: u32,
    cap: Duration,
    current: Duration,
}

impl PollingBackoff {
    pub fn new(initial: Duration, factor: u32, cap: Duration) -> Self {
        Self {
            initial,
            factor: cmp::max(factor, 1),
            cap,
            current: initial,
        }
    }

    /// Returns the current delay and advances the backoff sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = self.current.saturating_mul(self.factor);
        self.current = cmp::min(next, self.cap);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    pub fn peek(&self) -> Duration {
        self.current
    }
}

impl Default for PollingBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(10), 2, Duration::from_millis(200))
    }
}

/// Tracks elapsed and remaining time for the wait budget of one attempt.
#[derive(Debug, Clone)]
pub struct WaitBudget {
    limit: Duration,
    started_at: Instant,
}

impl WaitBudget {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            started_at: Instant::now(),
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn deadline(&self) -> Instant {
        self.started_at + self.limit
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.limit
    }
}

/// Everything a store needs to run a single acquisition attempt.
pub struct AcquireRequest<'a> {
    key: LockKey,
    store_key: String,
    holder: HolderId,
    kind: LockType,
    lease: Duration,
    budget: WaitBudget,
    cancellation: CancellationToken,
    backoff: PollingBackoff,
    observer: Option<&'a dyn LockObserver>,
    retries: usize,
    wait_started: bool,
}

impl<'a> AcquireRequest<'a> {
    pub fn new(key: LockKey, holder: HolderId, kind: LockType, wait: Duration, lease: Duration) -> Self {
        let store_key = key.as_str().to_string();
        Self {
            key,
            store_key,
            holder,
            kind,
            lease,
            budget: WaitBudget::new(wait),
            cancellation: CancellationToken::new(),
            backoff: PollingBackoff::default(),
            observer: None,
            retries: 0,
            wait_started: false,
        }
    }

    pub fn with_store_key<S: Into<String>>(mut self, store_key: S) -> Self {
        self.store_key = store_key.into();
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_backoff(mut self, backoff: PollingBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_observer(mut self, observer: Option<&'a dyn LockObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Key as stored remotely, including the registry namespace.
    pub fn store_key(&self) -> &str {
        &self.store_key
    }

    pub fn holder(&self) -> &HolderId {
        &self.holder
    }

    pub fn kind(&self) -> LockType {
        self.kind
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    pub fn budget(&self) -> &WaitBudget {
        &self.budget
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn backoff_mut(&mut self) -> &mut PollingBackoff {
        &mut self.backoff
    }

    /// A zero wait budget means a single attempt without waiting.
    pub fn is_non_blocking(&self) -> bool {
        self.budget.limit().is_zero()
    }

    pub fn elapsed(&self) -> Duration {
        self.budget.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.budget.remaining()
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    /// Next polling delay, clipped to the remaining budget. `None` once the
    /// budget is spent.
    pub fn next_sleep_interval(&mut self) -> Option<Duration> {
        let remaining = self.remaining();
        let delay = cmp::min(self.backoff.next_delay(), remaining);
        if delay.is_zero() { None } else { Some(delay) }
    }

    pub fn record_wait_start(&mut self) {
        if !self.wait_started {
            if let Some(observer) = self.observer {
                observer.on_wait_start(&self.key, self.budget.limit());
            }
            self.wait_started = true;
        }
    }

    pub fn record_retry(&mut self) {
        self.retries = self.retries.saturating_add(1);
        if let Some(observer) = self.observer {
            observer.on_retry(&self.key, self.retries, self.elapsed(), self.remaining());
        }
    }

    pub fn notify_acquired(&self) {
        if let Some(observer) = self.observer {
            observer.on_acquired(&self.key, self.elapsed());
        }
    }

    pub fn notify_timeout(&self) {
        if let Some(observer) = self.observer {
            observer.on_timeout(&self.key, self.elapsed());
        }
    }

    pub fn notify_cancelled(&self) {
        if let Some(observer) = self.observer {
            observer.on_cancelled(&self.key, self.elapsed());
        }
    }

    /// Records the cancellation and builds the error a store returns for it.
    pub fn interrupted(&self) -> LockError {
        self.notify_cancelled();
        LockError::Interrupted {
            key: self.key.to_string(),
            waited_secs: self.elapsed().as_secs_f64(),
        }
    }
}
