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

//! Declarative locking around a caller-supplied operation.
//!
//! [`LockInterceptor::execute`] drives one invocation through
//! `IDLE -> KEY_RESOLVED -> ACQUIRING -> HELD -> RELEASING -> RELEASED`, or
//! ends in `ACQUIRE_FAILED` / `INTERRUPTED` without running the operation.
//! Once `HELD` is reached the release runs from a drop guard, so it happens
//! exactly once whether the operation returns or panics. Release problems go
//! to the observer and the log; they never replace the operation's result.

use crate::config::WatchdogConfig;
use crate::error::{LockError, Result};
use crate::expression::{EvaluationContext, KeyTemplate};
use crate::locking::cancellation::CancellationToken;
use crate::locking::handle::LockHandle;
use crate::locking::kind::{HolderId, LockKey, LockType};
use crate::locking::observer::{LockObserver, NoopLockObserver};
use crate::locking::registry::LockRegistry;
use crate::locking::state::InterceptorState;
use crate::locking::watchdog::LeaseWatchdog;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_FAILURE_MESSAGE: &str = "Failed to acquire lock";

/// Locking configuration attached to one protected operation.
#[derive(Debug, Clone)]
pub struct DistributedLock {
    template: KeyTemplate,
    wait: Option<Duration>,
    lease: Option<Duration>,
    lock_type: LockType,
    failure_message: String,
}

impl DistributedLock {
    pub fn builder<S: Into<String>>(template: S) -> DistributedLockBuilder {
        DistributedLockBuilder {
            template: template.into(),
            wait: None,
            lease: None,
            lock_type: LockType::default(),
            failure_message: DEFAULT_FAILURE_MESSAGE.to_string(),
        }
    }

    pub fn template(&self) -> &KeyTemplate {
        &self.template
    }

    pub fn wait(&self) -> Option<Duration> {
        self.wait
    }

    pub fn lease(&self) -> Option<Duration> {
        self.lease
    }

    pub fn lock_type(&self) -> LockType {
        self.lock_type
    }

    pub fn failure_message(&self) -> &str {
        &self.failure_message
    }
}

#[derive(Debug, Clone)]
pub struct DistributedLockBuilder {
    template: String,
    wait: Option<Duration>,
    lease: Option<Duration>,
    lock_type: LockType,
    failure_message: String,
}

impl DistributedLockBuilder {
    /// How long to wait for the lock. Zero means a single attempt.
    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    pub fn lease(mut self, lease: Duration) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn lock_type(mut self, lock_type: LockType) -> Self {
        self.lock_type = lock_type;
        self
    }

    pub fn failure_message<S: Into<String>>(mut self, message: S) -> Self {
        self.failure_message = message.into();
        self
    }

    /// Parses the key template; a malformed template fails here.
    pub fn build(self) -> Result<DistributedLock> {
        if self.lease.is_some_and(|lease| lease.is_zero()) {
            return Err(LockError::InvalidConfig(format!(
                "lease for '{}' must be greater than zero",
                self.template
            )));
        }
        Ok(DistributedLock {
            template: KeyTemplate::parse(&self.template)?,
            wait: self.wait,
            lease: self.lease,
            lock_type: self.lock_type,
            failure_message: self.failure_message,
        })
    }
}

/// Wraps operations in acquire / run / release against a shared registry.
pub struct LockInterceptor {
    registry: Arc<LockRegistry>,
    observer: Arc<dyn LockObserver>,
    watchdog: WatchdogConfig,
}

impl LockInterceptor {
    pub fn new(registry: Arc<LockRegistry>) -> Self {
        let watchdog = registry.config().watchdog.clone();
        Self {
            registry,
            observer: Arc::new(NoopLockObserver),
            watchdog,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn LockObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_watchdog(mut self, watchdog: WatchdogConfig) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub fn registry(&self) -> &Arc<LockRegistry> {
        &self.registry
    }

    /// Runs `operation` under the lock with a fresh holder identity.
    pub fn execute<T, F>(
        &self,
        lock: &DistributedLock,
        context: &EvaluationContext,
        cancellation: &CancellationToken,
        operation: F,
    ) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        self.execute_as(HolderId::generate(), lock, context, cancellation, operation)
    }

    /// Like [`execute`](Self::execute) but under an explicit holder, so
    /// nested calls sharing the holder re-enter instead of deadlocking.
    pub fn execute_as<T, F>(
        &self,
        holder: HolderId,
        lock: &DistributedLock,
        context: &EvaluationContext,
        cancellation: &CancellationToken,
        operation: F,
    ) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        let mut run = Run::new(self.observer.as_ref());

        let key = lock.template().render(context)?;
        let kind = lock.lock_type();
        let store = self.registry.store();
        if !store.supports(kind) {
            return Err(LockError::UnsupportedLockType {
                store: store.name().to_string(),
                kind,
            });
        }
        run.advance(Some(&key), InterceptorState::KeyResolved);

        if cancellation.is_cancelled() {
            run.advance(Some(&key), InterceptorState::Interrupted);
            return Err(LockError::Interrupted {
                key: key.to_string(),
                waited_secs: 0.0,
            });
        }

        let handle = self.registry.obtain(&key);

        let config = self.registry.config();
        let wait = lock.wait().unwrap_or_else(|| config.default_wait());
        let lease = self.effective_lease(lock, &key);

        run.advance(Some(&key), InterceptorState::Acquiring);
        let mut request = handle
            .request(holder.clone(), kind, wait, lease)
            .with_cancellation(cancellation.clone())
            .with_backoff(config.polling_backoff())
            .with_observer(Some(self.observer.as_ref()));

        match handle.acquire(&mut request) {
            Ok(true) => {}
            Ok(false) => {
                run.advance(Some(&key), InterceptorState::AcquireFailed);
                let waited = request.elapsed();
                warn!(
                    "{} (lock key: {key}, waited {:.3}s)",
                    lock.failure_message(),
                    waited.as_secs_f64()
                );
                return Err(LockError::AcquisitionFailed {
                    key: key.to_string(),
                    message: lock.failure_message().to_string(),
                    waited_secs: waited.as_secs_f64(),
                });
            }
            Err(err @ LockError::Interrupted { .. }) => {
                run.advance(Some(&key), InterceptorState::Interrupted);
                info!("Wait for lock {key} was cancelled");
                return Err(err);
            }
            Err(err) => {
                run.advance(Some(&key), InterceptorState::AcquireFailed);
                warn!("Lock store {} failed while acquiring {key}: {err}", handle.store_name());
                return Err(err);
            }
        }
        drop(request);

        run.advance(Some(&key), InterceptorState::Held);
        debug!("Holding {kind} lock {key} as {holder}");

        let watchdog = self.watchdog.enabled.then(|| {
            LeaseWatchdog::spawn(
                Arc::clone(&handle),
                holder.clone(),
                kind,
                lease,
                self.watchdog.interval_for(lease),
            )
        });

        let _release = ReleaseGuard {
            run,
            handle,
            key,
            holder,
            kind,
            watchdog,
            held_since: Instant::now(),
        };
        Ok(operation())
    }

    fn effective_lease(&self, lock: &DistributedLock, key: &LockKey) -> Duration {
        let config = self.registry.config();
        let requested = lock.lease().unwrap_or_else(|| config.default_lease());
        let ceiling = config.expire_after();
        if requested > ceiling {
            debug!("Clamping lease for {key} from {requested:?} to {ceiling:?}");
            ceiling
        } else {
            requested
        }
    }
}

/// Tracks the current state of one invocation and reports transitions.
struct Run<'a> {
    state: InterceptorState,
    observer: &'a dyn LockObserver,
}

impl<'a> Run<'a> {
    fn new(observer: &'a dyn LockObserver) -> Self {
        Self {
            state: InterceptorState::Idle,
            observer,
        }
    }

    fn advance(&mut self, key: Option<&LockKey>, next: InterceptorState) {
        let from = self.state;
        if !from.can_transition_to(next) {
            warn!("Ignoring illegal lock state transition {from} -> {next}");
            return;
        }
        match key {
            Some(key) => debug!("Lock {key}: {from} -> {next}"),
            None => debug!("Lock: {from} -> {next}"),
        }
        self.state = next;
        self.observer.on_transition(key, from, next);
    }
}

/// Releases the hold when the operation finishes, including by panic.
struct ReleaseGuard<'a> {
    run: Run<'a>,
    handle: Arc<LockHandle>,
    key: LockKey,
    holder: HolderId,
    kind: LockType,
    watchdog: Option<LeaseWatchdog>,
    held_since: Instant,
}

impl ReleaseGuard<'_> {
    fn report(&self, err: LockError) {
        warn!(
            "Lock {} may outlive its critical section until the lease expires: {err}",
            self.key
        );
        self.run.observer.on_release_failed(&self.key, &err);
    }

    fn as_release_error(&self, err: LockError) -> LockError {
        match err {
            LockError::Release { .. } => err,
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

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.stop();
        }

        let key = self.key.clone();
        self.run.advance(Some(&key), InterceptorState::Releasing);

        match self.handle.is_held_by(&self.holder, self.kind) {
            Ok(true) => match self.handle.release(&self.holder, self.kind) {
                Ok(true) => debug!(
                    "Released {} lock {key} after {:.3}s",
                    self.kind,
                    self.held_since.elapsed().as_secs_f64()
                ),
                Ok(false) => warn!("Lock {key} was no longer held by {} at release", self.holder),
                Err(err) => self.report(err),
            },
            Ok(false) => {
                self.handle.forget(&self.holder, self.kind);
                warn!(
                    "Lease on {key} expired after {:.3}s, before the operation finished",
                    self.held_since.elapsed().as_secs_f64()
                );
            }
            Err(err) => {
                self.handle.forget(&self.holder, self.kind);
                let err = self.as_release_error(err);
                self.report(err);
            }
        }

        self.run.advance(Some(&key), InterceptorState::Released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockConfig;
    use crate::locking::observer::ReleaseFailureCollector;
    use crate::store::{LockStore, MemoryLockStore};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TransitionLog {
        states: Mutex<Vec<InterceptorState>>,
    }

    impl LockObserver for TransitionLog {
        fn on_transition(&self, _key: Option<&LockKey>, _from: InterceptorState, to: InterceptorState) {
            self.states.lock().unwrap().push(to);
        }
    }

    fn interceptor(config: LockConfig) -> (LockInterceptor, Arc<MemoryLockStore>) {
        let store = Arc::new(MemoryLockStore::new());
        let registry = Arc::new(LockRegistry::new(store.clone(), config));
        (LockInterceptor::new(registry), store)
    }

    fn order_lock() -> DistributedLock {
        DistributedLock::builder("'order:' + #userId")
            .wait(Duration::from_millis(50))
            .lease(Duration::from_secs(5))
            .failure_message("order is being processed")
            .build()
            .unwrap()
    }

    #[test]
    fn successful_run_walks_every_state() {
        let (interceptor, store) = interceptor(LockConfig::default());
        let log = Arc::new(TransitionLog::default());
        let interceptor = interceptor.with_observer(log.clone());
        let context = EvaluationContext::new().with_value("userId", "u1");

        let value = interceptor
            .execute(&order_lock(), &context, &CancellationToken::new(), || {
                store.is_locked("locks:order:u1").unwrap()
            })
            .unwrap();

        assert!(value);
        assert!(!store.is_locked("locks:order:u1").unwrap());
        assert_eq!(
            log.states.lock().unwrap().as_slice(),
            [
                InterceptorState::KeyResolved,
                InterceptorState::Acquiring,
                InterceptorState::Held,
                InterceptorState::Releasing,
                InterceptorState::Released,
            ]
        );
    }

    #[test]
    fn contention_fails_without_running_operation() {
        let (interceptor, store) = interceptor(LockConfig::default());
        let mut request = crate::locking::acquisition::AcquireRequest::new(
            LockKey::from("order:u1"),
            HolderId::new("other"),
            LockType::Reentrant,
            Duration::ZERO,
            Duration::from_secs(5),
        )
        .with_store_key("locks:order:u1");
        assert!(store.try_acquire(&mut request).unwrap());

        let context = EvaluationContext::new().with_value("userId", "u1");
        let mut ran = false;
        let err = interceptor
            .execute(&order_lock(), &context, &CancellationToken::new(), || ran = true)
            .unwrap_err();

        assert!(!ran);
        match err {
            LockError::AcquisitionFailed { key, message, .. } => {
                assert_eq!(key, "order:u1");
                assert_eq!(message, "order is being processed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn evaluation_failure_attempts_no_lock() {
        let (interceptor, _store) = interceptor(LockConfig::default());
        let log = Arc::new(TransitionLog::default());
        let interceptor = interceptor.with_observer(log.clone());

        let err = interceptor
            .execute::<(), _>(
                &order_lock(),
                &EvaluationContext::new(),
                &CancellationToken::new(),
                || unreachable!(),
            )
            .unwrap_err();

        assert!(matches!(err, LockError::Evaluation { .. }));
        assert!(log.states.lock().unwrap().is_empty());
        assert!(interceptor.registry().is_empty());
    }

    #[test]
    fn cancelled_token_interrupts_before_acquiring() {
        let (interceptor, _store) = interceptor(LockConfig::default());
        let token = CancellationToken::new();
        token.cancel();
        let context = EvaluationContext::new().with_value("userId", "u1");

        let err = interceptor
            .execute::<(), _>(&order_lock(), &context, &token, || unreachable!())
            .unwrap_err();
        assert!(matches!(err, LockError::Interrupted { .. }));
    }

    #[test]
    fn release_happens_when_operation_panics() {
        let (interceptor, store) = interceptor(LockConfig::default());
        let context = EvaluationContext::new().with_value("userId", "u1");
        let lock = order_lock();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            interceptor.execute::<(), _>(&lock, &context, &CancellationToken::new(), || {
                panic!("boom");
            })
        }));

        assert!(outcome.is_err());
        assert!(!store.is_locked("locks:order:u1").unwrap());
    }

    #[test]
    fn nested_execution_with_same_holder_reenters() {
        let (interceptor, store) = interceptor(LockConfig::default());
        let context = EvaluationContext::new().with_value("userId", "u1");
        let lock = order_lock();
        let holder = HolderId::generate();
        let token = CancellationToken::new();

        let inner = interceptor
            .execute_as(holder.clone(), &lock, &context, &token, || {
                interceptor.execute_as(holder.clone(), &lock, &context, &token, || 7)
            })
            .unwrap()
            .unwrap();

        assert_eq!(inner, 7);
        assert!(!store.is_locked("locks:order:u1").unwrap());
    }

    #[test]
    fn lease_is_clamped_to_expire_after() {
        let config = LockConfig {
            expire_after_ms: 1_000,
            ..LockConfig::default()
        };
        let (interceptor, _store) = interceptor(config);
        let lock = DistributedLock::builder("'k'")
            .lease(Duration::from_secs(600))
            .build()
            .unwrap();
        assert_eq!(
            interceptor.effective_lease(&lock, &LockKey::from("k")),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn lost_lease_is_not_released_twice() {
        let (interceptor, store) = interceptor(LockConfig::default());
        let collector = Arc::new(ReleaseFailureCollector::new());
        let interceptor = interceptor.with_observer(collector.clone());
        let lock = DistributedLock::builder("'short'")
            .lease(Duration::from_millis(20))
            .build()
            .unwrap();

        interceptor
            .execute(&lock, &EvaluationContext::new(), &CancellationToken::new(), || {
                std::thread::sleep(Duration::from_millis(60));
            })
            .unwrap();

        assert!(collector.is_empty());
        assert!(!store.is_locked("locks:short").unwrap());
        assert!(!interceptor.registry().obtain(&LockKey::from("short")).is_pinned());
    }

    #[test]
    fn malformed_template_fails_at_build() {
        let err = DistributedLock::builder("'order:' + ").build().unwrap_err();
        assert!(matches!(err, LockError::Evaluation { .. }));
        assert!(
            DistributedLock::builder("'k'")
                .lease(Duration::ZERO)
                .build()
                .is_err()
        );
    }
}
