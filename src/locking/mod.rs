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

pub mod acquisition;
pub mod cancellation;
pub mod handle;
pub mod interceptor;
pub mod kind;
pub mod observer;
pub mod registry;
pub mod state;
pub mod watchdog;

pub use acquisition::{AcquireRequest, PollingBackoff, WaitBudget};
pub use cancellation::{CancellationToken, global_token};
pub use handle::{HeldLock, LockHandle};
pub use interceptor::{
    DEFAULT_FAILURE_MESSAGE, DistributedLock, DistributedLockBuilder, LockInterceptor,
};
pub use kind::{HolderId, LockKey, LockType};
pub use observer::{
    CompositeObserver, LockObserver, NoopLockObserver, ReleaseFailureCollector,
};
pub use registry::LockRegistry;
pub use state::InterceptorState;
pub use watchdog::LeaseWatchdog;
