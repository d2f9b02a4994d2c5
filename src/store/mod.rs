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

//! Adapters to the coordination store that arbitrates ownership.
//!
//! The store is the only source of truth for "is this key locked". Local
//! handles and the registry cache merely wrap calls into it. Every store must
//! be safe to call concurrently from many threads and, for the file store,
//! from many processes against the same key.

pub mod file;
pub mod hygiene;
pub mod memory;

pub use file::FileLockStore;
pub use hygiene::{StoreHygieneReport, StoreHygieneRunner};
pub use memory::MemoryLockStore;

use crate::config::{LockConfig, StoreBackend};
use crate::error::{LockError, Result};
use crate::locking::acquisition::AcquireRequest;
use crate::locking::kind::{HolderId, LockType};
use std::sync::Arc;
use std::time::Duration;

/// Contract every coordination store adapter fulfils.
///
/// Keys passed here are store keys, i.e. already carry the registry prefix.
pub trait LockStore: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    fn supports(&self, kind: LockType) -> bool;

    /// Blocks up to the request's wait budget. `Ok(false)` means the budget
    /// elapsed without a grant; cancellation yields `LockError::Interrupted`;
    /// any other error means the store itself misbehaved.
    fn try_acquire(&self, request: &mut AcquireRequest<'_>) -> Result<bool>;

    /// Releases one hold. Returns `false` without touching anything when
    /// `holder` is not the current owner.
    fn release(&self, key: &str, kind: LockType, holder: &HolderId) -> Result<bool>;

    fn is_held_by(&self, key: &str, kind: LockType, holder: &HolderId) -> Result<bool>;

    /// Pushes the lease expiry of a live hold to `now + lease`. Returns
    /// `false` when the hold is already gone.
    fn renew(&self, key: &str, kind: LockType, holder: &HolderId, lease: Duration)
    -> Result<bool>;
}

/// Builds the store selected by configuration.
pub fn from_config(config: &LockConfig) -> Result<Arc<dyn LockStore>> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryLockStore::new())),
        StoreBackend::File => {
            let directory = config.store.directory.clone().ok_or_else(|| {
                LockError::InvalidConfig(
                    "store.directory is required when store.backend = \"file\"".to_string(),
                )
            })?;
            Ok(Arc::new(FileLockStore::open(directory)?))
        }
    }
}
