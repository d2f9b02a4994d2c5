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

mod context;
mod exit_codes;
#[cfg(test)]
mod tests;

pub use context::{ErrorContext, format_error_chain};
pub use exit_codes::get_exit_code;

use crate::locking::LockType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Failed to resolve lock key template '{template}': {reason}")]
    Evaluation { template: String, reason: String },

    #[error("{message} (lock key: {key})")]
    AcquisitionFailed {
        key: String,
        message: String,
        waited_secs: f64,
    },

    #[error("Interrupted while waiting for lock '{key}' after {waited_secs:.3}s")]
    Interrupted { key: String, waited_secs: f64 },

    #[error("Lock store error for '{key}': {details}")]
    Store { key: String, details: String },

    #[error("Failed to release lock '{key}': {details}")]
    Release { key: String, details: String },

    #[error("Lock store '{store}' does not support {kind} locks")]
    UnsupportedLockType { store: String, kind: LockType },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LockError {
    pub(crate) fn evaluation(template: &str, reason: impl Into<String>) -> Self {
        LockError::Evaluation {
            template: template.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn store(key: &str, details: impl ToString) -> Self {
        LockError::Store {
            key: key.to_string(),
            details: details.to_string(),
        }
    }

    /// Only contention is worth a caller-side retry; everything else is
    /// either misconfiguration or infrastructure trouble.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::AcquisitionFailed { .. })
    }

    /// Lock key the error refers to, when there is one.
    pub fn key(&self) -> Option<&str> {
        match self {
            LockError::AcquisitionFailed { key, .. }
            | LockError::Interrupted { key, .. }
            | LockError::Store { key, .. }
            | LockError::Release { key, .. } => Some(key),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
