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
use std::fmt;

pub struct ErrorContext<'a> {
    pub error: &'a LockError,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl<'a> ErrorContext<'a> {
    pub fn new(error: &'a LockError) -> Self {
        let (suggestion, details) = match error {
            LockError::Evaluation { template, reason } => {
                let suggestion = Some(
                    "Check the key template: literals are single-quoted, arguments are \
                     referenced as #name or #name.field, and every referenced argument must be \
                     supplied."
                        .to_string(),
                );
                let details = Some(format!("Template {template:?} could not be resolved: {reason}"));
                (suggestion, details)
            }
            LockError::AcquisitionFailed {
                key, waited_secs, ..
            } => {
                let suggestion = Some(
                    "Another holder is inside the critical section. Retry later or increase the \
                     wait duration."
                        .to_string(),
                );
                let details = Some(format!("Gave up on '{key}' after {waited_secs:.3}s"));
                (suggestion, details)
            }
            LockError::Interrupted { .. } => {
                let suggestion = Some(
                    "The wait was cancelled before the lock was granted; the protected operation \
                     did not run."
                        .to_string(),
                );
                (suggestion, None)
            }
            LockError::Store { details, .. } => {
                let suggestion = Some(
                    "The lock store is unreachable or misbehaving. This is not contention; check \
                     the store before retrying."
                        .to_string(),
                );
                let details = Some(format!("Store failure: {details}"));
                (suggestion, details)
            }
            LockError::Release { key, .. } => {
                let suggestion = Some(format!(
                    "The lease on '{key}' will still expire on its own; run 'distlock sweep' to \
                     clear expired file leases."
                ));
                (suggestion, None)
            }
            LockError::UnsupportedLockType { kind, .. } => {
                let suggestion = Some(format!(
                    "Switch to a store that provides {kind} locks (the memory store supports every \
                     lock type)."
                ));
                (suggestion, None)
            }
            LockError::InvalidConfig(msg) | LockError::ConfigError(msg) => {
                let suggestion = Some(
                    "Review distlock.toml and DISTLOCK_* environment variables (nested keys use \
                     '__', e.g. DISTLOCK_STORE__BACKEND=file)."
                        .to_string(),
                );
                let details = Some(msg.clone());
                (suggestion, details)
            }
            LockError::Io(io_err) => {
                let suggestion = match io_err.kind() {
                    std::io::ErrorKind::PermissionDenied => Some(
                        "Ensure the lock directory is writable by the current user.".to_string(),
                    ),
                    std::io::ErrorKind::NotFound => Some(
                        "Ensure the file or directory exists and the path is correct.".to_string(),
                    ),
                    _ => None,
                };
                let details = Some(format!("I/O error: {io_err}"));
                (suggestion, details)
            }
            LockError::Json(_) => (None, None),
        };

        ErrorContext {
            error,
            suggestion,
            details,
        }
    }

    pub fn with_suggestion(mut self, suggestion: String) -> Self {
        self.suggestion = Some(suggestion);
        self
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }
}

impl<'a> fmt::Display for ErrorContext<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\n\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

pub fn format_error_chain(error: &LockError) -> String {
    ErrorContext::new(error).to_string()
}
