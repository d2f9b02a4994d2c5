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

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Flavour of lock requested from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockType {
    #[default]
    Reentrant,
    Fair,
    Read,
    Write,
}

impl LockType {
    /// Indicates whether several holders may share the key at once.
    pub fn is_shared(self) -> bool {
        matches!(self, LockType::Read)
    }

    pub fn is_exclusive(self) -> bool {
        !self.is_shared()
    }

    pub fn label(self) -> &'static str {
        match self {
            LockType::Reentrant => "reentrant",
            LockType::Fair => "fair",
            LockType::Read => "read",
            LockType::Write => "write",
        }
    }
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Fully resolved lock key. Two requests with equal keys contend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey(String);

impl LockKey {
    pub fn new<S: Into<String>>(key: S) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key as seen by the store once the registry namespace is applied.
    pub fn namespaced(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.0)
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LockKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for LockKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Opaque token naming the acquisition attempt that owns a lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HolderId(String);

impl HolderId {
    /// Generates a process-qualified identifier unique to this attempt.
    pub fn generate() -> Self {
        Self(format!("{}-{}", std::process::id(), Uuid::new_v4()))
    }

    pub fn new<S: Into<String>>(value: S) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_read_locks_are_shared() {
        assert!(LockType::Read.is_shared());
        assert!(LockType::Write.is_exclusive());
        assert!(LockType::Fair.is_exclusive());
        assert!(LockType::Reentrant.is_exclusive());
    }

    #[test]
    fn generated_holders_are_unique_and_process_qualified() {
        let first = HolderId::generate();
        let second = HolderId::generate();
        assert_ne!(first, second);
        assert!(
            first
                .as_str()
                .starts_with(&format!("{}-", std::process::id()))
        );
    }

    #[test]
    fn namespaced_key_prepends_prefix() {
        let key = LockKey::from("order:u1:p1");
        assert_eq!(key.namespaced("locks:"), "locks:order:u1:p1");
        assert_eq!(key.to_string(), "order:u1:p1");
    }

    #[test]
    fn lock_type_deserializes_lowercase() {
        let kind: LockType = serde_json::from_str("\"fair\"").unwrap();
        assert_eq!(kind, LockType::Fair);
    }
}
