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

use crate::error::*;
use crate::locking::LockType;

#[test]
fn test_acquisition_failure_message_carries_key() {
    let error = LockError::AcquisitionFailed {
        key: "order:u1:p1".to_string(),
        message: "Order is being processed".to_string(),
        waited_secs: 0.2,
    };

    let rendered = error.to_string();
    assert!(rendered.contains("Order is being processed"));
    assert!(rendered.contains("order:u1:p1"));
    assert!(error.is_retryable());
    assert_eq!(error.key(), Some("order:u1:p1"));
}

#[test]
fn test_store_error_is_not_contention() {
    let error = LockError::store("product:p1:stock", "connection refused");
    assert!(!error.is_retryable());

    let context = ErrorContext::new(&error);
    assert!(context.suggestion.unwrap().contains("not contention"));
    assert!(context.details.unwrap().contains("connection refused"));
}

#[test]
fn test_error_context_evaluation() {
    let error = LockError::evaluation("'user:' + #userId", "unknown argument 'userId'");
    let context = ErrorContext::new(&error);

    assert!(context.details.unwrap().contains("#userId"));
    assert!(context.suggestion.is_some());
    assert_eq!(error.key(), None);
}

#[test]
fn test_error_context_with_custom_suggestion() {
    let error = LockError::Interrupted {
        key: "k".to_string(),
        waited_secs: 1.0,
    };
    let context = ErrorContext::new(&error).with_suggestion("Press Ctrl-C again.".to_string());

    assert_eq!(context.suggestion, Some("Press Ctrl-C again.".to_string()));
}

#[test]
fn test_format_error_chain() {
    let error = LockError::InvalidConfig("cache_capacity must be positive".to_string());
    let formatted = format_error_chain(&error);

    assert!(formatted.starts_with("Error: Invalid configuration"));
    assert!(formatted.contains("Details: cache_capacity must be positive"));
    assert!(formatted.contains("Suggestion:"));
}

#[test]
fn test_exit_codes() {
    assert_eq!(
        get_exit_code(&LockError::evaluation("#x", "unknown argument 'x'")),
        2
    );
    assert_eq!(
        get_exit_code(&LockError::UnsupportedLockType {
            store: "file".to_string(),
            kind: LockType::Fair,
        }),
        2
    );
    assert_eq!(get_exit_code(&LockError::store("k", "down")), 69);
    assert_eq!(
        get_exit_code(&LockError::AcquisitionFailed {
            key: "k".to_string(),
            message: "busy".to_string(),
            waited_secs: 0.0,
        }),
        75
    );
    assert_eq!(
        get_exit_code(&LockError::Interrupted {
            key: "k".to_string(),
            waited_secs: 0.0,
        }),
        130
    );
    assert_eq!(
        get_exit_code(&LockError::Release {
            key: "k".to_string(),
            details: "gone".to_string(),
        }),
        1
    );
}
