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

use std::fmt;

/// Lifecycle of one protected invocation.
///
/// ```text
/// Idle -> KeyResolved -> Acquiring -> Held -> Releasing -> Released
///                                  \-> AcquireFailed
///                                  \-> Interrupted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterceptorState {
    Idle,
    KeyResolved,
    Acquiring,
    Held,
    Releasing,
    Released,
    AcquireFailed,
    Interrupted,
}

impl InterceptorState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InterceptorState::Released
                | InterceptorState::AcquireFailed
                | InterceptorState::Interrupted
        )
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: InterceptorState) -> bool {
        use InterceptorState::*;
        match (self, next) {
            (Idle, KeyResolved)
            | (KeyResolved, Acquiring)
            | (Acquiring, Held)
            | (Acquiring, AcquireFailed)
            | (Held, Releasing)
            | (Releasing, Released) => true,
            (current, Interrupted) => !current.is_terminal() && current != Held,
            _ => false,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            InterceptorState::Idle => "IDLE",
            InterceptorState::KeyResolved => "KEY_RESOLVED",
            InterceptorState::Acquiring => "ACQUIRING",
            InterceptorState::Held => "HELD",
            InterceptorState::Releasing => "RELEASING",
            InterceptorState::Released => "RELEASED",
            InterceptorState::AcquireFailed => "ACQUIRE_FAILED",
            InterceptorState::Interrupted => "INTERRUPTED",
        }
    }
}

impl fmt::Display for InterceptorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
