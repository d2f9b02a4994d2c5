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

use crate::error::{LockError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Named arguments of one protected invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationContext {
    values: HashMap<String, Value>,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value<N, V>(mut self, name: N, value: V) -> Self
    where
        N: Into<String>,
        V: Into<Value>,
    {
        self.insert(name, value);
        self
    }

    /// Adds any serializable value; structs become objects reachable through
    /// `#name.field`.
    pub fn with_serialized<N, T>(mut self, name: N, value: &T) -> Result<Self>
    where
        N: Into<String>,
        T: Serialize + ?Sized,
    {
        let name = name.into();
        let value = serde_json::to_value(value).map_err(|err| {
            LockError::evaluation(&format!("#{name}"), format!("cannot serialize argument: {err}"))
        })?;
        self.values.insert(name, value);
        Ok(self)
    }

    pub fn insert<N, V>(&mut self, name: N, value: V)
    where
        N: Into<String>,
        V: Into<Value>,
    {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<N, V> FromIterator<(N, V)> for EvaluationContext
where
    N: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut context = EvaluationContext::new();
        for (name, value) in iter {
            context.insert(name, value);
        }
        context
    }
}
