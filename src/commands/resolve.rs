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

use crate::config::LockConfig;
use crate::error::{LockError, Result};
use crate::expression::{EvaluationContext, KeyTemplate};
use serde_json::Value;

pub struct ResolveCommand<'a> {
    config: &'a LockConfig,
}

impl<'a> ResolveCommand<'a> {
    pub fn new(config: &'a LockConfig) -> Result<Self> {
        Ok(Self { config })
    }

    /// Prints the key `template` resolves to, and the store key under the
    /// configured prefix.
    pub fn execute(&self, template: &str, arguments: &[String], json: bool) -> Result<()> {
        let template = KeyTemplate::parse(template)?;
        let context = parse_arguments(arguments)?;
        let key = template.render(&context)?;
        let store_key = key.namespaced(&self.config.key_prefix);

        if json {
            let output = serde_json::json!({
                "template": template.source(),
                "key": key.as_str(),
                "store_key": store_key,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("{key}");
            log::info!("Store key: {store_key}");
        }
        Ok(())
    }
}

/// Parses `name=value` pairs. Values that are valid JSON keep their type,
/// anything else is taken as a string.
pub fn parse_arguments(arguments: &[String]) -> Result<EvaluationContext> {
    let mut context = EvaluationContext::new();
    for argument in arguments {
        let (name, raw) = argument.split_once('=').ok_or_else(|| {
            LockError::InvalidConfig(format!(
                "argument '{argument}' must have the form name=value"
            ))
        })?;
        let name = name.trim_start_matches('#');
        if name.is_empty() {
            return Err(LockError::InvalidConfig(format!(
                "argument '{argument}' has an empty name"
            )));
        }
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::from(raw));
        context.insert(name, value);
    }
    Ok(context)
}
