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

//! Lock key templates.
//!
//! A template such as `'order:' + #userId + ':' + #productId` is parsed once
//! and rendered against the named arguments of each invocation. Rendering
//! never falls back to the template text: an unknown parameter, a missing
//! field or a key that comes out null or empty is an evaluation error.

mod context;
mod lexer;
mod parser;

pub use context::EvaluationContext;

use crate::error::{LockError, Result};
use crate::locking::kind::LockKey;
use parser::Expr;
use serde_json::{Number, Value};
use std::fmt;
use std::str::FromStr;

/// A parsed lock key template.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyTemplate {
    source: String,
    expr: Expr,
}

impl KeyTemplate {
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = lexer::tokenize(source).map_err(|reason| LockError::evaluation(source, reason))?;
        let expr = parser::parse(tokens).map_err(|reason| LockError::evaluation(source, reason))?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, context: &EvaluationContext) -> Result<LockKey> {
        let value = evaluate(&self.expr, context)
            .map_err(|reason| LockError::evaluation(&self.source, reason))?;
        let key = scalar_text(&value)
            .ok_or_else(|| LockError::evaluation(&self.source, format!("key resolved to {}", describe(&value))))?;
        if key.is_empty() {
            return Err(LockError::evaluation(&self.source, "key resolved to an empty string"));
        }
        Ok(LockKey::new(key))
    }
}

impl FromStr for KeyTemplate {
    type Err = LockError;

    fn from_str(source: &str) -> Result<Self> {
        KeyTemplate::parse(source)
    }
}

impl fmt::Display for KeyTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parses and renders `template` in one step.
pub fn resolve(template: &str, context: &EvaluationContext) -> Result<String> {
    KeyTemplate::parse(template)?
        .render(context)
        .map(|key| key.as_str().to_string())
}

fn evaluate(expr: &Expr, context: &EvaluationContext) -> std::result::Result<Value, String> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Reference { name, path } => lookup(name, path, context),
        Expr::Add(left, right) => {
            let left = evaluate(left, context)?;
            let right = evaluate(right, context)?;
            add(&left, &right)
        }
        Expr::Equals(left, right) => Ok(Value::Bool(evaluate(left, context)? == evaluate(right, context)?)),
        Expr::NotEquals(left, right) => Ok(Value::Bool(evaluate(left, context)? != evaluate(right, context)?)),
        Expr::Not(inner) => match evaluate(inner, context)? {
            Value::Bool(flag) => Ok(Value::Bool(!flag)),
            other => Err(format!("'!' needs a boolean, got {}", describe(&other))),
        },
        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => match evaluate(condition, context)? {
            Value::Bool(true) => evaluate(then, context),
            Value::Bool(false) => evaluate(otherwise, context),
            other => Err(format!(
                "ternary condition must be a boolean, got {}",
                describe(&other)
            )),
        },
    }
}

fn lookup(name: &str, path: &[String], context: &EvaluationContext) -> std::result::Result<Value, String> {
    let mut current = context
        .get(name)
        .ok_or_else(|| format!("unknown parameter '#{name}'"))?;
    let mut reference = format!("#{name}");

    for field in path {
        current = match current {
            Value::Object(map) => map
                .get(field)
                .ok_or_else(|| format!("'{reference}' has no field '{field}'"))?,
            other => {
                return Err(format!(
                    "cannot read field '{field}' of '{reference}' ({})",
                    describe(other)
                ));
            }
        };
        reference.push('.');
        reference.push_str(field);
    }

    if current.is_null() {
        return Err(format!("'{reference}' is null"));
    }
    Ok(current.clone())
}

fn add(left: &Value, right: &Value) -> std::result::Result<Value, String> {
    if let (Value::Number(a), Value::Number(b)) = (left, right) {
        return add_numbers(a, b);
    }

    let left_text = scalar_text(left)
        .ok_or_else(|| format!("cannot concatenate {}", describe(left)))?;
    let right_text = scalar_text(right)
        .ok_or_else(|| format!("cannot concatenate {}", describe(right)))?;
    Ok(Value::String(left_text + &right_text))
}

/// Integers add exactly across the whole `i64`/`u64` range; anything else
/// adds as `f64`.
fn add_numbers(a: &Number, b: &Number) -> std::result::Result<Value, String> {
    if let (Some(x), Some(y)) = (as_integer(a), as_integer(b)) {
        let sum = x + y;
        return i64::try_from(sum)
            .map(Value::from)
            .or_else(|_| u64::try_from(sum).map(Value::from))
            .map_err(|_| format!("integer overflow adding {x} and {y}"));
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Number::from_f64(x + y)
            .map(Value::Number)
            .ok_or_else(|| format!("{x} + {y} is not a finite number")),
        _ => Err(format!("cannot add {a} and {b}")),
    }
}

fn as_integer(number: &Number) -> Option<i128> {
    number
        .as_i64()
        .map(i128::from)
        .or_else(|| number.as_u64().map(i128::from))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
