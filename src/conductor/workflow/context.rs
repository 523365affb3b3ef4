// SPDX-License-Identifier: MIT

//! Runtime state for one workflow run: variable bindings and node results

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Variable written by `askUserQuestion` nodes with the latest answer
pub const USER_ANSWER_VAR: &str = "userAnswer";

/// Variables and per-node results threaded through a workflow run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub variables: HashMap<String, Value>,
    pub results: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.variables.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    /// Get a variable, descending into objects with dot notation
    /// (e.g. "user.name") when there is no exact match
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.variables.get(path) {
            return Some(value);
        }

        let mut parts = path.split('.');
        let mut current = self.variables.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    pub fn set_result(&mut self, node_id: impl Into<String>, result: impl Into<Value>) {
        self.results.insert(node_id.into(), result.into());
    }

    pub fn result(&self, node_id: &str) -> Option<&Value> {
        self.results.get(node_id)
    }

    /// Replace `{{name}}` placeholders with variable values.
    ///
    /// Placeholders without a binding are left exactly as written. The
    /// template is scanned once, so substituted values are never expanded
    /// again.
    pub fn interpolate_prompt(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let after_open = &rest[open + 2..];
            let Some(close) = after_open.find("}}") else {
                out.push_str(&rest[open..]);
                return out;
            };

            let key = &after_open[..close];
            match self.get_path(key) {
                Some(value) => out.push_str(&value_to_text(value)),
                None => out.push_str(&rest[open..open + 2 + close + 2]),
            }
            rest = &after_open[close + 2..];
        }

        out.push_str(rest);
        out
    }
}

/// Render a value the way it should appear inside a prompt
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
