//! Variable Substitutor (C1) and the run-time variable context it reads from.
//!
//! Differs from a typical templating engine in one deliberate way: a missing
//! key never fails the caller. Expansion always produces a string.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("valid variable token regex")
});

/// The variable map visible to one test case while it runs: globals overlaid
/// with each prerequisite's extracted variables (in declaration order), then
/// the test's own `Variables`, per the precedence invariant in the data model.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    values: HashMap<String, Value>,
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Overlays `other` on top of `self`, keys in `other` winning ties.
    pub fn overlay(&mut self, other: &HashMap<String, Value>) {
        for (k, v) in other {
            self.values.insert(k.clone(), v.clone());
        }
    }

    pub fn as_map(&self) -> &HashMap<String, Value> {
        &self.values
    }
}

/// Stringifies a JSON value the way a `{{token}}` substitution does: strings
/// pass through verbatim, everything else uses its JSON text form.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Expands every `{{name}}` token in `template` against `ctx`. Unknown keys
/// become the empty string and are logged at warn level; expansion never
/// fails. Not recursive: a substituted value containing `{{x}}` is left as-is.
pub fn expand(template: &str, ctx: &VariableContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for capture in TOKEN_RE.captures_iter(template) {
        let whole = capture.get(0).expect("group 0 always matches");
        out.push_str(&template[last..whole.start()]);

        let name = capture.get(1).expect("capture group 1 present").as_str();
        match ctx.get(name) {
            Some(value) => out.push_str(&stringify(value)),
            None => {
                tracing::warn!(variable = name, "unknown variable, substituting empty string");
            }
        }

        last = whole.end();
    }

    out.push_str(&template[last..]);
    out
}

/// Recursively expands every string leaf of a JSON value through [`expand`].
pub fn expand_value(value: &Value, ctx: &VariableContext) -> Value {
    match value {
        Value::String(s) => Value::String(expand(s, ctx)),
        Value::Array(items) => Value::Array(items.iter().map(|v| expand_value(v, ctx)).collect()),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), expand_value(v, ctx));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}
