//! JSON Selector (C2) and Variable Extractor (C4).
//!
//! C2 resolves a small JSONPath-like subset against a parsed body: optional
//! `$`/`$.` prefix, dot-separated segments, each optionally followed by one or
//! more `[i]` indices. Navigation is strict — any miss or type mismatch
//! returns `None` rather than panicking or coercing.
//!
//! C4 builds on C2 to populate `TestCaseResult.extracted_variables` from a
//! passed test's response, per an ordered rule set.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

use crate::model::{ExtractionSource, VariableExtractionRule};

static BRACKET_INDEX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+)\]").expect("valid bracket index regex"));

/// Strips an optional leading `$` or `$.`. `"$"` alone becomes the empty path
/// (selects the root).
fn strip_root_prefix(path: &str) -> &str {
    if path == "$" {
        ""
    } else if let Some(rest) = path.strip_prefix("$.") {
        rest
    } else if let Some(rest) = path.strip_prefix('$') {
        rest
    } else {
        path
    }
}

/// Splits one dot-separated segment into an optional property name and a
/// sequence of bracket indices, e.g. `"items[1][2]"` -> `(Some("items"), [1, 2])`.
fn parse_segment(segment: &str) -> Option<(Option<&str>, Vec<usize>)> {
    match segment.find('[') {
        None => Some((Some(segment), Vec::new())),
        Some(bracket_pos) => {
            let name = &segment[..bracket_pos];
            let name = if name.is_empty() { None } else { Some(name) };
            let rest = &segment[bracket_pos..];
            let mut indices = Vec::new();
            for cap in BRACKET_INDEX_RE.captures_iter(rest) {
                indices.push(cap[1].parse::<usize>().ok()?);
            }
            Some((name, indices))
        }
    }
}

/// Resolves `path` against `root`. Empty path (including `"$"` alone) returns
/// the root. Any segment miss — property absent, index out of bounds, or
/// indexing/keying into the wrong JSON type — returns `None`.
pub fn select<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let trimmed = strip_root_prefix(path.trim());
    if trimmed.is_empty() {
        return Some(root);
    }

    let mut current = root;
    for segment in trimmed.split('.') {
        if segment.is_empty() {
            continue;
        }
        let (name, indices) = parse_segment(segment)?;
        if let Some(name) = name {
            current = current.as_object()?.get(name)?;
        }
        for idx in indices {
            current = current.as_array()?.get(idx)?;
        }
    }
    Some(current)
}

/// A scalar passes through; objects and arrays serialize to their JSON text
/// form, per C2's contract.
pub fn node_value(node: &Value) -> Value {
    match node {
        Value::Object(_) | Value::Array(_) => Value::String(node.to_string()),
        scalar => scalar.clone(),
    }
}

/// Renders a [`Value`] the way an extraction rule's regex stage matches
/// against it: strings pass through, everything else uses its JSON text form.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn case_insensitive_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a String> {
    let lower = name.to_lowercase();
    headers.iter().find(|(k, _)| k.to_lowercase() == lower).map(|(_, v)| v)
}

/// Resolves one rule's raw value before any regex capture is applied.
fn resolve_raw_value(
    rule: &VariableExtractionRule,
    status_code: u16,
    body: &Value,
    raw_body: &str,
    headers: &HashMap<String, String>,
) -> Option<Value> {
    match rule.source {
        ExtractionSource::ResponseBody => {
            if body.is_null() && !raw_body.trim().is_empty() {
                // Body never parsed as JSON: the rule falls back to the raw text.
                return Some(Value::String(raw_body.to_string()));
            }
            select(body, &rule.path).map(node_value)
        }
        ExtractionSource::ResponseHeader => {
            case_insensitive_header(headers, &rule.path).map(|v| Value::String(v.clone()))
        }
        ExtractionSource::ResponseStatusCode => Some(Value::Number(status_code.into())),
    }
}

/// Applies every rule in order against one successful response, producing the
/// map that becomes `TestCaseResult.extracted_variables`. Never fails: a rule
/// that cannot resolve its value stores `null` and logs a warning.
pub fn extract_variables(
    rules: &[VariableExtractionRule],
    status_code: u16,
    body: &Value,
    raw_body: &str,
    headers: &HashMap<String, String>,
) -> HashMap<String, Value> {
    let mut out = HashMap::with_capacity(rules.len());

    for rule in rules {
        let raw = resolve_raw_value(rule, status_code, body, raw_body, headers);
        let raw = match raw {
            Some(v) => v,
            None => {
                tracing::warn!(
                    variable = %rule.name,
                    source = ?rule.source,
                    path = %rule.path,
                    "extraction rule could not resolve a value"
                );
                out.insert(rule.name.clone(), Value::Null);
                continue;
            }
        };

        let value = match &rule.regex {
            None => raw,
            Some(pattern) => match Regex::new(pattern) {
                Ok(re) => {
                    let haystack = stringify(&raw);
                    match re.captures(&haystack) {
                        Some(caps) => {
                            let matched = caps.get(1).or_else(|| caps.get(0)).expect("group 0 always matches");
                            Value::String(matched.as_str().to_string())
                        }
                        None => {
                            tracing::warn!(variable = %rule.name, pattern, "extraction regex did not match");
                            Value::Null
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(variable = %rule.name, pattern, error = %e, "invalid extraction regex");
                    Value::Null
                }
            },
        };

        out.insert(rule.name.clone(), value);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn selects_top_level_property() {
        let root = json!({"name": "Ada"});
        assert_eq!(select(&root, "name"), Some(&json!("Ada")));
    }

    #[test]
    fn selects_with_dollar_prefix() {
        let root = json!({"name": "Ada"});
        assert_eq!(select(&root, "$.name"), Some(&json!("Ada")));
        assert_eq!(select(&root, "$"), Some(&root));
    }

    #[test]
    fn selects_nested_and_indexed() {
        let root = json!({"items": [{"id": 1}, {"id": 2}]});
        assert_eq!(select(&root, "items[1].id"), Some(&json!(2)));
    }

    #[test]
    fn missing_property_is_absent() {
        let root = json!({"a": 1});
        assert_eq!(select(&root, "b"), None);
    }

    #[test]
    fn index_out_of_bounds_is_absent() {
        let root = json!({"items": [1, 2]});
        assert_eq!(select(&root, "items[5]"), None);
    }

    #[test]
    fn indexing_a_scalar_is_absent() {
        let root = json!({"a": 1});
        assert_eq!(select(&root, "a[0]"), None);
    }

    #[test]
    fn empty_path_returns_root() {
        let root = json!({"a": 1});
        assert_eq!(select(&root, ""), Some(&root));
    }

    #[test]
    fn node_value_serializes_non_scalars() {
        let obj = json!({"a": 1});
        assert_eq!(node_value(&obj), Value::String("{\"a\":1}".to_string()));
        assert_eq!(node_value(&json!(42)), json!(42));
    }

    #[test]
    fn extracts_from_body_path() {
        let rules = vec![VariableExtractionRule {
            name: "token".to_string(),
            source: ExtractionSource::ResponseBody,
            path: "auth.token".to_string(),
            regex: None,
        }];
        let body = json!({"auth": {"token": "abc123"}});
        let vars = extract_variables(&rules, 200, &body, "", &HashMap::new());
        assert_eq!(vars.get("token"), Some(&json!("abc123")));
    }

    #[test]
    fn extracts_from_header_case_insensitively() {
        let rules = vec![VariableExtractionRule {
            name: "request_id".to_string(),
            source: ExtractionSource::ResponseHeader,
            path: "X-Request-Id".to_string(),
            regex: None,
        }];
        let mut headers = HashMap::new();
        headers.insert("x-request-id".to_string(), "abc-123".to_string());
        let vars = extract_variables(&rules, 200, &Value::Null, "", &headers);
        assert_eq!(vars.get("request_id"), Some(&json!("abc-123")));
    }

    #[test]
    fn extracts_status_code() {
        let rules = vec![VariableExtractionRule {
            name: "status".to_string(),
            source: ExtractionSource::ResponseStatusCode,
            path: String::new(),
            regex: None,
        }];
        let vars = extract_variables(&rules, 201, &Value::Null, "", &HashMap::new());
        assert_eq!(vars.get("status"), Some(&json!(201)));
    }

    #[test]
    fn missing_path_produces_null_and_warns() {
        let rules = vec![VariableExtractionRule {
            name: "missing".to_string(),
            source: ExtractionSource::ResponseBody,
            path: "nope".to_string(),
            regex: None,
        }];
        let body = json!({"a": 1});
        let vars = extract_variables(&rules, 200, &body, "{\"a\":1}", &HashMap::new());
        assert_eq!(vars.get("missing"), Some(&Value::Null));
    }

    #[test]
    fn regex_captures_first_group() {
        let rules = vec![VariableExtractionRule {
            name: "id".to_string(),
            source: ExtractionSource::ResponseBody,
            path: "message".to_string(),
            regex: Some(r"id=(\d+)".to_string()),
        }];
        let body = json!({"message": "created id=42 ok"});
        let vars = extract_variables(&rules, 200, &body, "", &HashMap::new());
        assert_eq!(vars.get("id"), Some(&json!("42")));
    }

    #[test]
    fn regex_no_match_produces_null() {
        let rules = vec![VariableExtractionRule {
            name: "id".to_string(),
            source: ExtractionSource::ResponseBody,
            path: "message".to_string(),
            regex: Some(r"id=(\d+)".to_string()),
        }];
        let body = json!({"message": "no identifiers here"});
        let vars = extract_variables(&rules, 200, &body, "", &HashMap::new());
        assert_eq!(vars.get("id"), Some(&Value::Null));
    }

    #[test]
    fn body_not_json_falls_back_to_raw_text() {
        let rules = vec![VariableExtractionRule {
            name: "raw".to_string(),
            source: ExtractionSource::ResponseBody,
            path: "anything".to_string(),
            regex: None,
        }];
        let vars = extract_variables(&rules, 200, &Value::Null, "plain text body", &HashMap::new());
        assert_eq!(vars.get("raw"), Some(&json!("plain text body")));
    }
}
