//! LLM-Text Test Case Extractor (C9).
//!
//! Treats the LLM boundary as an untrusted parser input: the model output may
//! wrap JSON in prose, fence it in markdown, leave trailing commas, or botch
//! the structure entirely. This module never fails the caller — worst case it
//! returns an empty `Vec`, logged at warn level.
//!
//! Pipeline: strip code fences -> trim to the first balanced top-level JSON
//! value -> lenient array parse (case-insensitive keys, comments, trailing
//! commas) -> on failure, scan for any balanced `[...]` region and retry ->
//! on failure, scan for individual balanced `{...}` objects and keep only
//! the ones that pass the validity gate.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::model::TestCase;

static CODE_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").expect("valid fence regex"));

/// Strips a markdown code fence and returns its contents if present,
/// otherwise returns the input unchanged.
fn strip_code_fences(text: &str) -> String {
    match CODE_FENCE_RE.captures(text) {
        Some(caps) => caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_else(|| text.to_string()),
        None => text.to_string(),
    }
}

/// Removes `//` and `/* */` comments, string-aware so `"http://x"` and a
/// `/* pattern */` inside a quoted string are left alone.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    let mut in_string = false;
    let mut escape = false;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            out.push(c);
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        if c == '"' {
            in_string = true;
            out.push(c);
            i += 1;
            continue;
        }

        if c == '/' && i + 1 < chars.len() && chars[i + 1] == '/' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if c == '/' && i + 1 < chars.len() && chars[i + 1] == '*' {
            i += 2;
            while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                i += 1;
            }
            i += 2;
            continue;
        }

        out.push(c);
        i += 1;
    }

    out
}

/// Removes a trailing comma immediately before `}` or `]`.
fn strip_trailing_commas(text: &str) -> String {
    static TRAILING_COMMA_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r",(\s*[}\]])").expect("valid trailing comma regex"));
    TRAILING_COMMA_RE.replace_all(text, "$1").into_owned()
}

/// Scans `text` for every top-level balanced region starting with `open` and
/// ending with the matching `close`, string-aware. Returns the substrings in
/// the order found.
fn find_balanced_regions(text: &str, open: char, close: char) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut regions = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != open {
            i += 1;
            continue;
        }

        let start = i;
        let mut depth = 0i32;
        let mut in_string = false;
        let mut escape = false;
        let mut end = None;

        let mut j = i;
        while j < chars.len() {
            let c = chars[j];
            if in_string {
                if escape {
                    escape = false;
                } else if c == '\\' {
                    escape = true;
                } else if c == '"' {
                    in_string = false;
                }
            } else if c == '"' {
                in_string = true;
            } else if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
                if depth == 0 {
                    end = Some(j);
                    break;
                }
            }
            j += 1;
        }

        match end {
            Some(e) => {
                regions.push(chars[start..=e].iter().collect());
                i = e + 1;
            }
            None => i += 1,
        }
    }

    regions
}

/// Trims `text` down to the first balanced top-level JSON value (an object
/// or an array), dropping any leading/trailing prose.
fn trim_to_first_balanced_value(text: &str) -> Option<String> {
    let first_brace = text.find('{');
    let first_bracket = text.find('[');

    let (open, close) = match (first_brace, first_bracket) {
        (Some(b), Some(k)) if k < b => ('[', ']'),
        (Some(_), _) => ('{', '}'),
        (None, Some(_)) => ('[', ']'),
        (None, None) => return None,
    };

    find_balanced_regions(text, open, close).into_iter().next()
}

/// Case-insensitive field-name lookup table mapping every known lowercase
/// field name (across `TestCase` and its nested types) to the exact
/// camelCase spelling the model expects.
static KNOWN_FIELDS: &[&str] = &[
    "testCaseId", "testCaseName", "description", "priority", "tags", "prerequisites", "variables",
    "authentication", "request", "expectedResponse", "assertions", "extractVariables", "skip",
    "method", "path", "headers", "pathParameters", "queryParameters", "contentType", "body",
    "formParameters", "fileParameters", "statusCode", "type", "target", "condition", "expectedValue",
    "name", "source", "regex", "user", "password", "token", "headerName", "value", "location",
    "fieldName", "fileName", "fileContentBase64", "filePath",
];

fn canonical_field_name(key: &str) -> String {
    KNOWN_FIELDS
        .iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(key))
        .map(|candidate| candidate.to_string())
        .unwrap_or_else(|| key.to_string())
}

/// Recursively normalizes object keys to their canonical camelCase spelling
/// so a test case written with inconsistent casing still deserializes.
fn normalize_keys(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let entries: Vec<(String, Value)> = std::mem::take(map).into_iter().collect();
            for (key, mut v) in entries {
                normalize_keys(&mut v);
                map.insert(canonical_field_name(&key), v);
            }
        }
        Value::Array(items) => {
            for item in items {
                normalize_keys(item);
            }
        }
        _ => {}
    }
}

/// Cleans raw LLM text into a best-effort JSON-parseable string: strips code
/// fences, comments, and trailing commas, then trims to the first balanced
/// top-level value.
fn clean(text: &str) -> String {
    let unfenced = strip_code_fences(text);
    let uncommented = strip_comments(&unfenced);
    let trimmed = strip_trailing_commas(&uncommented);
    trim_to_first_balanced_value(&trimmed).unwrap_or(trimmed)
}

fn parse_as_test_case_array(cleaned: &str) -> Option<Vec<TestCase>> {
    let mut value: Value = serde_json::from_str(cleaned).ok()?;
    normalize_keys(&mut value);

    match &value {
        Value::Array(_) => serde_json::from_value(value).ok(),
        Value::Object(_) => serde_json::from_value::<TestCase>(value).ok().map(|tc| vec![tc]),
        _ => None,
    }
}

fn is_valid(tc: &TestCase) -> bool {
    !tc.test_case_id.trim().is_empty() && !tc.test_case_name.trim().is_empty() && !tc.request.path.trim().is_empty()
}

/// Parses arbitrary LLM output text into a validated list of test cases.
/// Never fails: malformed or partially-malformed input yields whatever valid
/// test cases could be salvaged, down to an empty list. Discarded entries are
/// logged at warn level, not surfaced as an error.
pub fn extract_test_cases(text: &str) -> Vec<TestCase> {
    let cleaned = clean(text);

    if let Some(cases) = parse_as_test_case_array(&cleaned) {
        let (valid, discarded): (Vec<_>, Vec<_>) = cases.into_iter().partition(is_valid);
        for tc in &discarded {
            tracing::warn!(test_case_id = %tc.test_case_id, "discarding invalid test case from LLM output");
        }
        if !valid.is_empty() {
            return valid;
        }
    }

    for region in find_balanced_regions(&cleaned, '[', ']') {
        let region = strip_trailing_commas(&region);
        if let Some(cases) = parse_as_test_case_array(&region) {
            let valid: Vec<_> = cases.into_iter().filter(is_valid).collect();
            if !valid.is_empty() {
                tracing::warn!("recovered test cases via array-region fallback scan");
                return valid;
            }
        }
    }

    let mut recovered = Vec::new();
    for region in find_balanced_regions(&cleaned, '{', '}') {
        let region = strip_trailing_commas(&region);
        let mut value: Value = match serde_json::from_str(&region) {
            Ok(v) => v,
            Err(_) => continue,
        };
        normalize_keys(&mut value);
        if let Ok(tc) = serde_json::from_value::<TestCase>(value) {
            if is_valid(&tc) {
                recovered.push(tc);
            }
        }
    }

    if recovered.is_empty() {
        tracing::warn!("no valid test cases could be extracted from LLM output");
    } else {
        tracing::warn!(count = recovered.len(), "recovered test cases via per-object fallback scan");
    }

    recovered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> String {
        format!(
            r#"{{"testCaseId": "{id}", "testCaseName": "Check health", "request": {{"method": "GET", "path": "/health"}}}}"#
        )
    }

    #[test]
    fn parses_clean_array() {
        let text = format!("[{}]", sample("t1"));
        let cases = extract_test_cases(&text);
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].test_case_id, "t1");
    }

    #[test]
    fn strips_markdown_code_fence() {
        let text = format!("Here are your tests:\n```json\n[{}]\n```\nLet me know if you need more.", sample("t2"));
        let cases = extract_test_cases(&text);
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].test_case_id, "t2");
    }

    #[test]
    fn tolerates_trailing_commas_and_comments() {
        let text = format!(
            "[\n  {}, // trailing comma and a comment above\n]",
            sample("t3")
        );
        let cases = extract_test_cases(&text);
        assert_eq!(cases.len(), 1);
    }

    #[test]
    fn normalizes_case_insensitive_field_names() {
        let text = r#"[{"TESTCASEID": "t4", "TestCaseName": "Check", "Request": {"Method": "GET", "PATH": "/health"}}]"#;
        let cases = extract_test_cases(text);
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].test_case_id, "t4");
    }

    #[test]
    fn falls_back_to_array_region_scan_when_wrapped_in_prose() {
        let text = format!(
            "Sure, based on the spec here is the array you asked for: [{}] -- hope that helps!",
            sample("t5")
        );
        let cases = extract_test_cases(&text);
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].test_case_id, "t5");
    }

    #[test]
    fn falls_back_to_individual_objects_when_array_is_malformed() {
        let text = format!("[{}, {{not valid json here}}]", sample("t6"));
        let cases = extract_test_cases(&text);
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].test_case_id, "t6");
    }

    #[test]
    fn discards_entries_missing_required_fields() {
        let text = r#"[{"testCaseId": "", "testCaseName": "no id", "request": {"method": "GET", "path": "/x"}}]"#;
        assert!(extract_test_cases(text).is_empty());
    }

    #[test]
    fn empty_list_is_a_legitimate_output() {
        assert!(extract_test_cases("not json at all, just prose").is_empty());
    }

    #[test]
    fn never_panics_on_garbage_input() {
        let _ = extract_test_cases("{{{[[[\"unterminated");
        let _ = extract_test_cases("");
    }
}
