//! Assertion Evaluator (C3) and E1xxx input validation.
//!
//! C3 runs every assertion declared on a test case independently — a failing
//! assertion never stops evaluation of the rest, so a [`TestCaseResult`]
//! always carries one [`AssertionResult`] per declared [`Assertion`]. The
//! evaluator is a pure function table keyed on [`AssertionType`], not a
//! trait-object dispatch: there is exactly one implementer per variant and no
//! caller ever needs to add a new one at runtime.
//!
//! Input validation accumulates every [`StructuredError`] it finds in one
//! pass rather than stopping at the first — callers see the whole picture
//! before a run is rejected.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::errors::{ErrorCode, StructuredError};
use crate::extractors;
use crate::model::{Assertion, AssertionType, Condition, RunRequest};
use crate::variables::VariableContext;

/// The response data an [`Assertion`] is checked against. Headers are
/// expected pre-lowercased by the caller so lookups are a plain map hit.
pub struct ResponseContext<'a> {
    pub status_code: u16,
    pub body: &'a Value,
    pub raw_body: &'a str,
    pub headers: &'a HashMap<String, String>,
    pub duration_ms: u64,
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn condition_label(condition: Condition) -> &'static str {
    match condition {
        Condition::Equals => "equals",
        Condition::NotEquals => "not equals",
        Condition::GreaterThan => "greater than",
        Condition::GreaterThanOrEqual => "greater than or equal",
        Condition::LessThan => "less than",
        Condition::LessThanOrEqual => "less than or equal",
        Condition::Contains => "contains",
        Condition::MatchesRegex => "matches regex",
        Condition::DoesNotMatchRegex => "does not match regex",
        Condition::Exists => "exists",
        Condition::NotExists => "not exists",
        Condition::IsEmpty => "is empty",
        Condition::IsNotEmpty => "is not empty",
        Condition::IsNull => "is null",
        Condition::IsNotNull => "is not null",
    }
}

/// Applies `condition` between an observed value (`actual`, `None` meaning
/// "not found") and an already variable-expanded `expected`. Numeric
/// conditions coerce `expected` to `actual`'s numeric kind; everything else
/// compares on the stringified form. Never panics: an unsatisfiable
/// comparison (e.g. a non-numeric actual against a numeric condition) simply
/// evaluates to `false`.
fn apply_condition(condition: Condition, actual: Option<&Value>, expected: Option<&Value>) -> Result<bool, String> {
    match condition {
        Condition::Exists => Ok(actual.is_some() && !matches!(actual, Some(Value::Null))),
        Condition::NotExists => Ok(actual.is_none() || matches!(actual, Some(Value::Null))),
        Condition::IsNull => Ok(matches!(actual, None | Some(Value::Null))),
        Condition::IsNotNull => Ok(!matches!(actual, None | Some(Value::Null))),
        Condition::IsEmpty => Ok(actual.map(stringify).unwrap_or_default().is_empty()),
        Condition::IsNotEmpty => Ok(!actual.map(stringify).unwrap_or_default().is_empty()),
        Condition::Equals | Condition::NotEquals => {
            let eq = match (actual, expected) {
                (Some(a), Some(e)) => match (as_f64(a), as_f64(e)) {
                    (Some(av), Some(ev)) => (av - ev).abs() < f64::EPSILON,
                    _ => stringify(a) == stringify(e),
                },
                (None, None) => true,
                _ => false,
            };
            Ok(if matches!(condition, Condition::Equals) { eq } else { !eq })
        }
        Condition::GreaterThan | Condition::GreaterThanOrEqual | Condition::LessThan | Condition::LessThanOrEqual => {
            let (av, ev) = match (actual.and_then(as_f64), expected.and_then(as_f64)) {
                (Some(a), Some(e)) => (a, e),
                _ => return Ok(false),
            };
            Ok(match condition {
                Condition::GreaterThan => av > ev,
                Condition::GreaterThanOrEqual => av >= ev,
                Condition::LessThan => av < ev,
                Condition::LessThanOrEqual => av <= ev,
                _ => unreachable!(),
            })
        }
        Condition::Contains => {
            let haystack = actual.map(stringify).unwrap_or_default();
            let needle = expected.map(stringify).unwrap_or_default();
            Ok(haystack.contains(&needle))
        }
        Condition::MatchesRegex | Condition::DoesNotMatchRegex => {
            let haystack = actual.map(stringify).unwrap_or_default();
            let pattern = expected.map(stringify).unwrap_or_default();
            let re = Regex::new(&pattern).map_err(|e| format!("invalid regex: {e}"))?;
            let matched = re.is_match(&haystack);
            Ok(if matches!(condition, Condition::MatchesRegex) { matched } else { !matched })
        }
    }
}

fn result_for(
    assertion: &Assertion,
    actual: Option<Value>,
    expected: Option<Value>,
) -> crate::model::AssertionResult {
    let outcome = apply_condition(assertion.condition, actual.as_ref(), expected.as_ref());
    let (passed, message) = match outcome {
        Ok(true) => (true, "assertion passed".to_string()),
        Ok(false) => (
            false,
            format!(
                "Assertion failed. Expected: {} ({}), Actual: {}",
                expected.as_ref().map(stringify).unwrap_or_else(|| "<none>".to_string()),
                condition_label(assertion.condition),
                actual.as_ref().map(stringify).unwrap_or_else(|| "<none>".to_string()),
            ),
        ),
        Err(e) => (false, e),
    };

    crate::model::AssertionResult {
        assertion_type: assertion.assertion_type,
        passed,
        actual_value: actual,
        message,
    }
}

fn expand_expected(expected: Option<&Value>, vars: &VariableContext) -> Option<Value> {
    expected.map(|v| match v {
        Value::String(s) => Value::String(crate::variables::expand(s, vars)),
        other => other.clone(),
    })
}

/// Whether `raw` looks like a JSON object or array at the top level — the
/// cheap check C3 uses before trusting a JSON-path assertion's pre-parsed
/// body, per §4.3 ("a body that is neither `{…}` nor `[…]`").
fn body_looks_like_json(raw: &str) -> bool {
    matches!(raw.trim().as_bytes().first(), Some(b'{') | Some(b'['))
}

fn body_not_json_result(assertion: &Assertion) -> crate::model::AssertionResult {
    crate::model::AssertionResult {
        assertion_type: assertion.assertion_type,
        passed: false,
        actual_value: None,
        message: "response body is not valid JSON".to_string(),
    }
}

fn not_implemented(assertion: &Assertion) -> crate::model::AssertionResult {
    crate::model::AssertionResult {
        assertion_type: assertion.assertion_type,
        passed: false,
        actual_value: None,
        message: "XML assertions are not implemented".to_string(),
    }
}

fn eval_json_schema(assertion: &Assertion, ctx: &ResponseContext, expected: Option<Value>) -> crate::model::AssertionResult {
    let schema = match &expected {
        Some(s) => s,
        None => {
            return crate::model::AssertionResult {
                assertion_type: assertion.assertion_type,
                passed: false,
                actual_value: None,
                message: "json schema assertion requires expectedValue to be a schema object".to_string(),
            }
        }
    };

    let target = match &assertion.target {
        Some(path) => match extractors::select(ctx.body, path) {
            Some(node) => node.clone(),
            None => {
                return crate::model::AssertionResult {
                    assertion_type: assertion.assertion_type,
                    passed: false,
                    actual_value: None,
                    message: format!("json path '{path}' not found in response body"),
                }
            }
        },
        None => ctx.body.clone(),
    };

    match jsonschema::JSONSchema::compile(schema) {
        Ok(compiled) => {
            let errors: Vec<String> = match compiled.validate(&target) {
                Ok(()) => Vec::new(),
                Err(errs) => errs.take(3).map(|e| e.to_string()).collect(),
            };
            let passed = errors.is_empty();
            let message = if passed {
                "assertion passed".to_string()
            } else {
                format!("schema validation failed: {}", errors.join("; "))
            };
            crate::model::AssertionResult {
                assertion_type: assertion.assertion_type,
                passed,
                actual_value: Some(target),
                message,
            }
        }
        Err(e) => crate::model::AssertionResult {
            assertion_type: assertion.assertion_type,
            passed: false,
            actual_value: None,
            message: format!("invalid json schema: {e}"),
        },
    }
}

/// Evaluates one declared assertion against a response. Never panics or
/// propagates an error: any internal failure (bad regex, bad schema, missing
/// path) surfaces as `passed: false` with an explanatory message.
pub fn evaluate(assertion: &Assertion, ctx: &ResponseContext, vars: &VariableContext) -> crate::model::AssertionResult {
    let expected = expand_expected(assertion.expected_value.as_ref(), vars);

    match assertion.assertion_type {
        AssertionType::StatusCode => result_for(assertion, Some(Value::from(ctx.status_code)), expected),
        AssertionType::ResponseTime => result_for(assertion, Some(Value::from(ctx.duration_ms)), expected),
        AssertionType::HeaderExists => {
            let name = assertion.target.clone().unwrap_or_default();
            let actual = ctx.headers.get(&name.to_lowercase()).map(|v| Value::String(v.clone()));
            result_for(assertion, actual, expected)
        }
        AssertionType::HeaderValue => {
            let name = assertion.target.clone().unwrap_or_default();
            let actual = ctx.headers.get(&name.to_lowercase()).map(|v| Value::String(v.clone()));
            result_for(assertion, actual, expected)
        }
        AssertionType::BodyContainsString | AssertionType::BodyEqualsString | AssertionType::BodyMatchesRegex => {
            result_for(assertion, Some(Value::String(ctx.raw_body.to_string())), expected)
        }
        AssertionType::JsonPathValue => {
            if !body_looks_like_json(ctx.raw_body) {
                return body_not_json_result(assertion);
            }
            let path = assertion.target.clone().unwrap_or_default();
            match extractors::select(ctx.body, &path).map(extractors::node_value) {
                Some(actual) => result_for(assertion, Some(actual), expected),
                None => crate::model::AssertionResult {
                    assertion_type: assertion.assertion_type,
                    passed: false,
                    actual_value: None,
                    message: "JSON Path not found".to_string(),
                },
            }
        }
        AssertionType::JsonPathExists => {
            if !body_looks_like_json(ctx.raw_body) {
                return body_not_json_result(assertion);
            }
            let path = assertion.target.clone().unwrap_or_default();
            let found = extractors::select(ctx.body, &path).is_some();
            crate::model::AssertionResult {
                assertion_type: assertion.assertion_type,
                passed: found,
                actual_value: Some(Value::Bool(found)),
                message: if found {
                    "assertion passed".to_string()
                } else {
                    format!("json path '{path}' does not exist in response body")
                },
            }
        }
        AssertionType::JsonPathNotExists => {
            if !body_looks_like_json(ctx.raw_body) {
                return body_not_json_result(assertion);
            }
            let path = assertion.target.clone().unwrap_or_default();
            let found = extractors::select(ctx.body, &path).is_some();
            crate::model::AssertionResult {
                assertion_type: assertion.assertion_type,
                passed: !found,
                actual_value: Some(Value::Bool(found)),
                message: if !found {
                    "assertion passed".to_string()
                } else {
                    format!("json path '{path}' unexpectedly exists in response body")
                },
            }
        }
        AssertionType::ArrayLength => {
            if !body_looks_like_json(ctx.raw_body) {
                return body_not_json_result(assertion);
            }
            let path = assertion.target.clone().unwrap_or_default();
            let actual = extractors::select(ctx.body, &path).and_then(|v| v.as_array()).map(|arr| Value::from(arr.len()));
            result_for(assertion, actual, expected)
        }
        AssertionType::ArrayContains => {
            if !body_looks_like_json(ctx.raw_body) {
                return body_not_json_result(assertion);
            }
            let path = assertion.target.clone().unwrap_or_default();
            let array = extractors::select(ctx.body, &path).and_then(|v| v.as_array());
            match array {
                Some(items) => {
                    let contains = expected.as_ref().is_some_and(|e| {
                        items.iter().any(|item| {
                            apply_condition(Condition::Equals, Some(&extractors::node_value(item)), Some(e))
                                .unwrap_or(false)
                        })
                    });
                    crate::model::AssertionResult {
                        assertion_type: assertion.assertion_type,
                        passed: contains,
                        actual_value: Some(Value::Array(items.clone())),
                        message: if contains {
                            "assertion passed".to_string()
                        } else {
                            format!(
                                "Assertion failed. Expected array at '{path}' to contain {}, Actual: {}",
                                expected.as_ref().map(stringify).unwrap_or_default(),
                                Value::Array(items.clone())
                            )
                        },
                    }
                }
                None => crate::model::AssertionResult {
                    assertion_type: assertion.assertion_type,
                    passed: false,
                    actual_value: None,
                    message: format!("json path '{path}' is not an array"),
                },
            }
        }
        AssertionType::JsonSchemaValidation => eval_json_schema(assertion, ctx, expected),
        AssertionType::XmlPathValue | AssertionType::XmlSchemaValidation => not_implemented(assertion),
    }
}

/// Enumerated validation failures, one variant per distinct problem a
/// [`RunRequest`] can have. Mirrors the teacher's `ValidationError` shape —
/// a `thiserror`-derived enum with the user-facing message attached to each
/// variant via `#[error(...)]`, rather than building message strings by hand
/// at every call site.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("baseUrl must not be empty")]
    MissingBaseUrl,

    #[error("testCases must not be empty")]
    EmptyTestList,

    #[error("testCaseId must not be empty")]
    EmptyTestId { test_case_id: String },

    #[error("duplicate testCaseId '{test_case_id}'")]
    DuplicateTestId { test_case_id: String },

    #[error("request.path must not be empty")]
    MissingRequestPath { test_case_id: String },

    #[error("prerequisite '{prerequisite}' is self-referential and will be dropped")]
    SelfPrerequisite { test_case_id: String, prerequisite: String },

    #[error("prerequisite '{prerequisite}' does not reference a known test case and will be dropped")]
    UnknownPrerequisite { test_case_id: String, prerequisite: String },
}

impl ValidationError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::MissingBaseUrl => ErrorCode::MISSING_BASE_URL,
            Self::EmptyTestList => ErrorCode::EMPTY_TEST_LIST,
            Self::EmptyTestId { .. } => ErrorCode::EMPTY_TEST_ID,
            Self::DuplicateTestId { .. } => ErrorCode::DUPLICATE_TEST_ID,
            Self::MissingRequestPath { .. } => ErrorCode::MISSING_REQUEST_PATH,
            Self::SelfPrerequisite { .. } | Self::UnknownPrerequisite { .. } => ErrorCode::UNKNOWN_PREREQUISITE,
        }
    }

    fn test_case_id(&self) -> Option<&str> {
        match self {
            Self::MissingBaseUrl | Self::EmptyTestList => None,
            Self::EmptyTestId { test_case_id }
            | Self::DuplicateTestId { test_case_id }
            | Self::MissingRequestPath { test_case_id }
            | Self::SelfPrerequisite { test_case_id, .. }
            | Self::UnknownPrerequisite { test_case_id, .. } => Some(test_case_id),
        }
    }
}

impl From<ValidationError> for StructuredError {
    fn from(err: ValidationError) -> Self {
        let code = err.code();
        let test_case_id = err.test_case_id().map(str::to_string);
        let structured = StructuredError::new(code, err.to_string());
        match test_case_id {
            Some(id) => structured.with_test_case_id(id),
            None => structured,
        }
    }
}

/// Validates a [`RunRequest`]'s shape before scheduling begins, collecting
/// every violation rather than stopping at the first. These are whole-run
/// fatal errors — an empty vec means the request is acceptable to schedule.
///
/// Prerequisite edges are deliberately NOT checked here: an unknown or
/// self-referential prerequisite is a per-edge concern the scheduler drops
/// with a warning (`planner::build_graph`), not grounds for aborting the
/// entire run. See [`graph_warnings`] for that check.
pub fn validate_run_request(request: &RunRequest) -> Vec<StructuredError> {
    let mut errors: Vec<ValidationError> = Vec::new();

    if request.base_url.trim().is_empty() {
        errors.push(ValidationError::MissingBaseUrl);
    }

    if request.test_cases.is_empty() {
        errors.push(ValidationError::EmptyTestList);
    }

    let mut seen_ids = HashSet::new();

    for tc in &request.test_cases {
        if tc.test_case_id.trim().is_empty() {
            errors.push(ValidationError::EmptyTestId { test_case_id: tc.test_case_id.clone() });
        } else if !seen_ids.insert(tc.test_case_id.clone()) {
            errors.push(ValidationError::DuplicateTestId { test_case_id: tc.test_case_id.clone() });
        }

        if tc.request.path.trim().is_empty() {
            errors.push(ValidationError::MissingRequestPath { test_case_id: tc.test_case_id.clone() });
        }
    }

    errors.into_iter().map(StructuredError::from).collect()
}

/// Non-fatal per-edge prerequisite warnings: unknown or self-referential
/// prerequisites. Per SPEC_FULL.md §4.7/§8 these are dropped by the
/// scheduler and logged, not treated as run-fatal — `coordinate_run` only
/// surfaces these as warnings, the affected test case still runs.
pub fn graph_warnings(request: &RunRequest) -> Vec<StructuredError> {
    let mut warnings: Vec<ValidationError> = Vec::new();
    let known_ids: HashSet<&str> = request.test_cases.iter().map(|tc| tc.test_case_id.as_str()).collect();

    for tc in &request.test_cases {
        for prereq in &tc.prerequisites {
            if prereq == &tc.test_case_id {
                warnings.push(ValidationError::SelfPrerequisite {
                    test_case_id: tc.test_case_id.clone(),
                    prerequisite: prereq.clone(),
                });
            } else if !known_ids.contains(prereq.as_str()) {
                warnings.push(ValidationError::UnknownPrerequisite {
                    test_case_id: tc.test_case_id.clone(),
                    prerequisite: prereq.clone(),
                });
            }
        }
    }

    warnings.into_iter().map(StructuredError::from).collect()
}
