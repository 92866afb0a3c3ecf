//! Data model for a run: test cases as submitted, and results as produced.
//!
//! `TestCase` and its nested types are the immutable input; `TestCaseResult` /
//! `TestRunResult` are the mutable-during-the-run output. See [`crate::runner`]
//! for how a `TestCase` becomes a `TestCaseResult`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Relative importance a test case was authored with. Not consulted by the
/// scheduler — ordering is driven entirely by [`TestCase::prerequisites`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Priority {
    Lowest,
    Low,
    Medium,
    High,
    Highest,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// HTTP method of a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }

    /// Whether this method carries a request body per C5.
    pub fn carries_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }
}

/// Where an `ApiKey` credential is placed on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ApiKeyLocation {
    Header,
    Query,
}

/// Authentication to apply before per-test headers, per C5 step 3.
///
/// Every string field is variable-expandable (passed through C1 before use).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Authentication {
    None,
    Basic { user: String, password: String },
    Bearer { token: String },
    ApiKey {
        header_name: String,
        value: String,
        location: ApiKeyLocation,
    },
}

/// A multipart file part: inline base64 content, or a filesystem path read
/// at request-build time. Exactly one of the two is expected to be set by
/// well-formed input; [`crate::request`] treats base64 as taking precedence.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileParameter {
    pub field_name: String,
    pub file_name: String,
    #[serde(default)]
    pub file_content_base64: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// The outgoing HTTP shape of a test case, before variable expansion.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub method: Method,
    /// Relative path; may contain `{name}` placeholders and `{{var}}` variables.
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub path_parameters: HashMap<String, String>,
    #[serde(default)]
    pub query_parameters: HashMap<String, String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub form_parameters: HashMap<String, String>,
    #[serde(default)]
    pub file_parameters: Vec<FileParameter>,
}

/// A minimal expected-response shape, consulted only when `Assertions` is empty
/// (C6 then synthesizes a single `StatusCode` assertion from `status_code`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedResponse {
    #[serde(default)]
    pub status_code: Option<u16>,
}

/// Kind of check an [`Assertion`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AssertionType {
    StatusCode,
    ResponseTime,
    HeaderExists,
    HeaderValue,
    BodyContainsString,
    BodyEqualsString,
    BodyMatchesRegex,
    JsonPathValue,
    JsonPathExists,
    JsonPathNotExists,
    ArrayLength,
    ArrayContains,
    /// Declared but not required: accepted by the type system, evaluated.
    JsonSchemaValidation,
    /// Declared but not required: accepted, never implemented — see C3.
    XmlPathValue,
    /// Declared but not required: accepted, never implemented — see C3.
    XmlSchemaValidation,
}

/// Comparison applied between the observed and expected value of an [`Assertion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Condition {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
    MatchesRegex,
    DoesNotMatchRegex,
    Exists,
    NotExists,
    IsEmpty,
    IsNotEmpty,
    IsNull,
    IsNotNull,
}

/// One check run against a response by C3.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assertion {
    #[serde(rename = "type")]
    pub assertion_type: AssertionType,
    /// Target of the check: a header name, a JSON path, or unused for
    /// whole-body / status / latency checks, depending on `assertion_type`.
    #[serde(default)]
    pub target: Option<String>,
    pub condition: Condition,
    #[serde(default)]
    pub expected_value: Option<Value>,
}

/// Where a [`VariableExtractionRule`] reads its raw value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExtractionSource {
    ResponseBody,
    ResponseHeader,
    ResponseStatusCode,
}

/// A rule extracting one named variable from a passed test's response.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableExtractionRule {
    pub name: String,
    pub source: ExtractionSource,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub regex: Option<String>,
}

/// An immutable test case as submitted for a run.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub test_case_id: String,
    pub test_case_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub authentication: Option<Authentication>,
    pub request: Request,
    #[serde(default)]
    pub expected_response: Option<ExpectedResponse>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    #[serde(default)]
    pub extract_variables: Vec<VariableExtractionRule>,
    #[serde(default)]
    pub skip: bool,
}

/// Terminal and transient states a [`TestCaseResult`] moves through.
///
/// Monotone: `Pending` -> (`Skipped` | `Blocked` | `Running` -> (`Passed` |
/// `Failed` | `Error`)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    Pending,
    Skipped,
    Running,
    Passed,
    Failed,
    Error,
    Blocked,
}

impl Status {
    /// True once a result will never change state again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Pending | Status::Running)
    }
}

/// Outcome of a single [`Assertion`] evaluation, produced by C3.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResult {
    #[serde(rename = "type")]
    pub assertion_type: AssertionType,
    pub passed: bool,
    #[serde(default)]
    pub actual_value: Option<Value>,
    pub message: String,
}

/// A readable echo of the request actually sent, for reports and debugging.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEcho {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_preview: Option<String>,
}

/// A readable echo of the response received, for reports and debugging.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEcho {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Result of running one [`TestCase`], one per input case per run (invariant).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResult {
    pub test_case_id: String,
    pub test_case_name: String,
    pub status: Status,
    #[serde(default)]
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub duration_ms: u64,
    #[serde(default)]
    pub request: Option<RequestEcho>,
    #[serde(default)]
    pub response: Option<ResponseEcho>,
    #[serde(default)]
    pub assertion_results: Vec<AssertionResult>,
    #[serde(default)]
    pub extracted_variables: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub retry_attempts: u32,
}

impl TestCaseResult {
    /// A fresh `Pending` result, as created when scheduling begins.
    pub fn pending(test_case: &TestCase) -> Self {
        Self {
            test_case_id: test_case.test_case_id.clone(),
            test_case_name: test_case.test_case_name.clone(),
            status: Status::Pending,
            start_time: None,
            end_time: None,
            duration_ms: 0,
            request: None,
            response: None,
            assertion_results: Vec::new(),
            extracted_variables: HashMap::new(),
            error_message: None,
            retry_attempts: 0,
        }
    }
}

/// Final outcome of an entire run: one [`TestCaseResult`] per submitted
/// [`TestCase`], in scheduling order.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunResult {
    pub run_id: String,
    pub base_url: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: chrono::DateTime<chrono::Utc>,
    pub global_variables: HashMap<String, Value>,
    pub results: Vec<TestCaseResult>,
}

impl TestRunResult {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn count(&self, status: Status) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn passed(&self) -> usize {
        self.count(Status::Passed)
    }

    pub fn failed(&self) -> usize {
        self.count(Status::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(Status::Skipped)
    }

    pub fn blocked(&self) -> usize {
        self.count(Status::Blocked)
    }

    pub fn errored(&self) -> usize {
        self.count(Status::Error)
    }
}

/// The run-scoped request a client submits: the test case list plus the
/// globals that seed every test's variable context.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub test_cases: Vec<TestCase>,
    pub base_url: String,
    #[serde(default)]
    pub global_headers: HashMap<String, String>,
    #[serde(default)]
    pub global_variables: HashMap<String, Value>,
}
