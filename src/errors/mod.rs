//! Structured error codes for the execution engine.
//!
//! Every code is a stable four-digit number (`Exyyy`) grouped by category, so
//! automation (CI, dashboards) can react to a code without parsing prose.
//!
//! | Range  | Category     |
//! |--------|--------------|
//! | E1xxx  | Input/validation |
//! | E2xxx  | HTTP transport |
//! | E3xxx  | Assertion/extraction |
//! | E4xxx  | Configuration/dependency |
//! | E5xxx  | Internal |

use std::fmt;

/// A four-digit error code with a category derived from its leading digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(u16);

impl ErrorCode {
    // E1xxx: input/validation — problem is in the submitted test cases themselves.
    pub const EMPTY_TEST_LIST: Self = Self(1001);
    pub const DUPLICATE_TEST_ID: Self = Self(1002);
    pub const EMPTY_TEST_ID: Self = Self(1003);
    pub const MISSING_REQUEST_PATH: Self = Self(1004);
    pub const INVALID_HTTP_METHOD: Self = Self(1005);
    pub const INVALID_RUN_REQUEST_FORMAT: Self = Self(1006);

    // E2xxx: HTTP transport.
    pub const HTTP_TIMEOUT: Self = Self(2001);
    pub const HTTP_CONNECTION_ERROR: Self = Self(2002);
    pub const HTTP_TLS_ERROR: Self = Self(2003);
    pub const HTTP_INVALID_RESPONSE_BODY: Self = Self(2004);

    // E3xxx: assertion and extraction failures.
    pub const ASSERTION_STATUS_CODE: Self = Self(3001);
    pub const ASSERTION_RESPONSE_TIME: Self = Self(3002);
    pub const ASSERTION_HEADER: Self = Self(3003);
    pub const ASSERTION_BODY: Self = Self(3004);
    pub const ASSERTION_JSON_PATH: Self = Self(3005);
    pub const ASSERTION_ARRAY: Self = Self(3006);
    pub const ASSERTION_SCHEMA: Self = Self(3007);
    pub const ASSERTION_BODY_NOT_JSON: Self = Self(3008);
    pub const ASSERTION_NOT_IMPLEMENTED: Self = Self(3009);
    pub const EXTRACTION_PATH_NOT_FOUND: Self = Self(3010);
    pub const EXTRACTION_HEADER_NOT_FOUND: Self = Self(3011);
    pub const EXTRACTION_REGEX_NO_MATCH: Self = Self(3012);
    pub const EXTRACTION_INVALID_SOURCE: Self = Self(3013);
    pub const EXTRACTION_INVALID_REGEX: Self = Self(3014);

    // E4xxx: configuration and dependency failures.
    pub const MISSING_BASE_URL: Self = Self(4001);
    pub const UPLOAD_FILE_NOT_FOUND: Self = Self(4002);
    pub const FILE_PERMISSION_ERROR: Self = Self(4003);
    pub const RUN_REQUEST_FILE_NOT_FOUND: Self = Self(4004);
    pub const CIRCULAR_DEPENDENCY: Self = Self(4005);
    pub const UNKNOWN_PREREQUISITE: Self = Self(4006);

    // E5xxx: internal/unexpected.
    pub const INTERNAL_ERROR: Self = Self(5001);
    pub const SERIALIZATION_ERROR: Self = Self(5002);
    pub const LLM_EXTRACTION_FAILED: Self = Self(5003);

    pub fn code(&self) -> u16 {
        self.0
    }

    pub fn formatted(&self) -> String {
        format!("E{:04}", self.0)
    }

    pub fn category(&self) -> ErrorCategory {
        match self.0 / 1000 {
            1 => ErrorCategory::Validation,
            2 => ErrorCategory::HttpTransport,
            3 => ErrorCategory::Assertion,
            4 => ErrorCategory::Configuration,
            5 => ErrorCategory::Internal,
            _ => ErrorCategory::Unknown,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formatted())
    }
}

/// Coarse grouping of an [`ErrorCode`], derived from its leading digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    HttpTransport,
    Assertion,
    Configuration,
    Internal,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Validation => "validation",
            Self::HttpTransport => "http-transport",
            Self::Assertion => "assertion",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
            Self::Unknown => "unknown",
        };
        write!(f, "{label}")
    }
}

/// Extra detail attached to a [`StructuredError`], all fields optional.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub test_case_id: Option<String>,
    pub path: Option<String>,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

/// An error carrying a stable code plus enough context to render a useful message.
#[derive(Debug)]
pub struct StructuredError {
    pub code: ErrorCode,
    pub message: String,
    pub context: Option<ErrorContext>,
}

impl StructuredError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_test_case_id(mut self, id: impl Into<String>) -> Self {
        self.context.get_or_insert_with(ErrorContext::default).test_case_id = Some(id.into());
        self
    }

    /// Renders `[E3001] message (test: id) [expected: X, actual: Y]`.
    pub fn user_message(&self) -> String {
        let mut msg = format!("[{}] {}", self.code, self.message);

        if let Some(ctx) = &self.context {
            if let Some(id) = &ctx.test_case_id {
                msg.push_str(&format!(" (test: {id})"));
            }
            if let (Some(expected), Some(actual)) = (&ctx.expected, &ctx.actual) {
                msg.push_str(&format!(" [expected: {expected}, actual: {actual}]"));
            }
        }

        msg
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for StructuredError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_leading_e_and_four_digits() {
        assert_eq!(ErrorCode::EMPTY_TEST_LIST.formatted(), "E1001");
        assert_eq!(ErrorCode::HTTP_TIMEOUT.formatted(), "E2001");
        assert_eq!(ErrorCode::EXTRACTION_REGEX_NO_MATCH.formatted(), "E3012");
    }

    #[test]
    fn categorizes_by_leading_digit() {
        assert_eq!(ErrorCode::EMPTY_TEST_LIST.category(), ErrorCategory::Validation);
        assert_eq!(ErrorCode::HTTP_TIMEOUT.category(), ErrorCategory::HttpTransport);
        assert_eq!(ErrorCode::ASSERTION_RESPONSE_TIME.category(), ErrorCategory::Assertion);
        assert_eq!(ErrorCode::MISSING_BASE_URL.category(), ErrorCategory::Configuration);
        assert_eq!(ErrorCode::INTERNAL_ERROR.category(), ErrorCategory::Internal);
    }

    #[test]
    fn user_message_includes_test_case_id() {
        let err = StructuredError::new(ErrorCode::ASSERTION_STATUS_CODE, "status mismatch")
            .with_test_case_id("login_ok");

        let msg = err.user_message();
        assert!(msg.contains("E3001"));
        assert!(msg.contains("login_ok"));
    }

    #[test]
    fn user_message_includes_expected_and_actual() {
        let err = StructuredError::new(ErrorCode::ASSERTION_JSON_PATH, "value mismatch").with_context(
            ErrorContext {
                test_case_id: Some("create_user".to_string()),
                path: Some("$.data.id".to_string()),
                expected: Some("123".to_string()),
                actual: Some("456".to_string()),
            },
        );

        let msg = err.user_message();
        assert!(msg.contains("expected: 123"));
        assert!(msg.contains("actual: 456"));
    }
}
