//! Run-wide [`Settings`] and the HTTP client pool (C10).
//!
//! Settings are environment-driven the same way the rest of the ambient
//! stack is: every field has a safe default, and an env var overrides it at
//! process start. `build_http_client` is the single place a `reqwest::Client`
//! gets constructed, so timeout/TLS/pooling policy stays consistent across
//! every test case in a run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_MAX_DEGREE_OF_PARALLELISM: usize = 4;
pub const DEFAULT_MAX_RETRIES: u32 = 0;
pub const DEFAULT_RETRY_DELAY_MILLISECONDS: u64 = 1000;
pub const DEFAULT_MAX_TEST_CASE_COUNT: usize = 100;
pub const DEFAULT_MAX_RETRY_BUDGET: u32 = 50;

/// Hard cap on a response body read, regardless of `Content-Length`. A body
/// larger than this is truncated; the truncation is recorded, not hidden.
pub const MAX_RESPONSE_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Run-wide configuration, loaded once at process start and shared by every
/// test case in the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Per-request timeout. Applies to each individual HTTP attempt, not the
    /// run as a whole.
    pub request_timeout_seconds: u64,

    /// Bound on the worker pool size per scheduler layer (C7/C8).
    pub max_degree_of_parallelism: usize,

    /// Extra attempts after the first, per test case (C6).
    pub max_retries: u32,

    /// Linear delay between retry attempts, interruptible by cancellation.
    pub retry_delay_milliseconds: u64,

    /// Opt-in only: disables TLS certificate validation on the shared client.
    pub allow_untrusted_ssl: bool,

    /// Threaded through to the LLM-text extractor (C9); unused by the rest
    /// of the engine.
    #[serde(default)]
    pub llm_api_key: Option<String>,

    /// Upper bound on the number of test cases accepted in one `RunRequest`.
    pub max_test_case_count: usize,

    /// Upper bound on the sum of retry attempts across every test case in a run.
    pub max_retry_budget: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECONDS,
            max_degree_of_parallelism: DEFAULT_MAX_DEGREE_OF_PARALLELISM,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_milliseconds: DEFAULT_RETRY_DELAY_MILLISECONDS,
            allow_untrusted_ssl: false,
            llm_api_key: None,
            max_test_case_count: DEFAULT_MAX_TEST_CASE_COUNT,
            max_retry_budget: DEFAULT_MAX_RETRY_BUDGET,
        }
    }
}

impl Settings {
    /// Loads settings from the environment, falling back to defaults for any
    /// variable that is absent or fails to parse.
    ///
    /// Recognized variables: `REQUEST_TIMEOUT_SECONDS`,
    /// `MAX_DEGREE_OF_PARALLELISM`, `MAX_RETRIES`, `RETRY_DELAY_MILLISECONDS`,
    /// `ALLOW_UNTRUSTED_SSL`, `LLM_API_KEY`, `MAX_TEST_CASE_COUNT`,
    /// `MAX_RETRY_BUDGET`.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(val) = std::env::var("REQUEST_TIMEOUT_SECONDS") {
            if let Ok(n) = val.parse() {
                settings.request_timeout_seconds = n;
            }
        }
        if let Ok(val) = std::env::var("MAX_DEGREE_OF_PARALLELISM") {
            if let Ok(n) = val.parse() {
                settings.max_degree_of_parallelism = n;
            }
        }
        if let Ok(val) = std::env::var("MAX_RETRIES") {
            if let Ok(n) = val.parse() {
                settings.max_retries = n;
            }
        }
        if let Ok(val) = std::env::var("RETRY_DELAY_MILLISECONDS") {
            if let Ok(n) = val.parse() {
                settings.retry_delay_milliseconds = n;
            }
        }
        if let Ok(val) = std::env::var("ALLOW_UNTRUSTED_SSL") {
            settings.allow_untrusted_ssl = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(val) = std::env::var("LLM_API_KEY") {
            if !val.is_empty() {
                settings.llm_api_key = Some(val);
            }
        }
        if let Ok(val) = std::env::var("MAX_TEST_CASE_COUNT") {
            if let Ok(n) = val.parse() {
                settings.max_test_case_count = n;
            }
        }
        if let Ok(val) = std::env::var("MAX_RETRY_BUDGET") {
            if let Ok(n) = val.parse() {
                settings.max_retry_budget = n;
            }
        }

        settings
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_milliseconds)
    }
}

/// Builds the single `reqwest::Client` shared across every request in a run,
/// per C10: connection pooling and TLS policy are fixed once here rather than
/// per-request.
pub fn build_http_client(settings: &Settings) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(settings.request_timeout())
        .danger_accept_invalid_certs(settings.allow_untrusted_ssl)
        .build()
}

/// Caps a response body read at [`MAX_RESPONSE_BODY_BYTES`], returning the
/// text read so far and whether it was truncated.
pub fn cap_response_body(bytes: &[u8]) -> (String, bool) {
    if bytes.len() <= MAX_RESPONSE_BODY_BYTES {
        (String::from_utf8_lossy(bytes).into_owned(), false)
    } else {
        (String::from_utf8_lossy(&bytes[..MAX_RESPONSE_BODY_BYTES]).into_owned(), true)
    }
}

/// Total count of test cases and the retry budget a `RunRequest` would spend
/// in the worst case, checked against [`Settings`] before scheduling begins.
#[derive(Debug)]
pub struct RunLimitViolation {
    pub limit_name: String,
    pub limit_value: String,
    pub actual_value: String,
    pub message: String,
}

/// Validates a prospective run against the run-wide ceilings in `settings`.
pub fn validate_run_limits(test_case_count: usize, settings: &Settings) -> Vec<RunLimitViolation> {
    let mut violations = Vec::new();

    if test_case_count > settings.max_test_case_count {
        violations.push(RunLimitViolation {
            limit_name: "max_test_case_count".to_string(),
            limit_value: settings.max_test_case_count.to_string(),
            actual_value: test_case_count.to_string(),
            message: format!(
                "run submits {test_case_count} test cases, maximum allowed is {}",
                settings.max_test_case_count
            ),
        });
    }

    let worst_case_retries = test_case_count as u64 * settings.max_retries as u64;
    if worst_case_retries > settings.max_retry_budget as u64 {
        violations.push(RunLimitViolation {
            limit_name: "max_retry_budget".to_string(),
            limit_value: settings.max_retry_budget.to_string(),
            actual_value: worst_case_retries.to_string(),
            message: format!(
                "run could spend up to {worst_case_retries} retries, maximum allowed is {}",
                settings.max_retry_budget
            ),
        });
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_documented_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.request_timeout_seconds, 30);
        assert_eq!(settings.max_degree_of_parallelism, 4);
        assert_eq!(settings.max_retries, 0);
        assert_eq!(settings.retry_delay_milliseconds, 1000);
        assert!(!settings.allow_untrusted_ssl);
    }

    #[test]
    fn builds_http_client_without_panicking() {
        let settings = Settings::default();
        assert!(build_http_client(&settings).is_ok());
    }

    #[test]
    fn caps_oversized_body_and_flags_truncation() {
        let bytes = vec![b'x'; MAX_RESPONSE_BODY_BYTES + 10];
        let (text, truncated) = cap_response_body(&bytes);
        assert!(truncated);
        assert_eq!(text.len(), MAX_RESPONSE_BODY_BYTES);
    }

    #[test]
    fn small_body_is_not_truncated() {
        let (text, truncated) = cap_response_body(b"hello");
        assert!(!truncated);
        assert_eq!(text, "hello");
    }

    #[test]
    fn validate_run_limits_flags_too_many_test_cases() {
        let settings = Settings { max_test_case_count: 5, ..Settings::default() };
        let violations = validate_run_limits(10, &settings);
        assert!(violations.iter().any(|v| v.limit_name == "max_test_case_count"));
    }

    #[test]
    fn validate_run_limits_flags_retry_budget_overrun() {
        let settings = Settings { max_retries: 10, max_retry_budget: 5, ..Settings::default() };
        let violations = validate_run_limits(1, &settings);
        assert!(violations.iter().any(|v| v.limit_name == "max_retry_budget"));
    }

    #[test]
    fn validate_run_limits_passes_within_bounds() {
        let settings = Settings::default();
        assert!(validate_run_limits(5, &settings).is_empty());
    }
}
