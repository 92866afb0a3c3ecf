//! Single-Test Runner (C6).
//!
//! Turns one [`TestCase`] into one [`TestCaseResult`]: builds and sends the
//! HTTP request (via [`crate::executors::http`]), evaluates assertions (C3),
//! extracts variables on success (C4), and retries according to a flat
//! `MaxRetries` / `RetryDelayMilliseconds` budget rather than the teacher's
//! exponential-backoff / three-strategy `RecoveryPolicy` model — this spec
//! has no per-test recovery strategy, just a uniform retry budget.

use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::executors::http::{self, AttemptError};
use crate::limits::Settings;
use crate::model::{Assertion, AssertionType, Condition, Status, TestCase, TestCaseResult};
use crate::validation::{self, ResponseContext};
use crate::variables::VariableContext;
use crate::{extractors, model};

/// Synthesizes the single default assertion C6 uses when a test declares no
/// `Assertions` but does declare `ExpectedResponse.StatusCode`.
fn synthesize_status_code_assertion(status_code: u16) -> Assertion {
    Assertion {
        assertion_type: AssertionType::StatusCode,
        target: None,
        condition: Condition::Equals,
        expected_value: Some(Value::from(status_code)),
    }
}

/// Runs every declared (or synthesized) assertion against one response.
/// Per §4.6: no assertions and no expected response is itself a pass.
fn run_assertions(test_case: &TestCase, ctx: &ResponseContext, vars: &VariableContext) -> Vec<model::AssertionResult> {
    if !test_case.assertions.is_empty() {
        return test_case.assertions.iter().map(|a| validation::evaluate(a, ctx, vars)).collect();
    }

    if let Some(expected) = &test_case.expected_response {
        if let Some(status_code) = expected.status_code {
            let synthesized = synthesize_status_code_assertion(status_code);
            return vec![validation::evaluate(&synthesized, ctx, vars)];
        }
    }

    Vec::new()
}

/// Executes `test_case` end to end: `run(testCase, baseUrl, globalHeaders,
/// variables, ctx) -> TestCaseResult`, per C6. `cancel` is the run-scoped
/// cancellation token threaded from the Run Coordinator (C8).
pub async fn run(
    test_case: &TestCase,
    base_url: &str,
    global_headers: &HashMap<String, String>,
    vars: &VariableContext,
    client: &Client,
    settings: &Settings,
    cancel: &CancellationToken,
) -> TestCaseResult {
    let mut result = TestCaseResult::pending(test_case);
    result.status = Status::Running;
    let start_time = Utc::now();

    let max_attempts = settings.max_retries + 1;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        if cancel.is_cancelled() {
            result.status = Status::Skipped;
            result.error_message = Some("cancelled".to_string());
            break;
        }

        let attempt_started = Instant::now();
        let attempt_result = tokio::select! {
            result = http::send_attempt(client, settings, base_url, global_headers, test_case, vars) => result,
            _ = cancel.cancelled() => {
                result.status = Status::Skipped;
                result.error_message = Some("cancelled".to_string());
                break;
            }
        };

        match attempt_result {
            Ok(outcome) => {
                let response_ctx = ResponseContext {
                    status_code: outcome.response_echo.status_code,
                    body: &outcome.body_json,
                    raw_body: &outcome.raw_body,
                    headers: &outcome.headers_lower,
                    duration_ms: outcome.duration_ms,
                };
                let assertion_results = run_assertions(test_case, &response_ctx, vars);
                let passed = assertion_results.iter().all(|a| a.passed);
                let status_code = outcome.response_echo.status_code;
                let headers_lower = outcome.headers_lower.clone();
                let raw_body = outcome.raw_body.clone();
                let body_json = outcome.body_json.clone();

                result.duration_ms = outcome.duration_ms;
                result.request = Some(outcome.request_echo);
                result.response = Some(outcome.response_echo);
                result.assertion_results = assertion_results;

                if passed {
                    result.status = Status::Passed;
                    result.extracted_variables =
                        extractors::extract_variables(&test_case.extract_variables, status_code, &body_json, &raw_body, &headers_lower);
                    break;
                }

                result.status = Status::Failed;
                if attempt >= max_attempts {
                    break;
                }
            }
            Err(AttemptError::Transport(message)) => {
                result.status = Status::Error;
                result.error_message = Some(message);
                result.duration_ms = attempt_started.elapsed().as_millis() as u64;
                if attempt >= max_attempts {
                    break;
                }
            }
            Err(AttemptError::Configuration(message)) => {
                result.status = Status::Error;
                result.error_message = Some(message);
                result.duration_ms = attempt_started.elapsed().as_millis() as u64;
                break;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(settings.retry_delay()) => {}
            _ = cancel.cancelled() => {
                result.status = Status::Skipped;
                result.error_message = Some("cancelled".to_string());
                break;
            }
        }
    }

    result.start_time = Some(start_time);
    result.end_time = Some(Utc::now());
    result.retry_attempts = attempt.saturating_sub(1);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExpectedResponse, Priority, Request};
    use serde_json::json;

    fn test_case_with(assertions: Vec<Assertion>, expected_response: Option<ExpectedResponse>) -> TestCase {
        TestCase {
            test_case_id: "t1".to_string(),
            test_case_name: "t1".to_string(),
            description: None,
            priority: Priority::Medium,
            tags: Vec::new(),
            prerequisites: Vec::new(),
            variables: HashMap::new(),
            authentication: None,
            request: Request {
                method: crate::model::Method::Get,
                path: "/x".to_string(),
                headers: HashMap::new(),
                path_parameters: HashMap::new(),
                query_parameters: HashMap::new(),
                content_type: None,
                body: None,
                form_parameters: HashMap::new(),
                file_parameters: Vec::new(),
            },
            expected_response,
            assertions,
            extract_variables: Vec::new(),
            skip: false,
        }
    }

    fn ctx(status_code: u16) -> ResponseContext<'static> {
        // Leaked for 'static test convenience; never done outside tests.
        let body: &'static Value = Box::leak(Box::new(Value::Null));
        let headers: &'static HashMap<String, String> = Box::leak(Box::new(HashMap::new()));
        ResponseContext { status_code, body, raw_body: "", headers, duration_ms: 5 }
    }

    #[test]
    fn no_assertions_and_no_expected_response_is_a_pass() {
        let tc = test_case_with(Vec::new(), None);
        let results = run_assertions(&tc, &ctx(200), &VariableContext::new());
        assert!(results.is_empty());
    }

    #[test]
    fn synthesizes_status_code_assertion_from_expected_response() {
        let tc = test_case_with(Vec::new(), Some(ExpectedResponse { status_code: Some(200) }));
        let results = run_assertions(&tc, &ctx(200), &VariableContext::new());
        assert_eq!(results.len(), 1);
        assert!(results[0].passed);

        let results_fail = run_assertions(&tc, &ctx(404), &VariableContext::new());
        assert!(!results_fail[0].passed);
    }

    #[test]
    fn declared_assertions_take_precedence_over_expected_response() {
        let assertion = Assertion {
            assertion_type: AssertionType::StatusCode,
            target: None,
            condition: Condition::Equals,
            expected_value: Some(json!(201)),
        };
        let tc = test_case_with(vec![assertion], Some(ExpectedResponse { status_code: Some(200) }));
        let results = run_assertions(&tc, &ctx(201), &VariableContext::new());
        assert_eq!(results.len(), 1);
        assert!(results[0].passed);
    }
}
