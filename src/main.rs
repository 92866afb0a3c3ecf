//! Run Coordinator (C8) and CLI entry point.
//!
//! The HTTP ingress described in the system's external interfaces
//! (`/upload`, `/generate-tests`, `/execute-tests`) is out of scope for this
//! crate — no web framework is wired up here. This binary instead reads the
//! same shape `/execute-tests` would accept (`{testCases, baseUrl,
//! globalHeaders?, globalVariables?}`) from a file or stdin, runs it through
//! the engine, and prints the resulting `TestRunResult` as JSON, so the
//! engine is directly exercisable without the surrounding service — mirroring
//! how the runner this crate started from was a standalone CLI in front of
//! the same kind of execution engine a future HTTP service would wrap.

mod errors;
mod executors;
mod extractors;
mod limits;
mod loader;
mod model;
mod planner;
mod runner;
mod telemetry;
mod validation;
mod variables;

use std::collections::HashMap;
use std::io::Read as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use model::{RunRequest, TestRunResult};

#[derive(Parser)]
#[command(name = "api-test-engine", about = "Dependency-aware execution engine for API test suites")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs a `RunRequest` document (`{testCases, baseUrl, globalHeaders?, globalVariables?}`).
    Execute {
        /// Path to the run request JSON file. Reads stdin if omitted.
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Writes the TestRunResult JSON here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Enables OpenTelemetry OTLP export in addition to console logging.
        #[arg(long)]
        otel: bool,

        #[arg(long)]
        otel_endpoint: Option<String>,
    },
    /// Parses raw LLM text into a validated test case array and prints it.
    ExtractTestCases {
        /// Path to a text file containing the LLM's raw output. Reads stdin if omitted.
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

fn read_input(file: &Option<PathBuf>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("failed to read stdin")?;
            Ok(buf)
        }
    }
}

/// Normalizes `base_url` to always end with `/`, per C8.
fn normalize_base_url(base_url: &str) -> String {
    if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{base_url}/")
    }
}

/// Drives C7 end to end for one run: validates the request, builds the
/// shared HTTP client, schedules and executes every test case, and
/// aggregates the results into a `TestRunResult`. Never panics on a
/// malformed request — a missing base URL or an empty test list surfaces as
/// per-test `Error` results rather than aborting (per §4.8's "never throws
/// to the caller").
async fn coordinate_run(request: RunRequest, settings: &limits::Settings, cancel: &CancellationToken) -> TestRunResult {
    let run_id = Uuid::new_v4().to_string();
    let start_time = chrono::Utc::now();

    let violations = validation::validate_run_request(&request);
    if !violations.is_empty() {
        for v in &violations {
            tracing::warn!(error = %v.user_message(), "run request rejected during validation");
        }
        let results = request
            .test_cases
            .iter()
            .map(|tc| {
                let mut result = model::TestCaseResult::pending(tc);
                result.status = model::Status::Error;
                result.error_message = Some(
                    violations
                        .iter()
                        .map(|v| v.user_message())
                        .collect::<Vec<_>>()
                        .join("; "),
                );
                result
            })
            .collect();

        return TestRunResult {
            run_id,
            base_url: request.base_url,
            start_time,
            end_time: chrono::Utc::now(),
            global_variables: request.global_variables,
            results,
        };
    }

    let limit_violations = limits::validate_run_limits(request.test_cases.len(), settings);
    for v in &limit_violations {
        tracing::warn!(message = %v.message, "run exceeds configured limits, proceeding anyway");
    }

    // Unknown/self prerequisites are per-edge warnings, not run-fatal: the
    // scheduler drops the bad edge and the affected test case still runs.
    for w in &validation::graph_warnings(&request) {
        tracing::warn!(error = %w.user_message(), "dropping invalid prerequisite edge");
    }

    let base_url = normalize_base_url(&request.base_url);
    let client = match limits::build_http_client(settings) {
        Ok(c) => c,
        Err(e) => {
            let results = request
                .test_cases
                .iter()
                .map(|tc| {
                    let mut result = model::TestCaseResult::pending(tc);
                    result.status = model::Status::Error;
                    result.error_message = Some(format!("failed to build HTTP client: {e}"));
                    result
                })
                .collect();
            return TestRunResult {
                run_id,
                base_url,
                start_time,
                end_time: chrono::Utc::now(),
                global_variables: request.global_variables,
                results,
            };
        }
    };

    let results = planner::run_schedule(
        &request.test_cases,
        &base_url,
        &request.global_headers,
        &request.global_variables,
        &client,
        settings,
        cancel,
    )
    .await;

    TestRunResult {
        run_id,
        base_url,
        start_time,
        end_time: chrono::Utc::now(),
        global_variables: request.global_variables,
        results,
    }
}

async fn run_execute(file: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let text = read_input(&file)?;
    let request: RunRequest = serde_json::from_str(&text).context("failed to parse run request JSON")?;

    let settings = limits::Settings::from_env();
    let cancel = CancellationToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("cancellation requested, stopping in-flight test cases");
            ctrl_c.cancel();
        }
    });

    let report = coordinate_run(request, &settings, &cancel).await;

    tracing::info!(
        run_id = %report.run_id,
        total = report.total(),
        passed = report.passed(),
        failed = report.failed(),
        skipped = report.skipped(),
        blocked = report.blocked(),
        errored = report.errored(),
        "run finished"
    );

    let json = serde_json::to_string_pretty(&report).context("failed to serialize run result")?;
    match output {
        Some(path) => std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }

    let exit_ok = report.failed() == 0 && report.errored() == 0 && report.blocked() == 0;
    if !exit_ok {
        std::process::exit(1);
    }

    Ok(())
}

fn run_extract_test_cases(file: Option<PathBuf>) -> Result<()> {
    let text = read_input(&file)?;
    let test_cases = loader::extract_test_cases(&text);
    let json: Value = serde_json::to_value(&test_cases).context("failed to serialize extracted test cases")?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry_config = telemetry::TelemetryConfig::from_env();
    let _tracer = telemetry::init_telemetry(telemetry_config).context("failed to initialize telemetry")?;

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Execute { file, output, otel: _, otel_endpoint: _ } => run_execute(file, output).await,
        Commands::ExtractTestCases { file } => run_extract_test_cases(file),
    };

    telemetry::shutdown_telemetry();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_base_url_without_trailing_slash() {
        assert_eq!(normalize_base_url("https://api.example.com"), "https://api.example.com/");
        assert_eq!(normalize_base_url("https://api.example.com/"), "https://api.example.com/");
    }

    #[tokio::test]
    async fn empty_base_url_surfaces_as_per_test_error_not_a_panic() {
        let request = RunRequest {
            test_cases: vec![model::TestCase {
                test_case_id: "a".to_string(),
                test_case_name: "a".to_string(),
                description: None,
                priority: model::Priority::Medium,
                tags: Vec::new(),
                prerequisites: Vec::new(),
                variables: HashMap::new(),
                authentication: None,
                request: model::Request {
                    method: model::Method::Get,
                    path: "/x".to_string(),
                    headers: HashMap::new(),
                    path_parameters: HashMap::new(),
                    query_parameters: HashMap::new(),
                    content_type: None,
                    body: None,
                    form_parameters: HashMap::new(),
                    file_parameters: Vec::new(),
                },
                expected_response: None,
                assertions: Vec::new(),
                extract_variables: Vec::new(),
                skip: false,
            }],
            base_url: String::new(),
            global_headers: HashMap::new(),
            global_variables: HashMap::new(),
        };

        let settings = limits::Settings::default();
        let cancel = CancellationToken::new();
        let report = coordinate_run(request, &settings, &cancel).await;

        assert_eq!(report.total(), 1);
        assert_eq!(report.errored(), 1);
    }

    #[tokio::test]
    async fn empty_test_list_yields_zero_totals() {
        let request = RunRequest {
            test_cases: Vec::new(),
            base_url: "https://api.example.com".to_string(),
            global_headers: HashMap::new(),
            global_variables: HashMap::new(),
        };
        let settings = limits::Settings::default();
        let cancel = CancellationToken::new();
        let report = coordinate_run(request, &settings, &cancel).await;
        assert_eq!(report.total(), 0);
    }
}
