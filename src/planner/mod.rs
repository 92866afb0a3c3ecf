//! Dependency Scheduler (C7).
//!
//! A genuine rewrite of the runner's earlier scheduler: that version polled a
//! shared `ready` queue every 10ms and treated "all dependencies terminally
//! resolved" as readiness. This spec calls for an explicit layered model
//! instead — Kahn's algorithm, one layer per round, `Blocked` as a first-class
//! terminal status for cycles rather than a side effect of polling forever.
//! The `Arc<_>` + `Semaphore` + bounded-worker-pool concurrency idiom carries
//! over; the readiness loop does not.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use reqwest::Client;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::limits::Settings;
use crate::model::{Status, TestCase, TestCaseResult};
use crate::runner;
use crate::variables::VariableContext;

/// A test case's dependency edges after unknown and self references have
/// been dropped — these are the only prerequisites that gate scheduling or
/// contribute to a dependent's variable context.
struct Graph {
    valid_prerequisites: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
    in_degree: HashMap<String, usize>,
}

fn build_graph(test_cases: &[TestCase]) -> Graph {
    let known_ids: HashSet<&str> = test_cases.iter().map(|tc| tc.test_case_id.as_str()).collect();

    let mut valid_prerequisites: HashMap<String, Vec<String>> = HashMap::new();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    let mut in_degree: HashMap<String, usize> = HashMap::new();

    for tc in test_cases {
        in_degree.entry(tc.test_case_id.clone()).or_insert(0);
        dependents.entry(tc.test_case_id.clone()).or_default();

        let mut kept = Vec::new();
        for prereq in &tc.prerequisites {
            if prereq == &tc.test_case_id {
                tracing::warn!(test_case_id = %tc.test_case_id, "dropping self-referential prerequisite");
                continue;
            }
            if !known_ids.contains(prereq.as_str()) {
                tracing::warn!(test_case_id = %tc.test_case_id, prerequisite = %prereq, "dropping unknown prerequisite");
                continue;
            }
            kept.push(prereq.clone());
        }

        for prereq in &kept {
            dependents.entry(prereq.clone()).or_default().push(tc.test_case_id.clone());
        }
        *in_degree.entry(tc.test_case_id.clone()).or_insert(0) += kept.len();
        valid_prerequisites.insert(tc.test_case_id.clone(), kept);
    }

    Graph { valid_prerequisites, dependents, in_degree }
}

/// Layers every test id into Kahn's-algorithm rounds, plus a terminal layer
/// (possibly empty) of ids that never reached in-degree zero — a cycle, or a
/// chain rooted in one.
fn layer_ids(test_cases: &[TestCase], graph: &Graph) -> (Vec<Vec<String>>, Vec<String>) {
    let input_order: Vec<String> = test_cases.iter().map(|tc| tc.test_case_id.clone()).collect();
    let mut in_degree = graph.in_degree.clone();
    let mut remaining: HashSet<String> = input_order.iter().cloned().collect();
    let mut layers = Vec::new();

    loop {
        let layer: Vec<String> = input_order
            .iter()
            .filter(|id| remaining.contains(*id) && in_degree.get(*id).copied().unwrap_or(0) == 0)
            .cloned()
            .collect();

        if layer.is_empty() {
            break;
        }

        for id in &layer {
            remaining.remove(id);
            for dependent in graph.dependents.get(id).into_iter().flatten() {
                if let Some(d) = in_degree.get_mut(dependent) {
                    *d = d.saturating_sub(1);
                }
            }
        }

        layers.push(layer);
    }

    let cycle_layer: Vec<String> = input_order.into_iter().filter(|id| remaining.contains(id)).collect();
    (layers, cycle_layer)
}

/// Assembles the variable context a test sees at run time: globals, then
/// each valid prerequisite's extracted variables in `Prerequisites`
/// declaration order (later wins), then the test's own `Variables`.
fn assemble_variable_context(
    test_case: &TestCase,
    valid_prereqs: &[String],
    global_variables: &HashMap<String, Value>,
    completed: &HashMap<String, TestCaseResult>,
) -> VariableContext {
    let mut ctx = VariableContext::from_map(global_variables.clone());

    for prereq_id in valid_prereqs {
        if let Some(prereq_result) = completed.get(prereq_id) {
            ctx.overlay(&prereq_result.extracted_variables);
        }
    }

    ctx.overlay(&test_case.variables);
    ctx
}

fn skipped_result(test_case: &TestCase) -> TestCaseResult {
    let mut result = TestCaseResult::pending(test_case);
    result.status = Status::Skipped;
    result.start_time = Some(chrono::Utc::now());
    result.end_time = result.start_time;
    result
}

fn blocked_result(test_case: &TestCase, message: &str) -> TestCaseResult {
    let mut result = TestCaseResult::pending(test_case);
    result.status = Status::Blocked;
    result.error_message = Some(message.to_string());
    result.start_time = Some(chrono::Utc::now());
    result.end_time = result.start_time;
    result
}

#[allow(clippy::too_many_arguments)]
async fn run_layer(
    layer: &[String],
    test_cases_by_id: &HashMap<String, TestCase>,
    graph: &Graph,
    base_url: &str,
    global_headers: &HashMap<String, String>,
    global_variables: &HashMap<String, Value>,
    completed: &HashMap<String, TestCaseResult>,
    client: &Client,
    settings: &Settings,
    cancel: &CancellationToken,
) -> Vec<(String, TestCaseResult)> {
    let semaphore = Arc::new(Semaphore::new(settings.max_degree_of_parallelism.max(1)));
    let mut handles = Vec::with_capacity(layer.len());

    for id in layer {
        let test_case = test_cases_by_id.get(id).expect("layer id always resolves to a known test case").clone();
        let valid_prereqs = graph.valid_prerequisites.get(id).cloned().unwrap_or_default();

        if test_case.skip {
            handles.push(tokio::spawn(async move { (test_case.test_case_id.clone(), skipped_result(&test_case)) }));
            continue;
        }

        let any_prereq_not_passed = valid_prereqs
            .iter()
            .any(|p| completed.get(p).map(|r| r.status != Status::Passed).unwrap_or(true));

        if any_prereq_not_passed {
            let message = "one or more prerequisites did not pass";
            handles.push(tokio::spawn(async move {
                let result = blocked_result(&test_case, message);
                (test_case.test_case_id.clone(), result)
            }));
            continue;
        }

        let vars = assemble_variable_context(&test_case, &valid_prereqs, global_variables, completed);
        let permit = semaphore.clone();
        let client = client.clone();
        let settings = settings.clone();
        let cancel = cancel.clone();
        let base_url = base_url.to_string();
        let global_headers = global_headers.clone();

        handles.push(tokio::spawn(async move {
            let _permit = permit.acquire_owned().await.expect("semaphore is never closed");
            let result = runner::run(&test_case, &base_url, &global_headers, &vars, &client, &settings, &cancel).await;
            (test_case.test_case_id.clone(), result)
        }));
    }

    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(pair) => out.push(pair),
            Err(e) => tracing::error!(error = %e, "test case task panicked"),
        }
    }
    out
}

/// Runs the full dependency-aware schedule for a run: builds the DAG, emits
/// Kahn's-algorithm layers, executes each layer with a bounded worker pool,
/// and returns results in scheduling order (layer index ascending, then
/// best-effort input order within a layer).
#[allow(clippy::too_many_arguments)]
pub async fn run_schedule(
    test_cases: &[TestCase],
    base_url: &str,
    global_headers: &HashMap<String, String>,
    global_variables: &HashMap<String, Value>,
    client: &Client,
    settings: &Settings,
    cancel: &CancellationToken,
) -> Vec<TestCaseResult> {
    let graph = build_graph(test_cases);
    let (layers, cycle_layer) = layer_ids(test_cases, &graph);
    let test_cases_by_id: HashMap<String, TestCase> =
        test_cases.iter().map(|tc| (tc.test_case_id.clone(), tc.clone())).collect();

    let mut completed: HashMap<String, TestCaseResult> = HashMap::new();
    let mut ordered_results = Vec::with_capacity(test_cases.len());

    for layer in &layers {
        let layer_results = run_layer(
            layer,
            &test_cases_by_id,
            &graph,
            base_url,
            global_headers,
            global_variables,
            &completed,
            client,
            settings,
            cancel,
        )
        .await;

        for (id, result) in layer_results {
            completed.insert(id, result.clone());
            ordered_results.push(result);
        }
    }

    if !cycle_layer.is_empty() {
        tracing::warn!(count = cycle_layer.len(), "tests never reached in-degree zero: circular dependency or missing prerequisite");
        for id in &cycle_layer {
            let test_case = test_cases_by_id.get(id).expect("cycle id always resolves to a known test case");
            ordered_results.push(blocked_result(test_case, "circular dependency or missing prerequisite"));
        }
    }

    ordered_results
}
