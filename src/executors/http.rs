//! HTTP Request Builder (C5) and the single-attempt send that backs C6.
//!
//! This used to be one implementer of a plugin-style `StepExecutor` registry;
//! since every test case in this engine is an HTTP request, that dispatch
//! layer is gone (see [`crate::executors`]) and this module is a plain set of
//! functions instead.
//!
//! [`send_attempt`] owns exactly one HTTP exchange: build the request per the
//! C5 ordering rules, send it on the shared client, read and cap the body,
//! and hand back enough to let the caller run C3/C4. Retries, timing, and
//! status computation belong one layer up, in [`crate::runner`].

use std::collections::HashMap;

use base64::Engine;
use reqwest::{Client, Method as ReqwestMethod};
use serde_json::Value;

use crate::limits::{self, Settings};
use crate::model::{ApiKeyLocation, Authentication, FileParameter, Method, RequestEcho, ResponseEcho, TestCase};
use crate::variables::{self, VariableContext};

/// Why a single HTTP attempt failed to produce a response at all.
#[derive(Debug)]
pub enum AttemptError {
    /// DNS, connect, TLS, or timeout — retry-eligible per C6/§7.
    Transport(String),
    /// Malformed input this engine can't recover from on retry: a missing
    /// upload file, an unencodable body. Never retried.
    Configuration(String),
}

/// Everything [`crate::runner`] needs from one successful HTTP exchange to
/// run assertion evaluation and variable extraction.
pub struct AttemptOutcome {
    pub request_echo: RequestEcho,
    pub response_echo: ResponseEcho,
    pub body_json: Value,
    pub raw_body: String,
    pub headers_lower: HashMap<String, String>,
    pub duration_ms: u64,
}

fn to_reqwest_method(method: Method) -> ReqwestMethod {
    ReqwestMethod::from_bytes(method.as_str().as_bytes()).expect("Method variants are always valid HTTP methods")
}

fn lowercase_headers(map: &HashMap<String, String>) -> HashMap<String, String> {
    map.iter().map(|(k, v)| (k.to_lowercase(), v.clone())).collect()
}

/// Collapses a `reqwest::HeaderMap` into one string per header name, joining
/// repeated headers (e.g. multiple `Set-Cookie` lines) with `","`, per C3's
/// `HeaderValue` contract and C4's header-source extraction rule.
fn join_multi_valued_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for name in headers.keys() {
        if out.contains_key(name.as_str()) {
            continue;
        }
        let joined = headers
            .get_all(name)
            .iter()
            .map(|v| v.to_str().unwrap_or_default())
            .collect::<Vec<_>>()
            .join(",");
        out.insert(name.to_string(), joined);
    }
    out
}

/// Merges two header maps, `overlay` winning ties on a case-insensitive name
/// match, and drops any `Content-Type` entry — that is set on the content,
/// never copied in as a custom header (C5 step 4/6).
fn merge_headers(base: &HashMap<String, String>, overlay: &HashMap<String, String>) -> HashMap<String, String> {
    let mut merged: HashMap<String, (String, String)> = HashMap::new();
    for (k, v) in base {
        merged.insert(k.to_lowercase(), (k.clone(), v.clone()));
    }
    for (k, v) in overlay {
        merged.insert(k.to_lowercase(), (k.clone(), v.clone()));
    }
    merged
        .into_iter()
        .filter(|(lower, _)| lower != "content-type")
        .map(|(_, (original_case, v))| (original_case, v))
        .collect()
}

/// Expands every value in a template header/param map through C1.
fn expand_map(map: &HashMap<String, String>, vars: &VariableContext) -> HashMap<String, String> {
    map.iter().map(|(k, v)| (k.clone(), variables::expand(v, vars))).collect()
}

/// Substitutes `{name}` path placeholders with percent-encoded values,
/// after the whole path has already been run through C1.
fn substitute_path_parameters(path: &str, path_parameters: &HashMap<String, String>, vars: &VariableContext) -> String {
    let mut out = path.to_string();
    for (name, template) in path_parameters {
        let value = variables::expand(template, vars);
        let encoded = urlencoding::encode(&value);
        out = out.replace(&format!("{{{name}}}"), &encoded);
    }
    out
}

fn resolve_url(base_url: &str, path: &str) -> String {
    let base = if base_url.ends_with('/') { base_url.to_string() } else { format!("{base_url}/") };
    let relative = path.trim_start_matches('/');
    format!("{base}{relative}")
}

/// Applies authentication, producing headers to merge in and query
/// parameters to append, per C5 step 3 (auth is applied before per-test
/// headers so a test can still override).
fn apply_authentication(auth: &Authentication, vars: &VariableContext) -> (HashMap<String, String>, Vec<(String, String)>) {
    let mut headers = HashMap::new();
    let mut query = Vec::new();

    match auth {
        Authentication::None => {}
        Authentication::Basic { user, password } => {
            let user = variables::expand(user, vars);
            let password = variables::expand(password, vars);
            let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
            headers.insert("Authorization".to_string(), format!("Basic {encoded}"));
        }
        Authentication::Bearer { token } => {
            let token = variables::expand(token, vars);
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }
        Authentication::ApiKey { header_name, value, location } => {
            let header_name = variables::expand(header_name, vars);
            let value = variables::expand(value, vars);
            match location {
                ApiKeyLocation::Header => {
                    headers.insert(header_name, value);
                }
                ApiKeyLocation::Query => {
                    query.push((header_name, value));
                }
            }
        }
    }

    (headers, query)
}

/// Effective content type per C5 step 6: explicit wins, else multipart if
/// files are present, else form-urlencoded if form fields are present, else
/// JSON.
fn effective_content_type(test_case: &TestCase) -> String {
    let request = &test_case.request;
    if let Some(explicit) = &request.content_type {
        return explicit.clone();
    }
    if !request.file_parameters.is_empty() {
        return "multipart/form-data".to_string();
    }
    if !request.form_parameters.is_empty() {
        return "application/x-www-form-urlencoded".to_string();
    }
    "application/json".to_string()
}

fn load_file_bytes(file: &FileParameter, vars: &VariableContext) -> Result<Vec<u8>, AttemptError> {
    if let Some(b64) = &file.file_content_base64 {
        return base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| AttemptError::Configuration(format!("invalid base64 for file '{}': {e}", file.file_name)));
    }

    if let Some(path) = &file.file_path {
        let expanded = variables::expand(path, vars);
        return std::fs::read(&expanded)
            .map_err(|e| AttemptError::Configuration(format!("could not read upload file '{expanded}': {e}")));
    }

    Err(AttemptError::Configuration(format!(
        "file parameter '{}' has neither fileContentBase64 nor filePath",
        file.field_name
    )))
}

async fn build_body(
    test_case: &TestCase,
    content_type: &str,
    vars: &VariableContext,
) -> Result<reqwest::Body, AttemptError> {
    let request = &test_case.request;

    if content_type == "multipart/form-data" && !request.file_parameters.is_empty() {
        // The multipart body itself is attached by the caller via
        // `RequestBuilder::multipart`; this path is only reached for the
        // non-multipart encodings below.
        unreachable!("multipart bodies are built by the caller, not here");
    }

    if content_type == "application/x-www-form-urlencoded" && !request.form_parameters.is_empty() {
        let expanded = expand_map(&request.form_parameters, vars);
        let encoded = serde_urlencoded::to_string(&expanded)
            .map_err(|e| AttemptError::Configuration(format!("could not encode form parameters: {e}")))?;
        return Ok(reqwest::Body::from(encoded));
    }

    match &request.body {
        Some(Value::String(s)) => Ok(reqwest::Body::from(variables::expand(s, vars))),
        Some(other) => {
            let expanded = variables::expand_value(other, vars);
            let text = serde_json::to_string(&expanded)
                .map_err(|e| AttemptError::Configuration(format!("could not serialize request body: {e}")))?;
            Ok(reqwest::Body::from(text))
        }
        None => Ok(reqwest::Body::from(Vec::<u8>::new())),
    }
}

/// Builds and sends one HTTP attempt, per the C5 ordering rules:
/// 1. Expand path through C1, substitute path parameters, resolve against base URL.
/// 2. Append query parameters.
/// 3. Apply authentication (before per-test headers).
/// 4. Merge headers: globals, then auth, then per-test (per-test wins).
/// 5. Select the body by content type, only for methods that carry one.
/// 6. Send, read and cap the response body.
pub async fn send_attempt(
    client: &Client,
    settings: &Settings,
    base_url: &str,
    global_headers: &HashMap<String, String>,
    test_case: &TestCase,
    vars: &VariableContext,
) -> Result<AttemptOutcome, AttemptError> {
    let request = &test_case.request;

    let expanded_path = variables::expand(&request.path, vars);
    let path_with_params = substitute_path_parameters(&expanded_path, &request.path_parameters, vars);
    let mut url = resolve_url(base_url, &path_with_params);

    let (auth_headers, auth_query) = match &test_case.authentication {
        Some(auth) => apply_authentication(auth, vars),
        None => (HashMap::new(), Vec::new()),
    };

    let mut query_pairs: Vec<(String, String)> = request
        .query_parameters
        .iter()
        .map(|(k, v)| (k.clone(), variables::expand(v, vars)))
        .collect();
    query_pairs.sort_by(|a, b| a.0.cmp(&b.0));
    query_pairs.extend(auth_query);

    if !query_pairs.is_empty() {
        let encoded = serde_urlencoded::to_string(&query_pairs)
            .map_err(|e| AttemptError::Configuration(format!("could not encode query parameters: {e}")))?;
        url = format!("{url}?{encoded}");
    }

    let globals_expanded = expand_map(global_headers, vars);
    let per_test_expanded = expand_map(&request.headers, vars);
    let with_auth = merge_headers(&globals_expanded, &auth_headers);
    let effective_headers = merge_headers(&with_auth, &per_test_expanded);

    let content_type = effective_content_type(test_case);
    let carries_body = request.method.carries_body();

    let mut builder = client.request(to_reqwest_method(request.method), &url);
    for (name, value) in &effective_headers {
        builder = builder.header(name, value);
    }

    if carries_body {
        if content_type == "multipart/form-data" && !request.file_parameters.is_empty() {
            let mut form = reqwest::multipart::Form::new();
            for file in &request.file_parameters {
                let bytes = load_file_bytes(file, vars)?;
                let mut part = reqwest::multipart::Part::bytes(bytes).file_name(file.file_name.clone());
                if let Some(content_type) = &file.content_type {
                    part = part
                        .mime_str(content_type)
                        .map_err(|e| AttemptError::Configuration(format!("invalid content type '{content_type}': {e}")))?;
                }
                form = form.part(file.field_name.clone(), part);
            }
            builder = builder.multipart(form);
        } else {
            let body = build_body(test_case, &content_type, vars).await?;
            builder = builder.header(reqwest::header::CONTENT_TYPE, &content_type).body(body);
        }
    }

    let request_echo = RequestEcho {
        url: url.clone(),
        method: request.method.as_str().to_string(),
        headers: effective_headers,
        body_preview: request.body.as_ref().map(|b| variables::expand_value(b, vars).to_string()),
    };

    let started = std::time::Instant::now();
    let response = builder.send().await.map_err(|e| {
        if e.is_timeout() {
            AttemptError::Transport(format!("request timed out: {e}"))
        } else {
            AttemptError::Transport(format!("transport error: {e}"))
        }
    })?;

    let status_code = response.status().as_u16();
    let response_headers = join_multi_valued_headers(response.headers());

    let bytes = response.bytes().await.map_err(|e| AttemptError::Transport(format!("failed reading response body: {e}")))?;
    let (raw_body, truncated) = limits::cap_response_body(&bytes);
    if truncated {
        tracing::warn!(test_case_id = %test_case.test_case_id, "response body truncated to configured limit");
    }

    let duration_ms = started.elapsed().as_millis() as u64;
    let body_json: Value = serde_json::from_str(&raw_body).unwrap_or(Value::Null);
    let headers_lower = lowercase_headers(&response_headers);

    let response_echo = ResponseEcho { status_code, headers: response_headers, body: Some(raw_body.clone()) };

    Ok(AttemptOutcome {
        request_echo,
        response_echo,
        body_json,
        raw_body,
        headers_lower,
        duration_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApiKeyLocation, Authentication, Request};
    use std::collections::HashMap;

    fn vars() -> VariableContext {
        VariableContext::new()
    }

    #[test]
    fn resolves_url_against_normalized_base() {
        assert_eq!(resolve_url("https://api.example.com", "/users/42"), "https://api.example.com/users/42");
        assert_eq!(resolve_url("https://api.example.com/", "users/42"), "https://api.example.com/users/42");
    }

    #[test]
    fn substitutes_path_parameter_with_percent_encoding() {
        let mut params = HashMap::new();
        params.insert("id".to_string(), "a b".to_string());
        let out = substitute_path_parameters("/users/{id}", &params, &vars());
        assert_eq!(out, "/users/a%20b");
    }

    #[test]
    fn merge_headers_prefers_overlay_case_insensitively() {
        let mut base = HashMap::new();
        base.insert("X-Trace".to_string(), "global".to_string());
        let mut overlay = HashMap::new();
        overlay.insert("x-trace".to_string(), "override".to_string());
        let merged = merge_headers(&base, &overlay);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.values().next().unwrap(), "override");
    }

    #[test]
    fn merge_headers_never_carries_content_type() {
        let mut base = HashMap::new();
        base.insert("Content-Type".to_string(), "text/plain".to_string());
        let merged = merge_headers(&base, &HashMap::new());
        assert!(merged.is_empty());
    }

    #[test]
    fn join_multi_valued_headers_joins_repeated_header_with_comma() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.append(reqwest::header::SET_COOKIE, "a=1".parse().unwrap());
        headers.append(reqwest::header::SET_COOKIE, "b=2".parse().unwrap());
        let joined = join_multi_valued_headers(&headers);
        assert_eq!(joined.get("set-cookie"), Some(&"a=1,b=2".to_string()));
    }

    #[test]
    fn join_multi_valued_headers_passes_single_value_through() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::CONTENT_TYPE, "application/json".parse().unwrap());
        let joined = join_multi_valued_headers(&headers);
        assert_eq!(joined.get("content-type"), Some(&"application/json".to_string()));
    }

    #[test]
    fn bearer_auth_sets_authorization_header() {
        let auth = Authentication::Bearer { token: "abc123".to_string() };
        let (headers, query) = apply_authentication(&auth, &vars());
        assert_eq!(headers.get("Authorization"), Some(&"Bearer abc123".to_string()));
        assert!(query.is_empty());
    }

    #[test]
    fn api_key_in_query_location_amends_url_not_headers() {
        let auth = Authentication::ApiKey {
            header_name: "api_key".to_string(),
            value: "secret".to_string(),
            location: ApiKeyLocation::Query,
        };
        let (headers, query) = apply_authentication(&auth, &vars());
        assert!(headers.is_empty());
        assert_eq!(query, vec![("api_key".to_string(), "secret".to_string())]);
    }

    #[test]
    fn basic_auth_base64_encodes_user_and_password() {
        let auth = Authentication::Basic { user: "alice".to_string(), password: "wonderland".to_string() };
        let (headers, _) = apply_authentication(&auth, &vars());
        let expected = format!("Basic {}", base64::engine::general_purpose::STANDARD.encode("alice:wonderland"));
        assert_eq!(headers.get("Authorization"), Some(&expected));
    }

    #[test]
    fn effective_content_type_prefers_explicit() {
        let mut tc = sample_test_case();
        tc.request.content_type = Some("application/xml".to_string());
        assert_eq!(effective_content_type(&tc), "application/xml");
    }

    #[test]
    fn effective_content_type_infers_multipart_when_files_present() {
        let mut tc = sample_test_case();
        tc.request.file_parameters.push(FileParameter {
            field_name: "upload".to_string(),
            file_name: "a.txt".to_string(),
            file_content_base64: Some("aGVsbG8=".to_string()),
            file_path: None,
            content_type: None,
        });
        assert_eq!(effective_content_type(&tc), "multipart/form-data");
    }

    #[test]
    fn effective_content_type_infers_form_urlencoded() {
        let mut tc = sample_test_case();
        tc.request.form_parameters.insert("a".to_string(), "1".to_string());
        assert_eq!(effective_content_type(&tc), "application/x-www-form-urlencoded");
    }

    #[test]
    fn effective_content_type_defaults_to_json() {
        assert_eq!(effective_content_type(&sample_test_case()), "application/json");
    }

    fn sample_test_case() -> TestCase {
        TestCase {
            test_case_id: "t1".to_string(),
            test_case_name: "t1".to_string(),
            description: None,
            priority: crate::model::Priority::Medium,
            tags: Vec::new(),
            prerequisites: Vec::new(),
            variables: HashMap::new(),
            authentication: None,
            request: Request {
                method: Method::Post,
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
        }
    }
}
