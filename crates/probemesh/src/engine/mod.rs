//! Probe execution engine.
//!
//! A probe run is `NotStarted -> ScheduleCheck -> {Skipped | Running} ->
//! {Succeeded | Failed}`. Requests run strictly in declared order because a
//! request may read what earlier requests recorded in the context. The first
//! failing request stops the chain.
//!
//! Recorded keys, for probe `P` and request `R`:
//!
//! | key | value |
//! |-----|-------|
//! | `probe` | name of the probe last run |
//! | `probe.P.id`, `.starttime`, `.endtime`, `.duration` | run metadata |
//! | `probe.P.req` | comma joined request names |
//! | `probe.P.success`, `probe.P.fail` | overall outcome |
//! | `probe.P.req.R.sequence`, `.canstart` | position and start gate |
//! | `probe.P.req.R.url`, `.method`, `.body` | resolved request |
//! | `probe.P.req.R.header`, `.header.<H>` | request header names and values |
//! | `probe.P.req.R.starttime`, `.duration` | call timing |
//! | `probe.P.req.R.resp.code` | status code |
//! | `probe.P.req.R.resp.header`, `.resp.header.<H>` | response headers, `Title-Case` names |
//! | `probe.P.req.R.resp.body`, `.resp.body.size` | response body |
//! | `probe.P.req.R.success`, `.fail`, `.error` | request outcome |

mod client;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::context::{probe_key, request_key, ContextValue, ProbeContext, PROBE_KEY};
use crate::error::ProbeError;
use crate::expr::{EvalError, Evaluator, Value, ValueKind};
use crate::probe::{Probe, ProbeRequest};
use crate::DEFAULT_TIMEOUT_SECONDS;

pub use client::{build_client, canonical_header_name, is_textual, BINARY_BODY};

/// Knobs for a single probe run.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Applied to connecting and to the overall call.
    pub timeout: Duration,
    /// Skip TLS certificate verification, for self-signed test targets.
    pub ignore_tls: bool,
    /// Run even when the schedule does not match now.
    pub ignore_schedule: bool,
    pub evaluator: Arc<Evaluator>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            ignore_tls: false,
            ignore_schedule: false,
            evaluator: Arc::new(Evaluator::new()),
        }
    }
}

impl ExecuteOptions {
    pub fn new(timeout_seconds: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_seconds),
            ..Default::default()
        }
    }

    pub fn ignore_tls(mut self, ignore: bool) -> Self {
        self.ignore_tls = ignore;
        self
    }

    pub fn ignore_schedule(mut self, ignore: bool) -> Self {
        self.ignore_schedule = ignore;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }
}

/// How a probe run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The schedule did not match; nothing ran.
    Skipped,
    Succeeded,
}

/// True when the probe's schedule matches the current time.
///
/// A probe whose schedule does not parse never starts.
pub fn can_start_by_schedule(probe: &Probe) -> bool {
    match probe.parsed_schedule() {
        Ok(schedule) => schedule.matches(&Utc::now()),
        Err(err) => {
            error!(probe = %probe.name, error = %err, "probe will never start, schedule is invalid");
            false
        }
    }
}

/// Run every request of `probe` in order, recording results into `ctx`.
pub async fn execute_probe(
    cancel: &CancellationToken,
    probe: &Probe,
    ctx: &mut ProbeContext,
    options: &ExecuteOptions,
) -> Result<RunOutcome, ProbeError> {
    if cancel.is_cancelled() {
        error!(probe = %probe.name, "cancelled before probe could start");
        return Err(ProbeError::Cancelled { probe: probe.name.clone() });
    }
    if !options.ignore_schedule && !can_start_by_schedule(probe) {
        trace!(probe = %probe.name, "schedule does not match, skipping");
        return Ok(RunOutcome::Skipped);
    }

    ctx.insert(PROBE_KEY, probe.name.as_str());
    ctx.insert(probe_key(&probe.name, "id"), probe.id.as_str());
    let start = Utc::now();
    ctx.insert(probe_key(&probe.name, "starttime"), start);
    ctx.insert(probe_key(&probe.name, "req"), probe.request_names());

    let result = run_chain(cancel, probe, ctx, options).await;

    let end = Utc::now();
    ctx.insert(probe_key(&probe.name, "endtime"), end);
    ctx.insert(probe_key(&probe.name, "duration"), end - start);

    let succeeded = result.is_ok();
    ctx.insert(probe_key(&probe.name, "success"), succeeded);
    ctx.insert(probe_key(&probe.name, "fail"), !succeeded);
    match &result {
        Ok(()) => debug!(probe = %probe.name, duration = ?(end - start), "probe succeeded"),
        Err(err) => error!(probe = %probe.name, error = %err, "probe failed"),
    }
    result.map(|()| RunOutcome::Succeeded)
}

async fn run_chain(
    cancel: &CancellationToken,
    probe: &Probe,
    ctx: &mut ProbeContext,
    options: &ExecuteOptions,
) -> Result<(), ProbeError> {
    for (sequence, request) in probe.requests.iter().enumerate() {
        execute_probe_request(cancel, probe, request, sequence, options, ctx).await?;
    }
    Ok(())
}

/// Everything needed to record one request's results under its keys.
struct RequestScope<'a> {
    probe: &'a str,
    request: &'a str,
}

impl RequestScope<'_> {
    fn key(&self, field: &str) -> String {
        request_key(self.probe, self.request, field)
    }

    fn record_error(&self, ctx: &mut ProbeContext, err: &impl std::fmt::Display) {
        ctx.insert(self.key("error"), ContextValue::Error(err.to_string()));
    }

    fn record_outcome(&self, ctx: &mut ProbeContext, success: bool) {
        ctx.insert(self.key("success"), success);
        ctx.insert(self.key("fail"), !success);
    }

    fn evaluation_error(&self, field: &str, source: EvalError) -> ProbeError {
        ProbeError::Evaluation {
            probe: self.probe.to_string(),
            request: self.request.to_string(),
            field: field.to_string(),
            source,
        }
    }

    fn invalid(&self, reason: String) -> ProbeError {
        ProbeError::InvalidRequest {
            probe: self.probe.to_string(),
            request: self.request.to_string(),
            reason,
        }
    }
}

fn eval_string(
    options: &ExecuteOptions,
    cancel: &CancellationToken,
    expression: &str,
    ctx: &ProbeContext,
) -> Result<Option<String>, EvalError> {
    Ok(match options.evaluator.evaluate_cancellable(expression, ctx, ValueKind::String, cancel)? {
        Some(Value::String(value)) => Some(value),
        _ => None,
    })
}

fn eval_bool(
    options: &ExecuteOptions,
    cancel: &CancellationToken,
    expression: &str,
    ctx: &ProbeContext,
) -> Result<Option<bool>, EvalError> {
    Ok(options
        .evaluator
        .evaluate_cancellable(expression, ctx, ValueKind::Bool, cancel)?
        .and_then(|value| value.as_bool()))
}

/// Execute one request of a probe's chain, recording results into `ctx`.
pub async fn execute_probe_request(
    cancel: &CancellationToken,
    probe: &Probe,
    request: &ProbeRequest,
    sequence: usize,
    options: &ExecuteOptions,
    ctx: &mut ProbeContext,
) -> Result<(), ProbeError> {
    let scope = RequestScope { probe: &probe.name, request: &request.name };

    if cancel.is_cancelled() {
        let err = ProbeError::Cancelled { probe: probe.name.clone() };
        scope.record_error(ctx, &err);
        error!(probe = %probe.name, request = %request.name, "cancelled before request could start");
        return Err(err);
    }
    ctx.insert(scope.key("sequence"), sequence);

    match eval_bool(options, cancel, &request.start_if, ctx) {
        Ok(Some(false)) => {
            trace!(probe = %probe.name, request = %request.name, expression = %request.start_if, "start condition is false");
            ctx.insert(scope.key("canstart"), false);
            return Err(ProbeError::StartConditionFalse {
                probe: probe.name.clone(),
                request: request.name.clone(),
            });
        }
        Err(source) => {
            error!(probe = %probe.name, request = %request.name, error = %source, "start condition could not be evaluated");
            ctx.insert(scope.key("canstart"), false);
            scope.record_error(ctx, &source);
            return Err(ProbeError::StartConditionEvaluation {
                probe: probe.name.clone(),
                request: request.name.clone(),
                source,
            });
        }
        Ok(_) => ctx.insert(scope.key("canstart"), true),
    }

    let http = build_client(options.timeout, options.ignore_tls).map_err(|source| {
        scope.record_error(ctx, &source);
        ProbeError::HttpClient {
            probe: probe.name.clone(),
            request: request.name.clone(),
            source,
        }
    })?;

    let outgoing = match build_request(&http, &scope, probe, request, options, cancel, ctx) {
        Ok(outgoing) => outgoing,
        Err(err) => {
            error!(probe = %probe.name, request = %request.name, error = %err, "request could not be prepared");
            scope.record_error(ctx, &err);
            return Err(err);
        }
    };

    let started = Utc::now();
    ctx.insert(scope.key("starttime"), started);
    trace!(probe = %probe.name, request = %request.name, url = %outgoing.url(), "calling http request");

    let response = tokio::select! {
        _ = cancel.cancelled() => {
            ctx.insert(scope.key("duration"), Utc::now() - started);
            let err = ProbeError::Cancelled { probe: probe.name.clone() };
            scope.record_error(ctx, &err);
            return Err(err);
        }
        response = http.execute(outgoing) => response,
    };
    let elapsed = Utc::now() - started;
    ctx.insert(scope.key("duration"), elapsed);
    trace!(probe = %probe.name, request = %request.name, elapsed = ?elapsed, "http call returned");

    let response = response.map_err(|source| {
        error!(probe = %probe.name, request = %request.name, error = %source, "http call failed");
        scope.record_error(ctx, &source);
        ProbeError::Transport {
            probe: probe.name.clone(),
            request: request.name.clone(),
            source,
        }
    })?;

    record_response(&scope, response, ctx).await;
    decide(&scope, request, options, cancel, ctx)
}

/// Resolve the url, method, body and headers of a request.
fn build_request(
    http: &reqwest::Client,
    scope: &RequestScope<'_>,
    probe: &Probe,
    request: &ProbeRequest,
    options: &ExecuteOptions,
    cancel: &CancellationToken,
    ctx: &mut ProbeContext,
) -> Result<reqwest::Request, ProbeError> {
    let path = eval_string(options, cancel, &request.path, ctx)
        .map_err(|source| scope.evaluation_error("path", source))?
        .unwrap_or_default();
    let url = format!("{}{}", probe.base_url, path);
    trace!(probe = %probe.name, request = %request.name, url = %url, "path evaluated");
    ctx.insert(scope.key("url"), url.as_str());

    let method = eval_string(options, cancel, &request.method, ctx)
        .map_err(|source| scope.evaluation_error("method", source))?
        .unwrap_or_else(|| Method::GET.to_string());
    ctx.insert(scope.key("method"), method.as_str());

    let body = eval_string(options, cancel, &request.body, ctx)
        .map_err(|source| scope.evaluation_error("body", source))?;
    if let Some(body) = &body {
        ctx.insert(scope.key("body"), body.as_str());
    }

    let mut headers = HeaderMap::new();
    if !request.headers.is_empty() {
        let names: Vec<&str> = request.headers.keys().map(String::as_str).collect();
        ctx.insert(scope.key("header"), names);
    }
    for (name, expressions) in &request.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| scope.invalid(format!("header name {name}: {err}")))?;
        let mut values = Vec::with_capacity(expressions.len());
        for expression in expressions {
            let value = eval_string(options, cancel, expression, ctx)
                .map_err(|source| scope.evaluation_error(&format!("header {name}"), source))?
                .unwrap_or_default();
            trace!(probe = %probe.name, request = %request.name, header = %name, value = %value, "header evaluated");
            let header_value = HeaderValue::from_str(&value)
                .map_err(|err| scope.invalid(format!("header {name} value: {err}")))?;
            headers.append(header_name.clone(), header_value);
            values.push(value);
        }
        ctx.insert(scope.key(&format!("header.{name}")), values);
    }

    let url = Url::parse(&url).map_err(|err| scope.invalid(format!("url {url}: {err}")))?;
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|err| scope.invalid(format!("method {method}: {err}")))?;

    let mut builder = http.request(method, url).headers(headers);
    if let Some(body) = body {
        builder = builder.body(body);
    }
    builder.build().map_err(|err| scope.invalid(err.to_string()))
}

/// Record status, headers and body. A body that cannot be read is recorded as empty.
async fn record_response(scope: &RequestScope<'_>, response: reqwest::Response, ctx: &mut ProbeContext) {
    let status = response.status();
    ctx.insert(scope.key("resp.code"), status.as_u16());
    trace!(probe = %scope.probe, request = %scope.request, status = status.as_u16(), "http response received");

    let headers = response.headers().clone();
    let collected = client::response_headers(&headers);
    if !collected.is_empty() {
        let names: Vec<String> = collected.iter().map(|(name, _)| name.clone()).collect();
        ctx.insert(scope.key("resp.header"), names);
        for (name, values) in collected {
            ctx.insert(scope.key(&format!("resp.header.{name}")), values);
        }
    }

    match response.bytes().await {
        Ok(body) => {
            ctx.insert(scope.key("resp.body.size"), body.len());
            ctx.insert(scope.key("resp.body"), client::recorded_body(&headers, &body));
        }
        Err(err) => {
            warn!(probe = %scope.probe, request = %scope.request, error = %err, "response body could not be read, treating as empty");
            ctx.insert(scope.key("resp.body.size"), 0usize);
            ctx.insert(scope.key("resp.body"), "");
        }
    }
}

/// Apply success-if, else fail-if, else succeed on any response.
fn decide(
    scope: &RequestScope<'_>,
    request: &ProbeRequest,
    options: &ExecuteOptions,
    cancel: &CancellationToken,
    ctx: &mut ProbeContext,
) -> Result<(), ProbeError> {
    let names = || (scope.probe.to_string(), scope.request.to_string());

    let (criteria, expression, fail_when) = if !request.success_if.trim().is_empty() {
        ("success-if", &request.success_if, false)
    } else if !request.fail_if.trim().is_empty() {
        ("fail-if", &request.fail_if, true)
    } else {
        scope.record_outcome(ctx, true);
        return Ok(());
    };

    match eval_bool(options, cancel, expression, ctx) {
        Ok(Some(value)) if value != fail_when => {
            scope.record_outcome(ctx, true);
            Ok(())
        }
        Ok(_) => {
            error!(probe = %scope.probe, request = %scope.request, criteria, expression = %expression, "criteria decided the request failed");
            scope.record_outcome(ctx, false);
            let (probe, request) = names();
            Err(if fail_when {
                ProbeError::FailCriteriaTrue { probe, request }
            } else {
                ProbeError::SuccessCriteriaFalse { probe, request }
            })
        }
        Err(source) => {
            error!(probe = %scope.probe, request = %scope.request, criteria, error = %source, "criteria could not be evaluated");
            scope.record_outcome(ctx, false);
            scope.record_error(ctx, &source);
            let (probe, request) = names();
            Err(ProbeError::CriteriaEvaluation { probe, request, criteria, source })
        }
    }
}
