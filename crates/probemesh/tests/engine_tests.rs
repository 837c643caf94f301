//! End-to-end probe runs against a local dummy server.

mod common;

use std::time::Duration;

use common::{dashboard_request, login_probe, login_request, start_login_server, TOKEN};
use probemesh::{execute_probe, ExecuteOptions, Probe, ProbeContext, ProbeError, ProbeRequest, RunOutcome};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn options() -> ExecuteOptions {
    ExecuteOptions::new(5).ignore_schedule(true)
}

#[tokio::test]
async fn test_token_is_chained_into_next_request() {
    common::init_tracing();
    let server = start_login_server().await;
    let probe = login_probe(&server.uri());
    let mut ctx = ProbeContext::new();

    let outcome = execute_probe(&CancellationToken::new(), &probe, &mut ctx, &options()).await;
    assert_eq!(outcome.unwrap(), RunOutcome::Succeeded, "{ctx}");

    assert_eq!(ctx.get_string("probe").unwrap(), "Local");
    assert!(ctx.get_bool("probe.Local.success").unwrap());
    assert!(!ctx.get_bool("probe.Local.fail").unwrap());
    assert_eq!(ctx.get_string("probe.Local.req").unwrap(), "login,dashboard");
    assert_eq!(ctx.get_string_array("probe.Local.req.login.resp.header.Testtoken").unwrap().to_vec(), vec![TOKEN.to_string()]);
    assert_eq!(ctx.get_string_array("probe.Local.req.dashboard.header.Authorization").unwrap().to_vec(), vec![TOKEN.to_string()]);
    assert_eq!(ctx.get_int("probe.Local.req.dashboard.resp.code").unwrap(), 200);
    assert_eq!(ctx.get_string("probe.Local.req.dashboard.resp.body").unwrap(), "welcome");
    assert_eq!(ctx.get_int("probe.Local.req.dashboard.sequence").unwrap(), 1);
    assert!(ctx.get_time("probe.Local.endtime").unwrap() >= ctx.get_time("probe.Local.starttime").unwrap());
}

#[tokio::test]
async fn test_missing_authorization_fails_dashboard() {
    common::init_tracing();
    let server = start_login_server().await;
    let probe = Probe::new("Local", "local-1", server.uri())
        .with_request(login_request())
        .with_request(dashboard_request());
    let mut ctx = ProbeContext::new();

    let err = execute_probe(&CancellationToken::new(), &probe, &mut ctx, &options())
        .await
        .unwrap_err();
    assert!(matches!(err, ProbeError::SuccessCriteriaFalse { ref request, .. } if request == "dashboard"));
    assert!(err.is_decision());

    assert!(ctx.get_bool("probe.Local.req.login.success").unwrap());
    assert_eq!(ctx.get_int("probe.Local.req.dashboard.resp.code").unwrap(), 401);
    assert!(!ctx.get_bool("probe.Local.req.dashboard.success").unwrap());
    assert!(!ctx.get_bool("probe.Local.success").unwrap());
}

#[tokio::test]
async fn test_failed_request_stops_the_chain() {
    let server = start_login_server().await;
    let probe = Probe::new("Local", "local-1", server.uri())
        .with_request(dashboard_request())
        .with_request(login_request());
    let mut ctx = ProbeContext::new();

    assert!(execute_probe(&CancellationToken::new(), &probe, &mut ctx, &options()).await.is_err());
    assert!(!ctx.contains_key("probe.Local.req.login.sequence"));
}

#[tokio::test]
async fn test_post_body_and_fail_if() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .and(body_string("user=probe"))
        .respond_with(
            ResponseTemplate::new(500).set_body_raw(r#"{"status":"down"}"#, "application/json"),
        )
        .mount(&server)
        .await;

    let probe = Probe::new("Local", "local-1", server.uri()).with_request(
        ProbeRequest::new("submit")
            .method("'POST'")
            .path("'/submit'")
            .body("'user=probe'")
            .fail_if("probe.Local.req.submit.resp.code >= 500"),
    );
    let mut ctx = ProbeContext::new();

    let err = execute_probe(&CancellationToken::new(), &probe, &mut ctx, &options())
        .await
        .unwrap_err();
    assert!(matches!(err, ProbeError::FailCriteriaTrue { .. }));
    assert_eq!(ctx.get_string("probe.Local.req.submit.method").unwrap(), "POST");
    assert_eq!(ctx.get_string("probe.Local.req.submit.body").unwrap(), "user=probe");
    assert_eq!(ctx.get_string("probe.Local.req.submit.resp.body").unwrap(), r#"{"status":"down"}"#);
    assert_eq!(ctx.get_int("probe.Local.req.submit.resp.body.size").unwrap(), 17);
}

#[tokio::test]
async fn test_any_response_succeeds_without_criteria() {
    let server = MockServer::start().await;
    Mock::given(path("/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_raw(vec![0u8, 159, 146, 150], "image/png"))
        .mount(&server)
        .await;

    let probe = Probe::new("Local", "local-1", server.uri())
        .with_request(ProbeRequest::new("broken").path("'/broken'"));
    let mut ctx = ProbeContext::new();

    let outcome = execute_probe(&CancellationToken::new(), &probe, &mut ctx, &options()).await;
    assert_eq!(outcome.unwrap(), RunOutcome::Succeeded);
    assert_eq!(ctx.get_string("probe.Local.req.broken.resp.body").unwrap(), "<binary>");
    assert_eq!(ctx.get_int("probe.Local.req.broken.resp.body.size").unwrap(), 4);
}

#[tokio::test]
async fn test_cancellation_aborts_in_flight_call() {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let probe = Probe::new("Local", "local-1", server.uri())
        .with_request(ProbeRequest::new("slow").path("'/slow'"));
    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        })
    };
    let mut ctx = ProbeContext::new();

    let err = execute_probe(&cancel, &probe, &mut ctx, &options()).await.unwrap_err();
    canceller.await.unwrap();
    assert!(matches!(err, ProbeError::Cancelled { .. }));
    assert!(ctx.contains_key("probe.Local.req.slow.error"));
    assert!(ctx.contains_key("probe.Local.req.slow.duration"));
    assert!(!ctx.get_bool("probe.Local.success").unwrap());
}

#[tokio::test]
async fn test_broken_expression_is_a_configuration_error() {
    let server = start_login_server().await;
    let probe = Probe::new("Local", "local-1", server.uri())
        .with_request(ProbeRequest::new("login").path("'/login'").success_if("probe.Local.req.login.resp.code =="));
    let mut ctx = ProbeContext::new();

    let err = execute_probe(&CancellationToken::new(), &probe, &mut ctx, &options())
        .await
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(!err.is_decision());
    assert!(ctx.contains_key("probe.Local.req.login.error"));
}
