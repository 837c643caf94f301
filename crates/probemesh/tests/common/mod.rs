//! Helpers shared by the integration tests.
#![allow(dead_code)]

use probemesh::{Probe, ProbeRequest};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN: &str = "s3cr3t-t0k3n";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Dummy site: `/login` hands out a `TestToken` header, `/dashboard` wants it
/// back as `Authorization` and answers 401 otherwise.
pub async fn start_login_server() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).insert_header("TestToken", TOKEN))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/dashboard"))
        .and(header("Authorization", TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_string("welcome"))
        .mount(&server)
        .await;

    Mock::given(path("/dashboard"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(10)
        .mount(&server)
        .await;

    server
}

pub fn login_request() -> ProbeRequest {
    ProbeRequest::new("login")
        .path("'/login'")
        .success_if(r#"GetInt("probe.Local.req.login.resp.code") == 200"#)
}

pub fn dashboard_request() -> ProbeRequest {
    ProbeRequest::new("dashboard")
        .path("'/dashboard'")
        .success_if(r#"GetInt("probe.Local.req.dashboard.resp.code") == 200"#)
}

/// Two step probe carrying the login token into the dashboard call.
pub fn login_probe(base_url: &str) -> Probe {
    Probe::new("Local", "local-1", base_url)
        .with_request(login_request())
        .with_request(dashboard_request().header(
            "Authorization",
            r#"GetStringElem("probe.Local.req.login.resp.header.Testtoken", 0)"#,
        ))
}
