//! HTTP client construction and response helpers.

use std::time::Duration;

use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::Client;

/// Sentinel stored instead of non textual response bodies.
pub const BINARY_BODY: &str = "<binary>";

/// Build a client with `timeout` applied to connecting and to the whole call.
pub fn build_client(timeout: Duration, ignore_tls: bool) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .danger_accept_invalid_certs(ignore_tls)
        .build()
}

/// Canonical `Title-Case` form of a header name: `x-request-id` becomes `X-Request-Id`.
pub fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Response headers as `(canonical name, values)` pairs in arrival order of names.
pub fn response_headers(headers: &HeaderMap) -> Vec<(String, Vec<String>)> {
    headers
        .keys()
        .map(|name| {
            let values = headers
                .get_all(name)
                .iter()
                .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
                .collect();
            (canonical_header_name(name.as_str()), values)
        })
        .collect()
}

/// True when a content type names a textual payload.
pub fn is_textual(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    mime.starts_with("text/")
        || mime.ends_with("json")
        || mime.ends_with("+xml")
        || mime.ends_with("/xml")
        || mime.ends_with("javascript")
        || mime == "application/x-www-form-urlencoded"
}

/// Body text to record for a response, given its headers and raw bytes.
pub fn recorded_body(headers: &HeaderMap, body: &[u8]) -> String {
    if body.is_empty() {
        return String::new();
    }
    let textual = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(is_textual);
    if textual {
        String::from_utf8_lossy(body).into_owned()
    } else {
        BINARY_BODY.to_string()
    }
}
