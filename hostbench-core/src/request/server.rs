//! Turning a call description into ambient server state, and back into an
//! HTTP request for routers.

use axum::{body::Bytes, http::Request};
use hostbench_contracts::DispatchRequest;
use hostbench_runtime::ServerState;
use url::{Url, form_urlencoded};

use super::{Call, PendingRequest};
use crate::error::{HarnessError, Result};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Builds the server state for `call` on top of `state`, which should be
/// the runtime's freshly reset state.
pub fn materialize(
    mut state: ServerState,
    call: &Call,
    url: &Url,
    pending: &PendingRequest,
) -> ServerState {
    let method = call.method.to_ascii_uppercase();
    let params_in_query = matches!(method.as_str(), "GET" | "HEAD");

    let mut url = url.clone();
    if params_in_query && !call.params.is_empty() {
        url.query_pairs_mut().extend_pairs(&call.params);
    }

    state.set_var("REQUEST_METHOD", method.as_str());
    let request_uri = match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    };
    state.set_var("REQUEST_URI", request_uri);
    state.set_var("QUERY_STRING", url.query().unwrap_or_default());

    let host = url.host_str().unwrap_or("localhost");
    state.set_var(
        "HTTP_HOST",
        match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        },
    );
    state.set_var("SERVER_NAME", host);
    if let Some(port) = url.port_or_known_default() {
        state.set_var("SERVER_PORT", port.to_string());
    }
    if url.scheme() == "https" {
        state.set_var("HTTPS", "on");
    } else {
        state.vars.remove("HTTPS");
    }

    state.query = url.query_pairs().into_owned().collect();

    for (name, value) in pending.headers.iter().chain(&call.headers) {
        state.set_header(name, value.clone());
    }
    if let Some(referrer) = &pending.referrer {
        state.set_header("Referer", referrer.clone());
    }

    state.cookies.extend(pending.cookies.iter().cloned());
    state.cookies.extend(call.cookies.iter().cloned());
    if !state.cookies.is_empty() {
        let header = state
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        state.set_header("Cookie", header);
    }

    for (key, value) in &call.server {
        state.set_var(key.clone(), value.clone());
    }

    match &call.raw_body {
        Some(raw) => {
            state.raw_body = raw.to_vec();
            let is_form = state
                .header("content-type")
                .is_some_and(|value| value.starts_with(FORM_CONTENT_TYPE));
            if is_form && !params_in_query {
                state.body = form_urlencoded::parse(raw).into_owned().collect();
            }
        }
        None if !params_in_query && !call.params.is_empty() => {
            state.body = call.params.iter().cloned().collect();
            state.raw_body = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&call.params)
                .finish()
                .into_bytes();
            if state.header("content-type").is_none() {
                state.set_header("Content-Type", FORM_CONTENT_TYPE);
            }
        }
        None => {}
    }
    if !state.raw_body.is_empty() && state.header("content-length").is_none() {
        let length = state.raw_body.len().to_string();
        state.set_header("Content-Length", length);
    }

    state.request = state.query.clone();
    state.request.extend(state.body.clone());
    state
}

/// The HTTP request a router sees for `state`.
pub fn to_http_request(state: &ServerState) -> Result<DispatchRequest> {
    let mut builder = Request::builder()
        .method(state.method())
        .uri(state.request_uri());
    for (name, value) in state.headers() {
        builder = builder.header(name, value);
    }
    builder
        .body(Bytes::from(state.raw_body.clone()))
        .map_err(|err| HarnessError::InvalidRequest(err.to_string()))
}
