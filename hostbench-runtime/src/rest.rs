//! REST layer.
//!
//! Routing to a handler is the runtime's job ([`HostRuntime::rest_dispatch`]);
//! turning the handler's result into output is the [`RestServer`]'s. The
//! server is swappable so a caller can record the result instead of emitting
//! it.

use std::{collections::BTreeMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    HostRuntime,
    render::{RenderOutcome, RoutePattern},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestRequest {
    pub method: String,
    pub route: String,
    /// Query, body and URL parameters, later sources winning.
    pub params: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    /// Decoded body when the request carried JSON.
    pub json: Option<Value>,
}

impl RestRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub data: Value,
}

impl RestResponse {
    pub fn new(status: u16, data: Value) -> Self {
        Self {
            status,
            headers: Vec::new(),
            data,
        }
    }

    pub fn ok(data: Value) -> Self {
        Self::new(200, data)
    }

    pub fn with_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn error(status: u16, code: &str, message: &str) -> Self {
        Self::new(
            status,
            json!({
                "code": code,
                "message": message,
                "data": { "status": status },
            }),
        )
    }

    pub fn no_route() -> Self {
        Self::error(
            404,
            "rest_no_route",
            "No route was found matching the URL and request method.",
        )
    }
}

pub type RestHandler =
    Arc<dyn Fn(&HostRuntime, &RestRequest) -> RestResponse + Send + Sync>;

#[derive(Clone)]
pub struct RestRoute {
    pub pattern: RoutePattern,
    pub methods: Vec<String>,
    pub handler: RestHandler,
}

impl RestRoute {
    pub fn allows(&self, method: &str) -> bool {
        self.methods
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(method))
    }
}

impl fmt::Debug for RestRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestRoute")
            .field("pattern", &self.pattern.as_str())
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}

/// Serves a REST request that routing has already resolved.
pub trait RestServer: Send + Sync {
    fn serve_request(
        &self,
        runtime: &HostRuntime,
        request: &RestRequest,
        sink: &mut Vec<u8>,
    ) -> RenderOutcome;
}

/// The stock server: sends status and headers, prints JSON, and halts.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmittingRestServer;

impl RestServer for EmittingRestServer {
    fn serve_request(
        &self,
        runtime: &HostRuntime,
        request: &RestRequest,
        sink: &mut Vec<u8>,
    ) -> RenderOutcome {
        let response = runtime.rest_dispatch(request);

        runtime.emit_status(response.status);
        runtime.emit_header("Content-Type", "application/json; charset=UTF-8");
        for (name, value) in &response.headers {
            runtime.emit_header(name, value);
        }
        match serde_json::to_vec(&response.data) {
            Ok(body) => sink.extend_from_slice(&body),
            Err(err) => {
                tracing::error!(error = %err, "failed to encode REST response");
            }
        }

        RenderOutcome::Halted
    }
}
