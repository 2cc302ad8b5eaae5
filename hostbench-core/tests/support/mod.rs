#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use hostbench_core::{HarnessConfig, TestSuite, telemetry::init_test_tracing};
use hostbench_runtime::{
    Database, HostRuntime, HttpTransport, OutboundRequest, OutboundResponse,
    Result,
};
use parking_lot::Mutex;
use serde_json::Value;

mockall::mock! {
    pub Transport {}

    #[async_trait::async_trait]
    impl HttpTransport for Transport {
        async fn send(
            &self,
            request: &OutboundRequest,
        ) -> Result<OutboundResponse>;
    }
}

/// Transport that fails the test if anything reaches the network.
pub fn offline() -> MockTransport {
    let mut transport = MockTransport::new();
    transport.expect_send().never();
    transport
}

pub fn runtime() -> Arc<HostRuntime> {
    runtime_with(offline())
}

pub fn runtime_with(transport: MockTransport) -> Arc<HostRuntime> {
    init_test_tracing();
    HostRuntime::builder()
        .site_url("http://example.org")
        .transport(Arc::new(transport))
        .build()
        .expect("runtime")
}

/// In-memory SQLite runtime with a `wp_posts` table carrying a unique slug.
pub async fn sqlite_runtime() -> Arc<HostRuntime> {
    init_test_tracing();
    let database = Database::connect("sqlite::memory:")
        .await
        .expect("sqlite connection");
    let runtime = HostRuntime::builder()
        .transport(Arc::new(offline()))
        .database(database)
        .build()
        .expect("runtime");

    runtime
        .db()
        .expect("database attached")
        .execute(
            "CREATE TABLE wp_posts (id INTEGER PRIMARY KEY, slug TEXT NOT NULL UNIQUE)",
        )
        .await
        .expect("schema");
    runtime
}

pub fn suite(runtime: Arc<HostRuntime>) -> TestSuite {
    TestSuite::new("integration", runtime, HarnessConfig::default())
}

/// Counts requests that reached the router.
#[derive(Debug, Clone, Default)]
pub struct Hits(Arc<Mutex<Vec<String>>>);

impl Hits {
    pub fn record(&self, path: &str) {
        self.0.lock().push(path.to_string());
    }

    pub fn paths(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

#[derive(Clone)]
struct AppState {
    runtime: Arc<HostRuntime>,
    hits: Hits,
}

/// A small application kernel:
///
/// - `GET /start` redirects to `/landing`
/// - `GET /landing` answers 200
/// - `GET /loop` redirects to itself
/// - `GET /a` redirects through `/b` and `/c` to `/d`, which answers 200
/// - `POST /submit` redirects to `GET /done`, which reports the body
///   headers and body length it received
/// - `POST /users` relays the JSON body to `https://api.test/users`
/// - `GET /echo` answers with the request's cookie and referer headers
pub fn app(runtime: Arc<HostRuntime>, hits: Hits) -> Router {
    Router::new()
        .route("/start", get(start))
        .route("/landing", get(landing))
        .route("/loop", get(looping))
        .route("/a", get(chain_a))
        .route("/b", get(chain_b))
        .route("/c", get(chain_c))
        .route("/d", get(chain_end))
        .route("/submit", post(submit))
        .route("/done", get(done))
        .route("/users", post(create_user))
        .route("/echo", get(echo))
        .with_state(AppState { runtime, hits })
}

async fn start(State(state): State<AppState>) -> Redirect {
    state.hits.record("/start");
    Redirect::to("/landing")
}

async fn landing(State(state): State<AppState>) -> &'static str {
    state.hits.record("/landing");
    "landed"
}

async fn looping(State(state): State<AppState>) -> Redirect {
    state.hits.record("/loop");
    Redirect::to("/loop")
}

async fn chain_a(State(state): State<AppState>) -> Redirect {
    state.hits.record("/a");
    Redirect::to("/b")
}

async fn chain_b(State(state): State<AppState>) -> Redirect {
    state.hits.record("/b");
    Redirect::to("/c")
}

async fn chain_c(State(state): State<AppState>) -> Redirect {
    state.hits.record("/c");
    Redirect::to("/d")
}

async fn chain_end(State(state): State<AppState>) -> &'static str {
    state.hits.record("/d");
    "end of chain"
}

async fn submit(State(state): State<AppState>, Json(_): Json<Value>) -> Redirect {
    state.hits.record("/submit");
    Redirect::to("/done")
}

async fn done(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> String {
    state.hits.record("/done");
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("-")
            .to_string()
    };
    format!(
        "ct={} cl={} body={}",
        value("content-type"),
        value("content-length"),
        body.len()
    )
}

async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Response {
    state.hits.record("/users");
    let request = match OutboundRequest::post("https://api.test/users").json(&payload) {
        Ok(request) => request,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    match state.runtime.http_request(request).await {
        Ok(upstream) => {
            let status =
                StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
            (
                status,
                [("content-type", "application/json")],
                upstream.body,
            )
                .into_response()
        }
        Err(err) => (StatusCode::BAD_GATEWAY, err.to_string()).into_response(),
    }
}

async fn echo(headers: axum::http::HeaderMap) -> String {
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("-")
            .to_string()
    };
    format!("cookie={} referer={}", value("cookie"), value("referer"))
}
