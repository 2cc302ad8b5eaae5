#![allow(dead_code)]

use std::sync::Arc;

use hostbench_runtime::{
    Database, HostRuntime, HttpTransport, OutboundRequest, OutboundResponse,
    Result, tags,
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

/// Runtime whose transport panics if anything reaches the network.
pub fn runtime() -> Arc<HostRuntime> {
    let mut transport = MockTransport::new();
    transport.expect_send().never();
    runtime_with(transport)
}

pub fn runtime_with(transport: MockTransport) -> Arc<HostRuntime> {
    HostRuntime::builder()
        .site_url("http://example.org")
        .transport(Arc::new(transport))
        .build()
        .expect("runtime")
}

pub async fn sqlite_runtime() -> Arc<HostRuntime> {
    let database = Database::connect("sqlite::memory:")
        .await
        .expect("sqlite connection");
    HostRuntime::builder()
        .database(database)
        .build()
        .expect("runtime")
}

/// Everything the runtime emitted through its status and header hooks.
#[derive(Debug, Default)]
pub struct Emitted {
    pub statuses: Vec<u16>,
    pub headers: Vec<(String, String)>,
}

pub fn record_emission(runtime: &HostRuntime) -> Arc<Mutex<Emitted>> {
    let emitted = Arc::new(Mutex::new(Emitted::default()));

    let sink = emitted.clone();
    runtime.hooks().add_filter(
        tags::STATUS_HEADER,
        "test_status",
        10,
        move |value, _| {
            if let Some(status) = value.as_u64() {
                sink.lock().statuses.push(status as u16);
            }
            value
        },
    );

    let sink = emitted.clone();
    runtime
        .hooks()
        .add_action(tags::SEND_HEADER, "test_header", 10, move |args| {
            let text = |value: &Value| value.as_str().unwrap_or_default().to_string();
            sink.lock().headers.push((text(&args[0]), text(&args[1])));
        });

    emitted
}

/// Points the ambient state at `uri` the way a dispatcher would.
pub fn point_at(runtime: &HostRuntime, method: &str, uri: &str) {
    runtime.update_server(|server| {
        server.set_var("REQUEST_METHOD", method);
        server.set_var("REQUEST_URI", uri);
        if let Some((_, query)) = uri.split_once('?') {
            server.set_var("QUERY_STRING", query);
            for pair in query.split('&') {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                server.query.insert(key.to_string(), value.to_string());
                server.request.insert(key.to_string(), value.to_string());
            }
        }
    });
}
