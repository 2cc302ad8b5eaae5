use std::time::Duration;

use hostbench_runtime::{
    RenderOutcome, RestResponse, TOOLBAR_CALLBACK, tags,
};
use serde_json::{Value, json};

#[path = "support/mod.rs"]
mod support;

use support::{point_at, record_emission, runtime};

#[test]
fn unmatched_path_emits_not_found() {
    let runtime = runtime();
    let emitted = record_emission(&runtime);
    point_at(&runtime, "GET", "/missing");

    let mut sink = Vec::new();
    let outcome = runtime.render_request(&mut sink);

    assert_eq!(outcome, RenderOutcome::Rendered);
    assert!(sink.is_empty());
    assert_eq!(emitted.lock().statuses, vec![404]);
}

#[test]
fn legacy_route_renders_with_toolbar_appended() {
    let runtime = runtime();
    runtime.add_route("/hello/{name}", |cx| {
        let name = cx.query_var("name").unwrap_or_default();
        cx.write(format!("Hello, {name}!"));
        RenderOutcome::Rendered
    });
    point_at(&runtime, "GET", "/hello/ada");

    let mut sink = Vec::new();
    runtime.render_request(&mut sink);

    let body = String::from_utf8(sink).unwrap();
    assert!(body.starts_with("Hello, ada!"), "{body}");
    assert!(body.contains("wpadminbar"), "{body}");
    assert_eq!(
        runtime.request_cache().matched_route.as_deref(),
        Some("/hello/{name}")
    );
}

#[test]
fn removing_the_toolbar_callback_keeps_pages_clean() {
    let runtime = runtime();
    let priority = runtime
        .hooks()
        .priority_of(tags::FOOTER, TOOLBAR_CALLBACK)
        .unwrap();
    assert!(runtime.hooks().remove_filter(
        tags::FOOTER,
        TOOLBAR_CALLBACK,
        priority
    ));
    runtime.add_route("/", |cx| {
        cx.write("home");
        RenderOutcome::Rendered
    });
    point_at(&runtime, "GET", "/");

    let mut sink = Vec::new();
    runtime.render_request(&mut sink);
    assert_eq!(sink, b"home");
}

#[test]
fn redirect_stops_rendering_and_emits_location() {
    let runtime = runtime();
    let emitted = record_emission(&runtime);
    runtime.add_route("/old", |cx| {
        let outcome = cx.redirect("/new", 301);
        if outcome == RenderOutcome::Rendered {
            cx.write("not redirected");
        }
        outcome
    });
    point_at(&runtime, "GET", "/old");

    let mut sink = Vec::new();
    let outcome = runtime.render_request(&mut sink);

    assert_eq!(
        outcome,
        RenderOutcome::Redirected {
            location: "/new".into(),
            status: 301
        }
    );
    assert!(sink.is_empty());
    let emitted = emitted.lock();
    assert_eq!(emitted.statuses, vec![301]);
    assert!(
        emitted
            .headers
            .contains(&("Location".to_string(), "/new".to_string()))
    );
}

#[test]
fn falsy_redirect_location_cancels_the_redirect() {
    let runtime = runtime();
    runtime
        .hooks()
        .add_filter(tags::REDIRECT, "cancel", 10, |_, _| Value::Bool(false));

    assert_eq!(runtime.redirect("/elsewhere", 302), RenderOutcome::Rendered);
}

#[test]
fn rest_prefix_routes_to_the_rest_server() {
    let runtime = runtime();
    let emitted = record_emission(&runtime);
    runtime.register_rest_route("demo/v1", "/items/{id}", &["GET"], |_, req| {
        RestResponse::ok(json!({ "id": req.param("id") }))
            .with_header("X-Demo", "1")
    });
    point_at(&runtime, "GET", "/wp-json/demo/v1/items/42");

    let mut sink = Vec::new();
    let outcome = runtime.render_request(&mut sink);

    assert_eq!(outcome, RenderOutcome::Halted);
    let body: Value = serde_json::from_slice(&sink).unwrap();
    assert_eq!(body, json!({ "id": "42" }));
    assert_eq!(
        runtime.request_cache().rest_route.as_deref(),
        Some("/demo/v1/items/42")
    );
    let emitted = emitted.lock();
    assert_eq!(emitted.statuses, vec![200]);
    assert!(
        emitted
            .headers
            .iter()
            .any(|(name, value)| name == "X-Demo" && value == "1")
    );
}

#[test]
fn rest_route_query_parameter_is_honoured() {
    let runtime = runtime();
    runtime.register_rest_route("demo/v1", "/ping", &["GET"], |_, _| {
        RestResponse::ok(json!("pong"))
    });
    point_at(&runtime, "GET", "/?rest_route=/demo/v1/ping");

    let mut sink = Vec::new();
    runtime.render_request(&mut sink);
    assert_eq!(sink, br#""pong""#);
}

#[test]
fn wrong_method_is_no_route() {
    let runtime = runtime();
    runtime.register_rest_route("demo/v1", "/ping", &["POST"], |_, _| {
        RestResponse::ok(json!("pong"))
    });
    point_at(&runtime, "GET", "/wp-json/demo/v1/ping");

    let mut sink = Vec::new();
    runtime.render_request(&mut sink);
    let body: Value = serde_json::from_slice(&sink).unwrap();
    assert_eq!(body["code"], "rest_no_route");
}

#[test]
fn reset_request_state_is_idempotent() {
    let runtime = runtime();
    let baseline = runtime.server();

    point_at(&runtime, "POST", "/form?x=1");
    runtime.update_request_cache(|cache| {
        cache.queried_object = Some(json!({"id": 1}))
    });
    runtime.set_current_screen(Some("dashboard".into()));

    runtime.reset_request_state();
    let once = (runtime.server(), runtime.request_cache());
    runtime.reset_request_state();
    let twice = (runtime.server(), runtime.request_cache());

    assert_eq!(once, twice);
    assert_eq!(once.0, baseline);
    assert!(once.1.queried_object.is_none());
    assert_eq!(runtime.current_screen(), None);
}

#[test]
fn ambient_flags_round_trip() {
    let runtime = runtime();
    assert_eq!(runtime.time_limit(), Some(Duration::from_secs(30)));
    runtime.set_time_limit(None);
    assert_eq!(runtime.time_limit(), None);

    runtime.set_current_user(Some(7));
    assert_eq!(runtime.current_user(), Some(7));

    assert_eq!(runtime.home_url("/a/b"), "http://example.org/a/b");
}
