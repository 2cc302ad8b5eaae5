//! Faking and recording of outbound HTTP calls.
//!
//! [`OutboundFake`] sits on the runtime's `pre_http_request` filter at the
//! last priority. Stubs are tried in registration order and the first one
//! that answers wins. Calls nobody answers are handled by the
//! [`StrayPolicy`].

pub mod matcher;
pub mod responder;
pub mod stream;

use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Utc};
use hostbench_runtime::{
    HostRuntime, OutboundFailure, OutboundRequest, OutboundResponse,
    PRIORITY_LAST, tags,
};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

pub use matcher::{StubMatcher, UrlPattern};
pub use responder::{Reply, Responder, SEQUENCE_EXHAUSTED, Sequence};

use crate::config::StrayMode;

/// Error code for calls refused by [`StrayPolicy::Deny`].
pub const STRAY_REQUEST: &str = "stray_request";
/// Error code for streamed fakes that could not be written.
pub const STREAM_FAILED: &str = "stream_failed";

/// What happens to a call no stub answers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StrayPolicy {
    /// The real call proceeds and is reported at tear-down.
    #[default]
    Allow,
    /// The call is answered with this response.
    DenyWithDefault(OutboundResponse),
    /// The call fails with an error naming its URL.
    Deny,
}

impl From<StrayMode> for StrayPolicy {
    fn from(mode: StrayMode) -> Self {
        match mode {
            StrayMode::Allow => Self::Allow,
            StrayMode::Deny => Self::Deny,
        }
    }
}

/// How a recorded call was answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// A stub responded.
    Faked { status: u16 },
    /// A stub, or a sequence running dry, failed the call.
    Failed { code: String, message: String },
    /// No stub matched and the call went out for real.
    Stray,
    /// No stub matched; the stray default answered.
    Defaulted { status: u16 },
    /// No stub matched and the call was refused.
    Denied,
    /// An earlier filter had already answered the call.
    Preempted,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub at: DateTime<Utc>,
    pub request: OutboundRequest,
    pub outcome: CallOutcome,
}

impl RecordedCall {
    /// Unfaked and sent for real. Denied and defaulted calls already
    /// answered at call time, so they are not strays.
    pub fn is_stray(&self) -> bool {
        self.outcome == CallOutcome::Stray
    }
}

#[derive(Debug, Clone)]
struct Stub {
    matcher: StubMatcher,
    responder: Responder,
}

#[derive(Debug, Default)]
struct FakeState {
    stubs: Vec<Stub>,
    policy: StrayPolicy,
    log: Vec<RecordedCall>,
    installed: bool,
}

/// Registry of outbound fakes plus a log of every call seen.
///
/// Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct OutboundFake {
    id: String,
    state: Arc<Mutex<FakeState>>,
}

impl Default for OutboundFake {
    fn default() -> Self {
        Self::new(StrayPolicy::default())
    }
}

impl OutboundFake {
    pub fn new(policy: StrayPolicy) -> Self {
        Self {
            id: format!("outbound_fake_{}", Uuid::new_v4().simple()),
            state: Arc::new(Mutex::new(FakeState {
                policy,
                ..FakeState::default()
            })),
        }
    }

    /// Filter id on `pre_http_request`.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn install(&self, runtime: &HostRuntime) {
        {
            let mut state = self.state.lock();
            if state.installed {
                return;
            }
            state.installed = true;
        }

        let fake = self.clone();
        runtime.hooks().add_filter(
            tags::PRE_HTTP_REQUEST,
            self.id.clone(),
            PRIORITY_LAST,
            move |value, args| fake.intercept(value, args),
        );
        debug!(id = %self.id, "outbound fake installed");
    }

    /// Removes the filter and returns the stray calls seen while installed.
    pub fn uninstall(&self, runtime: &HostRuntime) -> Vec<RecordedCall> {
        runtime
            .hooks()
            .remove_filter(tags::PRE_HTTP_REQUEST, &self.id, PRIORITY_LAST);
        self.state.lock().installed = false;
        self.stray_calls()
    }

    // Stub registration

    pub fn fake(&self, pattern: &str, response: OutboundResponse) -> &Self {
        self.push(
            StubMatcher::new(None, UrlPattern::new(pattern)),
            Responder::Static(Reply::Respond(response)),
        )
    }

    pub fn fake_method(
        &self,
        method: &str,
        pattern: &str,
        response: OutboundResponse,
    ) -> &Self {
        self.push(
            StubMatcher::new(Some(method), UrlPattern::new(pattern)),
            Responder::Static(Reply::Respond(response)),
        )
    }

    /// Fails every matching call with `failure`.
    pub fn fake_failure(&self, pattern: &str, failure: OutboundFailure) -> &Self {
        self.push(
            StubMatcher::new(None, UrlPattern::new(pattern)),
            Responder::Static(Reply::Fail(failure)),
        )
    }

    pub fn fake_sequence(&self, pattern: &str, sequence: Sequence) -> &Self {
        self.push(
            StubMatcher::new(None, UrlPattern::new(pattern)),
            Responder::Sequence(Arc::new(Mutex::new(sequence))),
        )
    }

    pub fn fake_with<F>(&self, pattern: &str, callback: F) -> &Self
    where
        F: Fn(&OutboundRequest) -> OutboundResponse + Send + Sync + 'static,
    {
        self.push(
            StubMatcher::new(None, UrlPattern::new(pattern)),
            Responder::Callback(Arc::new(move |request: &OutboundRequest| {
                Reply::Respond(callback(request))
            })),
        )
    }

    /// Raw callback over every call; returning `None` passes the call on to
    /// later stubs.
    pub fn fake_fn<F>(&self, callback: F) -> &Self
    where
        F: Fn(&str, &OutboundRequest) -> Option<OutboundResponse>
            + Send
            + Sync
            + 'static,
    {
        self.push(
            StubMatcher::any(),
            Responder::Raw(Arc::new(move |url: &str, request: &OutboundRequest| {
                callback(url, request).map(Reply::Respond)
            })),
        )
    }

    fn push(&self, matcher: StubMatcher, responder: Responder) -> &Self {
        debug!(stub = %matcher.describe(), "outbound stub registered");
        self.state.lock().stubs.push(Stub { matcher, responder });
        self
    }

    // Policy

    pub fn set_stray_policy(&self, policy: StrayPolicy) -> &Self {
        self.state.lock().policy = policy;
        self
    }

    pub fn prevent_stray_requests(&self) -> &Self {
        self.set_stray_policy(StrayPolicy::Deny)
    }

    pub fn allow_stray_requests(&self) -> &Self {
        self.set_stray_policy(StrayPolicy::Allow)
    }

    pub fn stray_policy(&self) -> StrayPolicy {
        self.state.lock().policy.clone()
    }

    /// Drops stubs and the call log.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.stubs.clear();
        state.log.clear();
    }

    // Inspection

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.state.lock().log.clone()
    }

    /// Calls that went out unfaked, first occurrence per method and URL.
    pub fn stray_calls(&self) -> Vec<RecordedCall> {
        let mut seen = HashSet::new();
        self.state
            .lock()
            .log
            .iter()
            .filter(|call| call.is_stray())
            .filter(|call| {
                seen.insert((call.request.method.clone(), call.request.url.clone()))
            })
            .cloned()
            .collect()
    }

    #[track_caller]
    pub fn assert_sent(&self, predicate: impl Fn(&OutboundRequest) -> bool) {
        let log = self.recorded();
        assert!(
            log.iter().any(|call| predicate(&call.request)),
            "expected a matching outbound request; {} recorded: {:?}",
            log.len(),
            summarize(&log)
        );
    }

    #[track_caller]
    pub fn assert_not_sent(&self, predicate: impl Fn(&OutboundRequest) -> bool) {
        let log = self.recorded();
        let hits: Vec<_> = log
            .iter()
            .filter(|call| predicate(&call.request))
            .cloned()
            .collect();
        assert!(
            hits.is_empty(),
            "unexpected outbound request(s): {:?}",
            summarize(&hits)
        );
    }

    #[track_caller]
    pub fn assert_sent_count(&self, expected: usize) {
        let log = self.recorded();
        assert_eq!(
            log.len(),
            expected,
            "expected {expected} outbound request(s), recorded: {:?}",
            summarize(&log)
        );
    }

    #[track_caller]
    pub fn assert_nothing_sent(&self) {
        self.assert_sent_count(0);
    }

    // Interception

    fn intercept(&self, value: Value, args: &[Value]) -> Value {
        let Some(request) = args
            .first()
            .and_then(|raw| serde_json::from_value::<OutboundRequest>(raw.clone()).ok())
        else {
            warn!("pre_http_request fired without a request; ignoring");
            return value;
        };

        if !matches!(value, Value::Bool(false) | Value::Null) {
            self.record(request, CallOutcome::Preempted);
            return value;
        }

        let stubs = self.state.lock().stubs.clone();
        let reply = stubs
            .iter()
            .filter(|stub| stub.matcher.matches(&request.method, &request.url))
            .find_map(|stub| stub.responder.respond(&request));

        match reply {
            Some(Reply::Respond(response)) => self.answer(request, response, false),
            Some(Reply::Fail(failure)) => {
                let outcome = CallOutcome::Failed {
                    code: failure.code.clone(),
                    message: failure.message.clone(),
                };
                self.record(request, outcome);
                failure.into_filter_value()
            }
            None => self.stray(request),
        }
    }

    fn answer(
        &self,
        request: OutboundRequest,
        response: OutboundResponse,
        defaulted: bool,
    ) -> Value {
        let response = match (&request.filename, request.stream) {
            (Some(path), true) => match stream::stream_to_file(response, path) {
                Ok(response) => response,
                Err(err) => {
                    let failure = OutboundFailure::new(
                        STREAM_FAILED,
                        format!("Could not write {}: {err}", path.display()),
                    );
                    let outcome = CallOutcome::Failed {
                        code: failure.code.clone(),
                        message: failure.message.clone(),
                    };
                    self.record(request, outcome);
                    return failure.into_filter_value();
                }
            },
            _ => response,
        };

        let outcome = if defaulted {
            CallOutcome::Defaulted {
                status: response.status,
            }
        } else {
            CallOutcome::Faked {
                status: response.status,
            }
        };
        self.record(request, outcome);

        match serde_json::to_value(&response) {
            Ok(value) => value,
            Err(err) => OutboundFailure::new("fake_encoding", err.to_string())
                .into_filter_value(),
        }
    }

    fn stray(&self, request: OutboundRequest) -> Value {
        let policy = self.stray_policy();
        match policy {
            StrayPolicy::Allow => {
                self.record(request, CallOutcome::Stray);
                Value::Bool(false)
            }
            StrayPolicy::DenyWithDefault(response) => {
                self.answer(request, response, true)
            }
            StrayPolicy::Deny => {
                let failure = OutboundFailure::new(
                    STRAY_REQUEST,
                    format!(
                        "Attempted request to [{}] without a matching fake.",
                        request.url
                    ),
                );
                self.record(request, CallOutcome::Denied);
                failure.into_filter_value()
            }
        }
    }

    fn record(&self, request: OutboundRequest, outcome: CallOutcome) {
        debug!(method = %request.method, url = %request.url, ?outcome, "outbound call");
        self.state.lock().log.push(RecordedCall {
            at: Utc::now(),
            request,
            outcome,
        });
    }
}

fn summarize(calls: &[RecordedCall]) -> Vec<String> {
    calls
        .iter()
        .map(|call| format!("{} {}", call.request.method, call.request.url))
        .collect()
}
