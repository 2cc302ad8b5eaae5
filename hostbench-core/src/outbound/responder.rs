use std::{collections::VecDeque, fmt, sync::Arc};

use hostbench_runtime::{OutboundFailure, OutboundRequest, OutboundResponse};
use parking_lot::Mutex;

/// Error code returned when a sequence runs dry.
pub const SEQUENCE_EXHAUSTED: &str = "sequence_exhausted";

/// One answer to an outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Respond(OutboundResponse),
    Fail(OutboundFailure),
}

impl From<OutboundResponse> for Reply {
    fn from(response: OutboundResponse) -> Self {
        Self::Respond(response)
    }
}

impl From<OutboundFailure> for Reply {
    fn from(failure: OutboundFailure) -> Self {
        Self::Fail(failure)
    }
}

/// Responses handed out one per call, first in first out.
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    queue: VecDeque<Reply>,
    when_empty: Option<Reply>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, response: OutboundResponse) -> Self {
        self.queue.push_back(Reply::Respond(response));
        self
    }

    pub fn push_status(self, status: u16) -> Self {
        self.push(OutboundResponse::new(status))
    }

    pub fn push_failure(mut self, failure: OutboundFailure) -> Self {
        self.queue.push_back(Reply::Fail(failure));
        self
    }

    /// Served for every call after the queue is drained.
    pub fn when_empty(mut self, reply: impl Into<Reply>) -> Self {
        self.when_empty = Some(reply.into());
        self
    }

    /// Serve an empty 200 once the queue is drained instead of failing.
    pub fn dont_fail_when_empty(self) -> Self {
        self.when_empty(OutboundResponse::ok())
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn next(&mut self, url: &str) -> Reply {
        self.queue
            .pop_front()
            .or_else(|| self.when_empty.clone())
            .unwrap_or_else(|| {
                Reply::Fail(OutboundFailure::new(
                    SEQUENCE_EXHAUSTED,
                    format!("A request was made to {url}, but the response sequence is empty."),
                ))
            })
    }
}

impl FromIterator<OutboundResponse> for Sequence {
    fn from_iter<I: IntoIterator<Item = OutboundResponse>>(iter: I) -> Self {
        Self {
            queue: iter.into_iter().map(Reply::Respond).collect(),
            when_empty: None,
        }
    }
}

pub type ReplyFn = Arc<dyn Fn(&OutboundRequest) -> Reply + Send + Sync>;
/// Raw callback; `None` means the call is not for this stub.
pub type RawFn =
    Arc<dyn Fn(&str, &OutboundRequest) -> Option<Reply> + Send + Sync>;

/// How a stub produces its reply.
#[derive(Clone)]
pub enum Responder {
    Static(Reply),
    Sequence(Arc<Mutex<Sequence>>),
    Callback(ReplyFn),
    Raw(RawFn),
}

impl Responder {
    /// The stub's reply, or `None` when a raw callback declines the call.
    ///
    /// Callbacks run without any harness lock held.
    pub fn respond(&self, request: &OutboundRequest) -> Option<Reply> {
        match self {
            Self::Static(reply) => Some(reply.clone()),
            Self::Sequence(sequence) => Some(sequence.lock().next(&request.url)),
            Self::Callback(callback) => Some(callback(request)),
            Self::Raw(callback) => callback(&request.url, request),
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(reply) => f.debug_tuple("Static").field(reply).finish(),
            Self::Sequence(sequence) => f
                .debug_struct("Sequence")
                .field("remaining", &sequence.lock().len())
                .finish(),
            Self::Callback(_) => f.write_str("Callback"),
            Self::Raw(_) => f.write_str("Raw"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(reply: Reply) -> u16 {
        match reply {
            Reply::Respond(response) => response.status,
            Reply::Fail(failure) => panic!("unexpected failure {failure:?}"),
        }
    }

    #[test]
    fn sequence_is_fifo_then_fails() {
        let mut sequence = Sequence::new().push_status(200).push_status(400);
        assert_eq!(status(sequence.next("u")), 200);
        assert_eq!(status(sequence.next("u")), 400);
        match sequence.next("https://api.test/x") {
            Reply::Fail(failure) => {
                assert_eq!(failure.code, SEQUENCE_EXHAUSTED);
                assert!(failure.message.contains("https://api.test/x"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn fallback_is_served_after_the_queue() {
        let mut sequence = Sequence::new()
            .push_status(201)
            .when_empty(OutboundResponse::new(204));
        assert_eq!(status(sequence.next("u")), 201);
        assert_eq!(status(sequence.next("u")), 204);
        assert_eq!(status(sequence.next("u")), 204);
    }
}
