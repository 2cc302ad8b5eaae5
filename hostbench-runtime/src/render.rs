//! The legacy "resolve route from globals and render" entry point.

use std::{collections::BTreeMap, fmt, sync::Arc};

use serde_json::Value;

use crate::HostRuntime;

/// How a render pass ended.
///
/// A redirect is a value rather than an early exit, so the caller decides
/// what to do with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Output was written to the sink.
    Rendered,
    /// The handler asked for a redirect; nothing after it ran.
    Redirected { location: String, status: u16 },
    /// The response was emitted in full and the host would stop here.
    Halted,
}

pub type RouteHandler =
    Arc<dyn Fn(&mut RenderContext<'_>) -> RenderOutcome + Send + Sync>;

/// Path pattern with `{name}` placeholders, matched segment by segment.
/// Leading and trailing slashes are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

impl RoutePattern {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let segments = split_path(&raw)
            .map(|segment| {
                match segment
                    .strip_prefix('{')
                    .and_then(|rest| rest.strip_suffix('}'))
                {
                    Some(name) => Segment::Param(name.to_string()),
                    None => Segment::Literal(segment.to_string()),
                }
            })
            .collect();
        Self { raw, segments }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Captured placeholders when `path` matches.
    pub fn matches(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let parts: Vec<&str> = split_path(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut captures = BTreeMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    captures.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(captures)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

#[derive(Clone)]
pub struct LegacyRoute {
    pub pattern: RoutePattern,
    pub handler: RouteHandler,
}

impl fmt::Debug for LegacyRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyRoute")
            .field("pattern", &self.pattern.as_str())
            .finish_non_exhaustive()
    }
}

/// What a route handler sees while rendering.
///
/// Status and headers are never stored here: they go straight out through
/// the runtime's emission hooks, the same way the host would send them.
pub struct RenderContext<'a> {
    runtime: &'a HostRuntime,
    sink: &'a mut Vec<u8>,
}

impl<'a> RenderContext<'a> {
    pub(crate) fn new(runtime: &'a HostRuntime, sink: &'a mut Vec<u8>) -> Self {
        Self { runtime, sink }
    }

    pub fn runtime(&self) -> &HostRuntime {
        self.runtime
    }

    pub fn status(&mut self, status: u16) {
        self.runtime.emit_status(status);
    }

    pub fn header(&mut self, name: &str, value: &str) {
        self.runtime.emit_header(name, value);
    }

    pub fn write(&mut self, chunk: impl AsRef<[u8]>) {
        self.sink.extend_from_slice(chunk.as_ref());
    }

    pub fn redirect(&mut self, location: &str, status: u16) -> RenderOutcome {
        self.runtime.redirect(location, status)
    }

    pub fn method(&self) -> String {
        self.runtime.server().method().to_string()
    }

    pub fn query_var(&self, name: &str) -> Option<String> {
        self.runtime.request_cache().query_vars.get(name).cloned()
    }

    /// A query or body parameter, body winning.
    pub fn param(&self, name: &str) -> Option<String> {
        self.runtime.server().param(name).map(str::to_string)
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.runtime.server().cookies.get(name).cloned()
    }

    pub fn set_queried_object(&mut self, object: Value) {
        self.runtime
            .update_request_cache(|cache| cache.queried_object = Some(object));
    }
}

impl fmt::Debug for RenderContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("buffered", &self.sink.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_patterns_ignore_surrounding_slashes() {
        let pattern = RoutePattern::new("/about/");
        assert!(pattern.matches("/about").is_some());
        assert!(pattern.matches("about/").is_some());
        assert!(pattern.matches("/about/team").is_none());
    }

    #[test]
    fn placeholders_capture_segments() {
        let pattern = RoutePattern::new("/posts/{slug}/comments/{id}");
        let captures = pattern.matches("/posts/hello/comments/7/").unwrap();
        assert_eq!(captures["slug"], "hello");
        assert_eq!(captures["id"], "7");
        assert!(pattern.matches("/posts/hello/replies/7").is_none());
    }

    #[test]
    fn root_pattern_matches_only_root() {
        let pattern = RoutePattern::new("/");
        assert!(pattern.matches("/").is_some());
        assert!(pattern.matches("").is_some());
        assert!(pattern.matches("/x").is_none());
    }
}
