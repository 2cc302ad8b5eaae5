//! Ambient request state.
//!
//! The runtime never receives a request value. Everything it knows about the
//! current request is read from [`ServerState`], and everything it derives
//! while routing lands in [`RequestCache`].

use std::collections::BTreeMap;

use serde_json::Value;
use url::Url;

/// CGI-style environment standing in for an inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerState {
    /// `REQUEST_METHOD`, `REQUEST_URI`, `HTTP_*` and friends.
    pub vars: BTreeMap<String, String>,
    /// Parsed query string.
    pub query: BTreeMap<String, String>,
    /// Parsed form body.
    pub body: BTreeMap<String, String>,
    /// Query merged with body, body winning.
    pub request: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    pub raw_body: Vec<u8>,
}

impl ServerState {
    /// The state between requests: only the host identity is known.
    pub fn baseline(site: &Url) -> Self {
        let mut vars = BTreeMap::new();
        let host = host_with_port(site);
        vars.insert("HTTP_HOST".to_string(), host);
        vars.insert(
            "SERVER_NAME".to_string(),
            site.host_str().unwrap_or("localhost").to_string(),
        );
        vars.insert(
            "SERVER_PORT".to_string(),
            site.port_or_known_default().unwrap_or(80).to_string(),
        );
        vars.insert("SERVER_PROTOCOL".to_string(), "HTTP/1.1".to_string());
        if site.scheme() == "https" {
            vars.insert("HTTPS".to_string(), "on".to_string());
        }

        Self {
            vars,
            ..Self::default()
        }
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn set_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn method(&self) -> &str {
        self.var("REQUEST_METHOD").unwrap_or("GET")
    }

    /// Path plus query, as sent on the request line.
    pub fn request_uri(&self) -> &str {
        self.var("REQUEST_URI").unwrap_or("/")
    }

    pub fn path(&self) -> &str {
        let uri = self.request_uri();
        uri.split_once('?').map_or(uri, |(path, _)| path)
    }

    pub fn is_https(&self) -> bool {
        self.var("HTTPS")
            .is_some_and(|value| !value.is_empty() && value != "off")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.var(&header_key(name))
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.vars.insert(header_key(name), value.into());
    }

    /// Headers recovered from the environment, lower-cased.
    pub fn headers(&self) -> Vec<(String, String)> {
        self.vars
            .iter()
            .filter_map(|(key, value)| {
                header_name(key).map(|name| (name, value.clone()))
            })
            .collect()
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.request.get(name).map(String::as_str)
    }
}

/// Maps an HTTP header name to its environment key.
///
/// `Content-Type` and `Content-Length` are unprefixed, every other header
/// becomes `HTTP_UPPER_SNAKE`.
pub fn header_key(name: &str) -> String {
    let normalized = name.trim().to_ascii_uppercase().replace('-', "_");
    match normalized.as_str() {
        "CONTENT_TYPE" | "CONTENT_LENGTH" => normalized,
        _ => format!("HTTP_{normalized}"),
    }
}

/// Inverse of [`header_key`]; `None` for keys that are not headers.
pub fn header_name(key: &str) -> Option<String> {
    let raw = match key {
        "CONTENT_TYPE" | "CONTENT_LENGTH" => key,
        _ => key.strip_prefix("HTTP_")?,
    };
    Some(raw.to_ascii_lowercase().replace('_', "-"))
}

fn host_with_port(site: &Url) -> String {
    let host = site.host_str().unwrap_or("localhost");
    match site.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Values derived while resolving the current request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestCache {
    /// Pattern of the legacy route that matched.
    pub matched_route: Option<String>,
    /// Placeholders captured from the matched route.
    pub query_vars: BTreeMap<String, String>,
    /// Object the request resolved to, when a handler sets one.
    pub queried_object: Option<Value>,
    /// Set when the request was handed to the REST layer.
    pub rest_route: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_names_round_trip_through_environment_keys() {
        assert_eq!(header_key("X-Custom-Thing"), "HTTP_X_CUSTOM_THING");
        assert_eq!(header_key("content-type"), "CONTENT_TYPE");
        assert_eq!(header_name("HTTP_X_CUSTOM_THING").unwrap(), "x-custom-thing");
        assert_eq!(header_name("CONTENT_LENGTH").unwrap(), "content-length");
        assert_eq!(header_name("REQUEST_METHOD"), None);
    }

    #[test]
    fn baseline_carries_host_identity_only() {
        let site = Url::parse("https://example.org:8443/").unwrap();
        let state = ServerState::baseline(&site);

        assert_eq!(state.var("HTTP_HOST"), Some("example.org:8443"));
        assert_eq!(state.var("SERVER_NAME"), Some("example.org"));
        assert!(state.is_https());
        assert!(state.query.is_empty());
        assert!(state.body.is_empty());
        assert_eq!(state.method(), "GET");
        assert_eq!(state.request_uri(), "/");
    }

    #[test]
    fn path_strips_the_query_string() {
        let mut state = ServerState::default();
        state.set_var("REQUEST_URI", "/search/?s=rust");
        assert_eq!(state.path(), "/search/");
    }

    #[test]
    fn headers_are_recovered_from_vars() {
        let mut state = ServerState::default();
        state.set_header("Accept", "application/json");
        state.set_header("Content-Type", "text/plain");
        state.set_var("REQUEST_METHOD", "POST");

        let headers = state.headers();
        assert!(headers.contains(&("accept".into(), "application/json".into())));
        assert!(headers.contains(&("content-type".into(), "text/plain".into())));
        assert_eq!(headers.len(), 2);
    }
}
