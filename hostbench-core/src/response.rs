//! Captured responses.

use axum::{
    body::Bytes,
    http::{HeaderMap, HeaderName, HeaderValue, Response, header},
};
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::error::{HarnessError, Result};

const REDIRECT_STATUSES: [u16; 6] = [201, 301, 302, 303, 307, 308];

/// Status, headers and body of one simulated request.
///
/// Never mutated once built. The JSON view of the body is decoded at most
/// once.
#[derive(Debug)]
pub struct CapturedResponse {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
    json: OnceCell<std::result::Result<Value, String>>,
}

impl Clone for CapturedResponse {
    fn clone(&self) -> Self {
        Self::new(self.status, self.headers.clone(), self.body.clone())
    }
}

impl CapturedResponse {
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            json: OnceCell::new(),
        }
    }

    /// Builds a header map from emitted `(name, value)` pairs, in order.
    /// Pairs that are not valid HTTP are skipped with a warning.
    pub fn from_emitted(
        status: u16,
        emitted: &[(String, String)],
        body: impl Into<Bytes>,
    ) -> Self {
        let mut headers = HeaderMap::new();
        for (name, value) in emitted {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!(%name, %value, "dropping malformed header"),
            }
        }
        Self::new(status, headers, body)
    }

    pub fn from_http(response: Response<Bytes>) -> Self {
        let (parts, body) = response.into_parts();
        Self::new(parts.status.as_u16(), parts.headers, body)
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of `name`, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    pub fn header_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.header(name).unwrap_or(default)
    }

    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_redirect(&self) -> bool {
        REDIRECT_STATUSES.contains(&self.status)
    }

    pub fn is_redirect_to(&self, location: &str) -> bool {
        self.is_redirect() && self.header(header::LOCATION.as_str()) == Some(location)
    }

    pub fn location(&self) -> Option<&str> {
        self.header(header::LOCATION.as_str())
    }

    pub fn json(&self) -> Result<&Value> {
        self.json
            .get_or_init(|| {
                serde_json::from_slice(&self.body).map_err(|err| err.to_string())
            })
            .as_ref()
            .map_err(|err| HarnessError::InvalidJson(err.clone()))
    }

    pub fn json_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.json()?.clone())?)
    }

    /// Whether every needle occurs, each one after the end of the previous.
    pub fn see_in_order(&self, needles: &[&str]) -> bool {
        let text = self.text();
        let mut cursor = 0;
        for needle in needles {
            match text[cursor..].find(needle) {
                Some(offset) => cursor += offset + needle.len(),
                None => return false,
            }
        }
        true
    }

    // Assertions

    #[track_caller]
    pub fn assert_status(&self, expected: u16) -> &Self {
        assert_eq!(
            self.status, expected,
            "expected status {expected}, got {}; body: {}",
            self.status,
            self.text()
        );
        self
    }

    #[track_caller]
    pub fn assert_ok(&self) -> &Self {
        self.assert_status(200)
    }

    #[track_caller]
    pub fn assert_not_found(&self) -> &Self {
        self.assert_status(404)
    }

    #[track_caller]
    pub fn assert_redirect(&self, location: Option<&str>) -> &Self {
        assert!(
            self.is_redirect(),
            "expected a redirect, got status {}",
            self.status
        );
        if let Some(expected) = location {
            assert_eq!(
                self.location(),
                Some(expected),
                "redirect went somewhere else"
            );
        }
        self
    }

    #[track_caller]
    pub fn assert_header(&self, name: &str, expected: Option<&str>) -> &Self {
        let actual = self.header(name);
        assert!(actual.is_some(), "header {name} is missing");
        if let Some(expected) = expected {
            assert_eq!(actual, Some(expected), "header {name} differs");
        }
        self
    }

    #[track_caller]
    pub fn assert_header_missing(&self, name: &str) -> &Self {
        assert!(
            self.header(name).is_none(),
            "header {name} is present: {:?}",
            self.header(name)
        );
        self
    }

    #[track_caller]
    pub fn assert_see(&self, needle: &str) -> &Self {
        assert!(
            self.text().contains(needle),
            "{needle:?} not found in body: {}",
            self.text()
        );
        self
    }

    #[track_caller]
    pub fn assert_dont_see(&self, needle: &str) -> &Self {
        assert!(
            !self.text().contains(needle),
            "{needle:?} unexpectedly found in body"
        );
        self
    }

    #[track_caller]
    pub fn assert_see_in_order(&self, needles: &[&str]) -> &Self {
        assert!(
            self.see_in_order(needles),
            "{needles:?} not found in order in body: {}",
            self.text()
        );
        self
    }

    /// `pointer` is a JSON pointer such as `/data/0/id`.
    #[track_caller]
    pub fn assert_json_path(&self, pointer: &str, expected: Value) -> &Self {
        let json = match self.json() {
            Ok(json) => json,
            Err(err) => panic!("{err}"),
        };
        assert_eq!(
            json.pointer(pointer),
            Some(&expected),
            "JSON at {pointer} differs; body: {json}"
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn html(body: &str) -> CapturedResponse {
        CapturedResponse::from_emitted(
            200,
            &[("Content-Type".into(), "text/html".into())],
            body.to_string(),
        )
    }

    #[test]
    fn headers_are_case_insensitive_and_multi_valued() {
        let response = CapturedResponse::from_emitted(
            200,
            &[
                ("Set-Cookie".into(), "a=1".into()),
                ("set-cookie".into(), "b=2".into()),
                ("Bad Header".into(), "x".into()),
            ],
            "",
        );
        assert_eq!(response.header("SET-COOKIE"), Some("a=1"));
        assert_eq!(response.header_values("set-cookie"), vec!["a=1", "b=2"]);
        assert_eq!(response.header_or("x-missing", "none"), "none");
        assert_eq!(response.headers().len(), 2);
    }

    #[test]
    fn redirect_statuses_include_created() {
        let mut headers = HeaderMap::new();
        headers.insert(header::LOCATION, HeaderValue::from_static("/next"));
        let response = CapturedResponse::new(201, headers, "");
        assert!(response.is_redirect());
        assert!(response.is_redirect_to("/next"));
        assert!(!response.is_redirect_to("/other"));
        assert!(!html("").is_redirect());
    }

    #[test]
    fn see_in_order_uses_a_moving_cursor() {
        let response = html("<h1>One</h1><p>Two</p><p>Three</p>");
        assert!(response.see_in_order(&["One", "Two", "Three"]));
        assert!(!response.see_in_order(&["Two", "One"]));
        assert!(!response.see_in_order(&["Three", "Three"]));
        response.assert_see_in_order(&["<h1>", "</p>", "</p>"]);
    }

    #[test]
    fn json_is_decoded_once_and_typed_on_demand() {
        let response = html(r#"{"id":1,"name":"Ada"}"#);
        let first = response.json().unwrap() as *const Value;
        let second = response.json().unwrap() as *const Value;
        assert_eq!(first, second);

        #[derive(serde::Deserialize)]
        struct User {
            id: u64,
        }
        assert_eq!(response.json_as::<User>().unwrap().id, 1);
        response.assert_json_path("/name", json!("Ada"));
    }

    #[test]
    fn invalid_json_is_an_error() {
        let response = html("<html>");
        assert!(matches!(response.json(), Err(HarnessError::InvalidJson(_))));
    }

    #[test]
    #[should_panic(expected = "expected status 404")]
    fn status_assertion_reports_the_mismatch() {
        html("ok").assert_not_found();
    }
}
