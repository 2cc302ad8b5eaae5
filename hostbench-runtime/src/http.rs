//! Outbound HTTP made by code running inside the runtime.
//!
//! Every call passes through the `pre_http_request` filter first. A callback
//! may answer with a response object (the call never leaves the process), with
//! `{"error": {"code", "message"}}` (the call fails), or leave the default
//! `false` in place, in which case the [`HttpTransport`] performs it.

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{Result, RuntimeError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Write the response body to `filename` instead of returning it.
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub filename: Option<PathBuf>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl OutboundRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            stream: false,
            filename: None,
            timeout_secs: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn header(
        mut self,
        name: impl AsRef<str>,
        value: impl Into<String>,
    ) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn json<T: Serialize + ?Sized>(self, payload: &T) -> Result<Self> {
        let encoded = serde_json::to_string(payload)?;
        Ok(self.header("content-type", "application/json").body(encoded))
    }

    pub fn stream_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stream = true;
        self.filename = Some(path.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs());
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundResponse {
    pub status: u16,
    /// Lower-cased names; repeated headers are joined with `", "`.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
    /// Where the body went when the request was streamed to disk.
    #[serde(default)]
    pub filename: Option<PathBuf>,
}

impl Default for OutboundResponse {
    fn default() -> Self {
        Self::new(200)
    }
}

impl OutboundResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: String::new(),
            filename: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self::ok()
            .with_header("content-type", "text/plain")
            .with_body(body)
    }

    pub fn json<T: Serialize + ?Sized>(payload: &T) -> Result<Self> {
        Ok(Self::ok()
            .with_header("content-type", "application/json")
            .with_body(serde_json::to_string(payload)?))
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(
        mut self,
        name: impl AsRef<str>,
        value: impl Into<String>,
    ) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn json_body<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Error object a `pre_http_request` callback returns to fail a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFailure {
    pub code: String,
    pub message: String,
}

impl OutboundFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn into_filter_value(self) -> Value {
        serde_json::json!({ "error": self })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ShortCircuit {
    Failure { error: OutboundFailure },
    Response(OutboundResponse),
}

/// Interprets the value returned by the `pre_http_request` filter.
///
/// `Ok(None)` means nobody claimed the call.
pub(crate) fn decode_short_circuit(
    url: &str,
    value: Value,
) -> Result<Option<OutboundResponse>> {
    match value {
        Value::Bool(false) | Value::Null => Ok(None),
        other => match serde_json::from_value::<ShortCircuit>(other)? {
            ShortCircuit::Response(response) => Ok(Some(response)),
            ShortCircuit::Failure { error } => {
                Err(RuntimeError::HttpShortCircuit {
                    url: url.to_string(),
                    code: error.code,
                    message: error.message,
                })
            }
        },
    }
}

/// Performs outbound calls nobody short-circuited.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> Result<OutboundResponse>;
}

/// Real network transport.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<OutboundResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| {
                RuntimeError::InvalidRequest(format!(
                    "unsupported HTTP method {}",
                    request.method
                ))
            })?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = request.timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        let bytes = response.bytes().await?;
        let mut outbound = OutboundResponse {
            status,
            headers,
            body: String::new(),
            filename: None,
        };

        match (&request.filename, request.stream) {
            (Some(path), true) => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(path, &bytes).await?;
                outbound.filename = Some(path.clone());
            }
            _ => outbound.body = String::from_utf8_lossy(&bytes).into_owned(),
        }

        Ok(outbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_filter_value_leaves_the_call_alone() {
        assert!(decode_short_circuit("u", Value::Bool(false)).unwrap().is_none());
        assert!(decode_short_circuit("u", Value::Null).unwrap().is_none());
    }

    #[test]
    fn response_object_short_circuits() {
        let value = serde_json::to_value(
            OutboundResponse::text("hi").with_status(202),
        )
        .unwrap();
        let response = decode_short_circuit("u", value).unwrap().unwrap();
        assert_eq!(response.status, 202);
        assert_eq!(response.body, "hi");
    }

    #[test]
    fn error_object_fails_the_call_with_its_url() {
        let value =
            OutboundFailure::new("stray_request", "blocked").into_filter_value();
        let err = decode_short_circuit("https://api.test/x", value).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("https://api.test/x"), "{message}");
        assert!(message.contains("stray_request"), "{message}");
    }

    #[test]
    fn malformed_short_circuit_is_a_serialization_error() {
        let err = decode_short_circuit("u", json!({"nope": true})).unwrap_err();
        assert!(matches!(err, RuntimeError::Serialization(_)));
    }

    #[test]
    fn request_builder_lowercases_header_names() {
        let request = OutboundRequest::post("https://api.test/users")
            .json(&json!({"name": "Ada"}))
            .unwrap()
            .header("X-Trace", "1");

        assert_eq!(request.method, "POST");
        assert_eq!(request.header_value("x-trace"), Some("1"));
        assert_eq!(request.header_value("Content-Type"), Some("application/json"));
        assert_eq!(request.body.as_deref(), Some(r#"{"name":"Ada"}"#));
    }
}
