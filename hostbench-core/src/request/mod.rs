//! Simulated inbound requests.
//!
//! A [`Dispatcher`] rewrites the runtime's ambient state to look like a real
//! request, routes it either through a bound [`AppRouter`] or the runtime's
//! own rendering, and captures what came out as a [`CapturedResponse`].
//! Headers, cookies and the referrer set on the dispatcher apply to the next
//! call only.

pub mod interceptors;
pub mod server;
pub mod spy;

use std::{fmt, sync::Arc};

use axum::body::Bytes;
use hostbench_contracts::{AppRouter, RequestTarget};
use hostbench_runtime::{HostRuntime, RenderOutcome, RestServer};
use serde::Serialize;
use tracing::{debug, instrument};
use url::Url;

pub use interceptors::{CallInterceptors, Emitted};
pub use spy::SpyServer;

use crate::{
    config::DEFAULT_MAX_REDIRECTS,
    error::{HarnessError, Result},
    response::CapturedResponse,
};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Callback run after every captured response.
pub type AfterRequest = Box<dyn Fn(&CapturedResponse) + Send + Sync>;

/// Headers that describe a request body.
const BODY_HEADERS: [&str; 2] = ["content-type", "content-length"];

/// One-shot request decorations, cleared by the call that uses them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingRequest {
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub referrer: Option<String>,
    pub follow_redirects: bool,
}

impl PendingRequest {
    /// The decorations a bodiless redirect hop keeps.
    pub fn for_redirect(&self) -> Self {
        Self {
            headers: self
                .headers
                .iter()
                .filter(|(name, _)| {
                    !BODY_HEADERS.iter().any(|body| name.eq_ignore_ascii_case(body))
                })
                .cloned()
                .collect(),
            ..self.clone()
        }
    }
}

/// A single request to simulate.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: String,
    pub target: RequestTarget,
    /// Headers for this call only, applied after the pending ones. Redirect
    /// hops never see them.
    pub headers: Vec<(String, String)>,
    /// Query parameters for GET and HEAD, form fields otherwise.
    pub params: Vec<(String, String)>,
    /// Raw overrides for server variables, applied last.
    pub server: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub raw_body: Option<Bytes>,
}

impl Call {
    pub fn new(method: &str, target: impl Into<RequestTarget>) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            target: target.into(),
            headers: Vec::new(),
            params: Vec::new(),
            server: Vec::new(),
            cookies: Vec::new(),
            raw_body: None,
        }
    }
}

/// Issues simulated requests against one runtime.
pub struct Dispatcher {
    runtime: Arc<HostRuntime>,
    pending: PendingRequest,
    router: Option<Arc<dyn AppRouter>>,
    after_request: Vec<AfterRequest>,
    max_redirects: Option<usize>,
    spy: Arc<SpyServer>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending", &self.pending)
            .field("router", &self.router.is_some())
            .field("after_request", &self.after_request.len())
            .field("max_redirects", &self.max_redirects)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(runtime: Arc<HostRuntime>) -> Self {
        Self {
            runtime,
            pending: PendingRequest::default(),
            router: None,
            after_request: Vec::new(),
            max_redirects: Some(DEFAULT_MAX_REDIRECTS),
            spy: Arc::new(SpyServer::new()),
        }
    }

    /// `None` follows redirects without a hop limit.
    pub fn with_max_redirects(mut self, max_redirects: Option<usize>) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    pub fn runtime(&self) -> &Arc<HostRuntime> {
        &self.runtime
    }

    pub fn pending(&self) -> &PendingRequest {
        &self.pending
    }

    // Request decorations

    pub fn with_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.pending.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_headers<I, K, V>(&mut self, headers: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.with_header(name, value);
        }
        self
    }

    pub fn with_cookie(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.pending.cookies.push((name.into(), value.into()));
        self
    }

    pub fn with_cookies<I, K, V>(&mut self, cookies: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in cookies {
            self.with_cookie(name, value);
        }
        self
    }

    /// Sends the next request with this `Referer`.
    pub fn from(&mut self, referrer: impl Into<String>) -> &mut Self {
        self.pending.referrer = Some(referrer.into());
        self
    }

    /// Follows redirects on the next request. Requires a bound router.
    pub fn following_redirects(&mut self, follow: bool) -> &mut Self {
        self.pending.follow_redirects = follow;
        self
    }

    // Routing

    pub fn bind_router<R>(&mut self, router: R) -> &mut Self
    where
        R: AppRouter + 'static,
    {
        self.router = Some(Arc::new(router));
        self
    }

    pub fn bind_shared_router(&mut self, router: Arc<dyn AppRouter>) -> &mut Self {
        self.router = Some(router);
        self
    }

    pub fn unbind_router(&mut self) -> &mut Self {
        self.router = None;
        self
    }

    pub fn has_router(&self) -> bool {
        self.router.is_some()
    }

    pub fn after_request<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&CapturedResponse) + Send + Sync + 'static,
    {
        self.after_request.push(Box::new(callback));
        self
    }

    // Verbs

    pub async fn get(
        &mut self,
        target: impl Into<RequestTarget>,
    ) -> Result<CapturedResponse> {
        self.send(Call::new("GET", target)).await
    }

    pub async fn post(
        &mut self,
        target: impl Into<RequestTarget>,
        params: &[(&str, &str)],
    ) -> Result<CapturedResponse> {
        self.send_with_params("POST", target, params).await
    }

    pub async fn put(
        &mut self,
        target: impl Into<RequestTarget>,
        params: &[(&str, &str)],
    ) -> Result<CapturedResponse> {
        self.send_with_params("PUT", target, params).await
    }

    pub async fn patch(
        &mut self,
        target: impl Into<RequestTarget>,
        params: &[(&str, &str)],
    ) -> Result<CapturedResponse> {
        self.send_with_params("PATCH", target, params).await
    }

    pub async fn delete(
        &mut self,
        target: impl Into<RequestTarget>,
        params: &[(&str, &str)],
    ) -> Result<CapturedResponse> {
        self.send_with_params("DELETE", target, params).await
    }

    pub async fn options(
        &mut self,
        target: impl Into<RequestTarget>,
    ) -> Result<CapturedResponse> {
        self.send(Call::new("OPTIONS", target)).await
    }

    pub async fn get_json(
        &mut self,
        target: impl Into<RequestTarget>,
    ) -> Result<CapturedResponse> {
        let mut call = Call::new("GET", target);
        call.headers = owned(&[("Accept", JSON_CONTENT_TYPE)]);
        self.send(call).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &mut self,
        target: impl Into<RequestTarget>,
        payload: &T,
    ) -> Result<CapturedResponse> {
        self.send_json("POST", target, payload).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &mut self,
        target: impl Into<RequestTarget>,
        payload: &T,
    ) -> Result<CapturedResponse> {
        self.send_json("PUT", target, payload).await
    }

    pub async fn patch_json<T: Serialize + ?Sized>(
        &mut self,
        target: impl Into<RequestTarget>,
        payload: &T,
    ) -> Result<CapturedResponse> {
        self.send_json("PATCH", target, payload).await
    }

    pub async fn delete_json<T: Serialize + ?Sized>(
        &mut self,
        target: impl Into<RequestTarget>,
        payload: &T,
    ) -> Result<CapturedResponse> {
        self.send_json("DELETE", target, payload).await
    }

    /// The general form behind every verb.
    #[allow(clippy::too_many_arguments)]
    pub async fn call(
        &mut self,
        method: &str,
        target: impl Into<RequestTarget>,
        params: &[(&str, &str)],
        server: &[(&str, &str)],
        cookies: &[(&str, &str)],
        raw_body: Option<Bytes>,
    ) -> Result<CapturedResponse> {
        let mut call = Call::new(method, target);
        call.params = owned(params);
        call.server = owned(server);
        call.cookies = owned(cookies);
        call.raw_body = raw_body;
        self.send(call).await
    }

    async fn send_with_params(
        &mut self,
        method: &str,
        target: impl Into<RequestTarget>,
        params: &[(&str, &str)],
    ) -> Result<CapturedResponse> {
        let mut call = Call::new(method, target);
        call.params = owned(params);
        self.send(call).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &mut self,
        method: &str,
        target: impl Into<RequestTarget>,
        payload: &T,
    ) -> Result<CapturedResponse> {
        let body = serde_json::to_vec(payload)?;
        let length = body.len().to_string();
        let mut call = Call::new(method, target);
        call.headers = owned(&[
            ("Accept", JSON_CONTENT_TYPE),
            ("Content-Type", JSON_CONTENT_TYPE),
            ("Content-Length", length.as_str()),
        ]);
        call.raw_body = Some(Bytes::from(body));
        self.send(call).await
    }

    /// Performs `call`, following redirects if the pending request asks for
    /// it.
    #[instrument(skip(self, call), fields(method = %call.method, target = %call.target.uri()))]
    pub async fn send(&mut self, call: Call) -> Result<CapturedResponse> {
        let pending = std::mem::take(&mut self.pending);
        if pending.follow_redirects && self.router.is_none() {
            return Err(HarnessError::Configuration(
                "following redirects requires a bound router".into(),
            ));
        }

        let mut response = self.perform(&pending, &call).await?;
        if !pending.follow_redirects {
            return Ok(response);
        }

        let hop = pending.for_redirect();
        let mut hops = 0;
        while response.is_redirect() {
            let Some(location) = response.location().map(str::to_string) else {
                break;
            };
            if self.max_redirects.is_some_and(|max| hops >= max) {
                return Err(HarnessError::TooManyRedirects { hops, location });
            }
            hops += 1;
            debug!(hop = hops, %location, "following redirect");
            response = self.perform(&hop, &Call::new("GET", location)).await?;
        }
        Ok(response)
    }

    async fn perform(
        &self,
        pending: &PendingRequest,
        call: &Call,
    ) -> Result<CapturedResponse> {
        self.runtime.reset_request_state();
        let url = self.resolve(&call.target)?;
        let state = server::materialize(self.runtime.server(), call, &url, pending);
        self.runtime.update_server(|server| *server = state.clone());

        let response = match &self.router {
            Some(router) => {
                let _interceptors = CallInterceptors::install(self.runtime.clone(), None);
                let request = server::to_http_request(&state)?;
                let response = router
                    .dispatch(request)
                    .await
                    .map_err(HarnessError::Dispatch)?;
                CapturedResponse::from_http(response)
            }
            None => {
                let spy: Arc<dyn RestServer> = self.spy.clone();
                let interceptors =
                    CallInterceptors::install(self.runtime.clone(), Some(spy));
                self.render(&interceptors)?
            }
        };

        debug!(status = response.status(), "request captured");
        for callback in &self.after_request {
            callback(&response);
        }
        Ok(response)
    }

    fn render(&self, interceptors: &CallInterceptors) -> Result<CapturedResponse> {
        self.spy.take();
        let mut sink = Vec::new();
        let outcome = self.runtime.render_request(&mut sink);
        let emitted = interceptors.emitted();

        if self.runtime.request_cache().rest_route.is_some() {
            if let Some(rest) = self.spy.take() {
                let mut headers = vec![(
                    "Content-Type".to_string(),
                    format!("{JSON_CONTENT_TYPE}; charset=UTF-8"),
                )];
                headers.extend(rest.headers);
                let body = serde_json::to_vec(&rest.data)?;
                return Ok(CapturedResponse::from_emitted(rest.status, &headers, body));
            }
        }

        let mut headers = emitted.headers;
        let status = match outcome {
            RenderOutcome::Redirected { location, status } => {
                if !headers
                    .iter()
                    .any(|(name, _)| name.eq_ignore_ascii_case("location"))
                {
                    headers.push(("Location".to_string(), location));
                }
                emitted.status.unwrap_or(status)
            }
            RenderOutcome::Rendered | RenderOutcome::Halted => {
                emitted.status.unwrap_or(200)
            }
        };
        Ok(CapturedResponse::from_emitted(status, &headers, sink))
    }

    fn resolve(&self, target: &RequestTarget) -> Result<Url> {
        let uri = match target.uri() {
            "" => "/",
            uri => uri,
        };
        self.runtime
            .options()
            .site_url
            .join(uri)
            .map_err(|err| HarnessError::InvalidRequest(format!("{uri}: {err}")))
    }
}

fn owned(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_hops_drop_body_headers_only() {
        let pending = PendingRequest {
            headers: owned(&[
                ("content-type", "application/x-www-form-urlencoded"),
                ("Content-Length", "12"),
                ("X-Requested-With", "test"),
            ]),
            cookies: owned(&[("session", "abc")]),
            referrer: Some("http://example.org/form".into()),
            follow_redirects: true,
        };

        let hop = pending.for_redirect();

        assert_eq!(hop.headers, owned(&[("X-Requested-With", "test")]));
        assert_eq!(hop.cookies, pending.cookies);
        assert_eq!(hop.referrer, pending.referrer);
        assert!(hop.follow_redirects);
    }
}
