use std::{fmt, sync::Arc, time::Duration};

use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;

use crate::{
    ambient::{RequestCache, ServerState},
    cache::ObjectCache,
    db::{Database, Db},
    error::{Result, RuntimeError},
    hooks::{Hooks, tags},
    http::{
        HttpTransport, OutboundRequest, OutboundResponse, ReqwestTransport,
        decode_short_circuit,
    },
    render::{LegacyRoute, RenderContext, RenderOutcome, RoutePattern},
    rest::{
        EmittingRestServer, RestRequest, RestResponse, RestRoute, RestServer,
    },
};

/// Id of the footer callback that injects the toolbar into rendered pages.
pub const TOOLBAR_CALLBACK: &str = "render_toolbar";
/// Priority the toolbar injection is registered at.
pub const TOOLBAR_PRIORITY: i32 = 1000;

const TOOLBAR_MARKUP: &str = r#"<div id="wpadminbar"></div>"#;
const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub site_url: Url,
    pub rest_prefix: String,
    pub table_prefix: String,
}

pub struct RuntimeBuilder {
    site_url: String,
    rest_prefix: String,
    table_prefix: String,
    transport: Option<Arc<dyn HttpTransport>>,
    database: Option<Database>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self {
            site_url: "http://example.org".to_string(),
            rest_prefix: "/wp-json".to_string(),
            table_prefix: "wp_".to_string(),
            transport: None,
            database: None,
        }
    }
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("site_url", &self.site_url)
            .field("rest_prefix", &self.rest_prefix)
            .field("table_prefix", &self.table_prefix)
            .finish_non_exhaustive()
    }
}

impl RuntimeBuilder {
    pub fn site_url(mut self, url: impl Into<String>) -> Self {
        self.site_url = url.into();
        self
    }

    pub fn rest_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.rest_prefix = prefix.into();
        self
    }

    pub fn table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    pub fn build(self) -> Result<Arc<HostRuntime>> {
        let site_url = Url::parse(&self.site_url)?;
        let rest_prefix =
            format!("/{}", self.rest_prefix.trim_matches('/'));

        let options = RuntimeOptions {
            site_url,
            rest_prefix,
            table_prefix: self.table_prefix,
        };

        let runtime = HostRuntime {
            server: Mutex::new(ServerState::baseline(&options.site_url)),
            request: Mutex::new(RequestCache::default()),
            hooks: Hooks::new(),
            current_user: Mutex::new(None),
            current_screen: Mutex::new(None),
            time_limit: Mutex::new(Some(DEFAULT_TIME_LIMIT)),
            permalink_structure: Mutex::new(None),
            routes: RwLock::new(Vec::new()),
            rest_routes: RwLock::new(Vec::new()),
            rest_server: Mutex::new(Arc::new(EmittingRestServer)),
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(ReqwestTransport::default())),
            database: self.database,
            cache: ObjectCache::default(),
            options,
        };

        runtime.hooks.add_filter(
            tags::FOOTER,
            TOOLBAR_CALLBACK,
            TOOLBAR_PRIORITY,
            |value, _| {
                let mut markup = value.as_str().unwrap_or_default().to_string();
                markup.push_str(TOOLBAR_MARKUP);
                Value::String(markup)
            },
        );

        Ok(Arc::new(runtime))
    }
}

/// The host: process-wide state plus the entry points that read it.
///
/// Everything that would be a global in the host lives here, so a test
/// harness can snapshot and restore it explicitly.
pub struct HostRuntime {
    options: RuntimeOptions,
    hooks: Hooks,
    server: Mutex<ServerState>,
    request: Mutex<RequestCache>,
    current_user: Mutex<Option<u64>>,
    current_screen: Mutex<Option<String>>,
    time_limit: Mutex<Option<Duration>>,
    permalink_structure: Mutex<Option<String>>,
    routes: RwLock<Vec<LegacyRoute>>,
    rest_routes: RwLock<Vec<RestRoute>>,
    rest_server: Mutex<Arc<dyn RestServer>>,
    transport: Arc<dyn HttpTransport>,
    database: Option<Database>,
    cache: ObjectCache,
}

impl fmt::Debug for HostRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRuntime")
            .field("options", &self.options)
            .field("routes", &self.routes.read().len())
            .field("rest_routes", &self.rest_routes.read().len())
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl HostRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn object_cache(&self) -> &ObjectCache {
        &self.cache
    }

    /// Absolute URL for a site-relative path.
    pub fn home_url(&self, path: &str) -> String {
        self.options
            .site_url
            .join(path)
            .map(String::from)
            .unwrap_or_else(|_| self.options.site_url.to_string())
    }

    pub fn db(&self) -> Result<Db<'_>> {
        self.database
            .as_ref()
            .map(|database| Db::new(self, database))
            .ok_or(RuntimeError::NoDatabase)
    }

    // Ambient state

    /// Copy of the current server state.
    pub fn server(&self) -> ServerState {
        self.server.lock().clone()
    }

    pub fn update_server<R>(&self, f: impl FnOnce(&mut ServerState) -> R) -> R {
        f(&mut self.server.lock())
    }

    pub fn request_cache(&self) -> RequestCache {
        self.request.lock().clone()
    }

    pub fn update_request_cache<R>(
        &self,
        f: impl FnOnce(&mut RequestCache) -> R,
    ) -> R {
        f(&mut self.request.lock())
    }

    /// Forgets everything about the last request.
    pub fn reset_request_state(&self) {
        *self.server.lock() = ServerState::baseline(&self.options.site_url);
        *self.request.lock() = RequestCache::default();
        *self.current_screen.lock() = None;
    }

    pub fn current_user(&self) -> Option<u64> {
        *self.current_user.lock()
    }

    pub fn set_current_user(&self, user: Option<u64>) {
        *self.current_user.lock() = user;
    }

    pub fn current_screen(&self) -> Option<String> {
        self.current_screen.lock().clone()
    }

    pub fn set_current_screen(&self, screen: Option<String>) {
        *self.current_screen.lock() = screen;
    }

    /// `None` means requests may run indefinitely.
    pub fn time_limit(&self) -> Option<Duration> {
        *self.time_limit.lock()
    }

    pub fn set_time_limit(&self, limit: Option<Duration>) {
        *self.time_limit.lock() = limit;
    }

    pub fn permalink_structure(&self) -> Option<String> {
        self.permalink_structure.lock().clone()
    }

    pub fn set_permalink_structure(&self, structure: Option<String>) {
        *self.permalink_structure.lock() = structure;
    }

    // Routing

    pub fn add_route<F>(&self, pattern: &str, handler: F)
    where
        F: Fn(&mut RenderContext<'_>) -> RenderOutcome + Send + Sync + 'static,
    {
        self.routes.write().push(LegacyRoute {
            pattern: RoutePattern::new(pattern),
            handler: Arc::new(handler),
        });
    }

    /// Registers `route` under `namespace`, e.g. `("demo/v1", "/items/{id}")`.
    pub fn register_rest_route<F>(
        &self,
        namespace: &str,
        route: &str,
        methods: &[&str],
        handler: F,
    ) where
        F: Fn(&HostRuntime, &RestRequest) -> RestResponse + Send + Sync + 'static,
    {
        let full = format!(
            "/{}/{}",
            namespace.trim_matches('/'),
            route.trim_start_matches('/')
        );
        self.rest_routes.write().push(RestRoute {
            pattern: RoutePattern::new(full),
            methods: methods.iter().map(|m| m.to_ascii_uppercase()).collect(),
            handler: Arc::new(handler),
        });
    }

    pub fn rest_server(&self) -> Arc<dyn RestServer> {
        self.rest_server.lock().clone()
    }

    /// Installs `server` and returns the one it replaced.
    pub fn set_rest_server(
        &self,
        server: Arc<dyn RestServer>,
    ) -> Arc<dyn RestServer> {
        std::mem::replace(&mut *self.rest_server.lock(), server)
    }

    // Emission

    /// Sends a status line; returns the status after filtering.
    pub fn emit_status(&self, status: u16) -> u16 {
        let filtered =
            self.hooks.apply_filters(tags::STATUS_HEADER, json!(status), &[]);
        filtered
            .as_u64()
            .and_then(|status| u16::try_from(status).ok())
            .unwrap_or(status)
    }

    pub fn emit_header(&self, name: &str, value: &str) {
        self.hooks
            .do_action(tags::SEND_HEADER, &[json!(name), json!(value)]);
    }

    /// Sends a redirect. A filter may rewrite the location, or cancel the
    /// redirect by returning a falsy value, in which case rendering goes on.
    pub fn redirect(&self, location: &str, status: u16) -> RenderOutcome {
        let location = self.hooks.apply_filters(
            tags::REDIRECT,
            json!(location),
            &[json!(status)],
        );
        let location = match location {
            Value::String(location) if !location.is_empty() => location,
            _ => {
                debug!("redirect cancelled by filter");
                return RenderOutcome::Rendered;
            }
        };

        let status = self
            .hooks
            .apply_filters(
                tags::REDIRECT_STATUS,
                json!(status),
                &[json!(location)],
            )
            .as_u64()
            .and_then(|status| u16::try_from(status).ok())
            .unwrap_or(status);

        let status = self.emit_status(status);
        self.emit_header("Location", &location);
        RenderOutcome::Redirected { location, status }
    }

    // Entry points

    /// Resolves the request described by the ambient server state and
    /// renders it into `sink`.
    pub fn render_request(&self, sink: &mut Vec<u8>) -> RenderOutcome {
        let server = self.server();

        if let Some(route) = self.resolve_rest_route(&server) {
            debug!(%route, "dispatching to REST server");
            self.update_request_cache(|cache| {
                cache.rest_route = Some(route.clone())
            });
            let request = rest_request(&server, route);
            let rest_server = self.rest_server();
            return rest_server.serve_request(self, &request, sink);
        }

        let path = server.path();
        let matched = self.routes.read().iter().find_map(|route| {
            route
                .pattern
                .matches(path)
                .map(|vars| (route.clone(), vars))
        });

        let Some((route, vars)) = matched else {
            debug!(%path, "no route matched");
            self.emit_status(404);
            return RenderOutcome::Rendered;
        };

        self.update_request_cache(|cache| {
            cache.matched_route = Some(route.pattern.as_str().to_string());
            cache.query_vars = vars;
        });
        self.hooks.do_action("template_redirect", &[]);

        let outcome = {
            let mut context = RenderContext::new(self, sink);
            (route.handler)(&mut context)
        };

        if outcome == RenderOutcome::Rendered {
            let footer = self.hooks.apply_filters(
                tags::FOOTER,
                Value::String(String::new()),
                &[],
            );
            if let Some(markup) = footer.as_str() {
                sink.extend_from_slice(markup.as_bytes());
            }
        }

        outcome
    }

    fn resolve_rest_route(&self, server: &ServerState) -> Option<String> {
        if let Some(route) = server.query.get("rest_route") {
            return Some(route.clone());
        }

        let prefix = self.options.rest_prefix.trim_end_matches('/');
        let rest = server.path().strip_prefix(prefix)?;
        if rest.is_empty() {
            Some("/".to_string())
        } else if rest.starts_with('/') {
            Some(rest.to_string())
        } else {
            None
        }
    }

    /// Routes a REST request to its handler.
    pub fn rest_dispatch(&self, request: &RestRequest) -> RestResponse {
        let matched = self.rest_routes.read().iter().find_map(|route| {
            if !route.allows(&request.method) {
                return None;
            }
            route
                .pattern
                .matches(&request.route)
                .map(|vars| (route.handler.clone(), vars))
        });

        match matched {
            Some((handler, vars)) => {
                let mut request = request.clone();
                request.params.extend(vars);
                handler(self, &request)
            }
            None => RestResponse::no_route(),
        }
    }

    /// Performs an outbound HTTP call through the `pre_http_request` seam.
    pub async fn http_request(
        &self,
        request: OutboundRequest,
    ) -> Result<OutboundResponse> {
        let url = request.url.clone();
        let args = serde_json::to_value(&request)?;
        let short_circuit = self.hooks.apply_filters(
            tags::PRE_HTTP_REQUEST,
            Value::Bool(false),
            &[args, json!(url)],
        );

        let result = match decode_short_circuit(&url, short_circuit) {
            Ok(Some(response)) => Ok(response),
            Ok(None) => {
                debug!(method = %request.method, %url, "outbound request");
                self.transport.send(&request).await
            }
            Err(err) => Err(err),
        };

        let outcome = match &result {
            Ok(response) => json!({ "status": response.status }),
            Err(err) => {
                warn!(%url, error = %err, "outbound request failed");
                json!({ "error": err.to_string() })
            }
        };
        self.hooks
            .do_action(tags::HTTP_API_DEBUG, &[outcome, json!(url)]);

        result
    }
}

fn rest_request(server: &ServerState, route: String) -> RestRequest {
    let mut params = server.query.clone();
    params.remove("rest_route");
    params.extend(server.body.clone());

    let headers = server.headers().into_iter().collect();
    let is_json = server
        .header("content-type")
        .is_some_and(|value| value.contains("json"));
    let json = (is_json && !server.raw_body.is_empty())
        .then(|| serde_json::from_slice::<Value>(&server.raw_body).ok())
        .flatten();

    if let Some(Value::Object(fields)) = &json {
        for (name, value) in fields {
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            params.insert(name.clone(), value);
        }
    }

    RestRequest {
        method: server.method().to_string(),
        route,
        params,
        headers,
        json,
    }
}
