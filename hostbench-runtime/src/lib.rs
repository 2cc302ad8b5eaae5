//! The stateful host runtime the hostbench harness drives.
//!
//! [`HostRuntime`] holds what a request-per-process host keeps in globals:
//! the hook registry, the ambient server state of the current request,
//! per-request caches, the current user and screen. Its entry points read
//! that state rather than taking a request value, which is exactly why a
//! harness is needed to test code running on it.

pub mod ambient;
pub mod cache;
pub mod db;
pub mod error;
pub mod hooks;
pub mod http;
pub mod render;
pub mod rest;
pub mod runtime;

pub use ambient::{RequestCache, ServerState, header_key, header_name};
pub use cache::ObjectCache;
pub use db::{Database, Db, SqlDialect};
pub use error::{Result, RuntimeError};
pub use hooks::{
    HookCallback, HookEntry, HookState, Hooks, PRIORITY_DEFAULT,
    PRIORITY_FIRST, PRIORITY_LAST, tags,
};
pub use http::{
    HttpTransport, OutboundFailure, OutboundRequest, OutboundResponse,
    ReqwestTransport,
};
pub use render::{
    LegacyRoute, RenderContext, RenderOutcome, RouteHandler, RoutePattern,
};
pub use rest::{
    EmittingRestServer, RestHandler, RestRequest, RestResponse, RestRoute,
    RestServer,
};
pub use runtime::{
    HostRuntime, RuntimeBuilder, RuntimeOptions, TOOLBAR_CALLBACK,
    TOOLBAR_PRIORITY,
};
