//! # Hostbench Core
//!
//! Request simulation and test isolation for code running on the hostbench
//! host runtime.
//!
//! ## Overview
//!
//! The host keeps everything about the current request in process-wide
//! state. `hostbench-core` makes that testable in-process, without a
//! network listener:
//!
//! - **Request simulation**: [`request::Dispatcher`] rewrites the ambient
//!   server state, routes through a bound router or the runtime's renderer,
//!   and captures status, headers and body
//! - **Response capture**: [`response::CapturedResponse`] with
//!   assertion helpers
//! - **Database isolation**: [`isolation::TransactionalIsolation`] wraps each
//!   test in a rolled-back transaction and turns DDL into temporary tables
//! - **Outbound fakes**: [`outbound::OutboundFake`] answers and records HTTP
//!   calls made by the code under test
//! - **Lifecycle**: [`lifecycle::TestSuite`] sequences all of the above and
//!   restores the hook registry after every test
//!
//! ## Examples
//!
//! ```no_run
//! use hostbench_core::prelude::*;
//!
//! async fn suite() -> Result<(), HarnessError> {
//!     let config = ConfigLoader::new().load()?;
//!     let mut suite = TestSuite::connect("pages", config)
//!         .await?
//!         .with_isolation()
//!         .with_auth_context();
//!
//!     suite.start().await?;
//!     suite
//!         .run_test("home page renders", async |cx| {
//!             cx.outbound()
//!                 .fake("https://api.example.com/*", OutboundResponse::ok());
//!             let response = cx.http().get("/").await?;
//!             response.assert_ok().assert_see("Welcome");
//!             Ok(())
//!         })
//!         .await?;
//!     suite.finish().await
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

/// Layered harness configuration
pub mod config;

/// Error types for the harness
pub mod error;

/// Hook registry snapshot and restore
pub mod hooks;

/// Transactional database isolation
pub mod isolation;

/// Suite and per-test lifecycle
pub mod lifecycle;

/// Outbound HTTP fakes and call log
pub mod outbound;

/// Simulated inbound requests
pub mod request;

/// Captured responses and assertions
pub mod response;

/// Test logging setup
pub mod telemetry;

pub use config::{ConfigLoader, HarnessConfig};
pub use error::{HarnessError, Result};
pub use hooks::{HookDiff, HookSnapshot};
pub use isolation::{IsolationState, TransactionalIsolation};
pub use lifecycle::{
    AuthContext, Concern, ConcernKind, TeardownReport, TestContext, TestSuite,
};
pub use outbound::{OutboundFake, Sequence, StrayPolicy};
pub use request::{Dispatcher, PendingRequest};
pub use response::CapturedResponse;

/// Everything a test file usually needs.
pub mod prelude {
    pub use crate::config::{ConfigLoader, HarnessConfig, StrayMode};
    pub use crate::error::HarnessError;
    pub use crate::isolation::TransactionalIsolation;
    pub use crate::lifecycle::{
        AuthContext, Concern, ConcernKind, TestContext, TestSuite,
    };
    pub use crate::outbound::{OutboundFake, Reply, Sequence, StrayPolicy};
    pub use crate::request::Dispatcher;
    pub use crate::response::CapturedResponse;
    pub use crate::telemetry::init_test_tracing;
    pub use hostbench_contracts::prelude::*;
    pub use hostbench_runtime::{
        HostRuntime, OutboundFailure, OutboundRequest, OutboundResponse,
    };
}
