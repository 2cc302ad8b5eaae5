//! Trait surfaces that describe what the hostbench harness needs from the
//! code it drives.
//!
//! The harness never depends on concrete content models or applications. It
//! resolves request targets through [`Permalink`] and dispatches requests
//! through [`AppRouter`].

pub mod router;
pub mod target;

/// Frequently used contracts for test crates.
pub mod prelude {
    pub use super::router::{AppRouter, DispatchRequest, DispatchResponse};
    pub use super::target::{Permalink, RequestTarget};
}

pub use router::{AppRouter, DispatchRequest, DispatchResponse};
pub use target::{Permalink, RequestTarget};
