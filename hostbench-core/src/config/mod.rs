//! Harness configuration.
//!
//! Values are layered the usual way: environment variables (optionally seeded
//! from a `.env` file) win over a `hostbench.toml`, which wins over defaults.

pub mod loader;
pub mod models;
pub mod sources;

pub use loader::{ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{
    ConfigMetadata, DEFAULT_CORE_TABLES, DEFAULT_MAX_REDIRECTS,
    DatabaseSettings, HarnessConfig, OutboundSettings, RequestSettings,
    SiteSettings, StrayMode,
};
