use hostbench_runtime::RuntimeError;
use thiserror::Error;

use crate::{config::ConfigLoadError, lifecycle::TeardownReport};

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    ConfigLoad(#[from] ConfigLoadError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("Router dispatch failed: {0:#}")]
    Dispatch(#[source] anyhow::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Gave up after {hops} redirects; last location was {location}")]
    TooManyRedirects { hops: usize, location: String },

    #[error("Response body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Suite setup failed in {step}: {source:#}")]
    Setup {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Test {name} failed: {source:#}")]
    TestFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{0}")]
    Teardown(TeardownReport),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
