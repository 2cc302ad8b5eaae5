use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::models::StrayMode;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub site: FileSiteConfig,
    #[serde(default)]
    pub requests: FileRequestConfig,
    #[serde(default)]
    pub outbound: FileOutboundConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_tables: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileSiteConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rest_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permalink_structure: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRequestConfig {
    /// `0` lifts the limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_redirects: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileOutboundConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stray_requests: Option<StrayMode>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub table_prefix: Option<String>,
    pub site_url: Option<String>,
    pub rest_prefix: Option<String>,
    pub max_redirects: Option<usize>,
    pub stray_requests: Option<StrayMode>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| {
            lookup(name).filter(|value| !value.trim().is_empty())
        };

        Self {
            config_path: non_empty("HOSTBENCH_CONFIG").map(PathBuf::from),
            database_url: non_empty("HOSTBENCH_DATABASE_URL"),
            table_prefix: lookup("HOSTBENCH_TABLE_PREFIX"),
            site_url: non_empty("HOSTBENCH_SITE_URL"),
            rest_prefix: non_empty("HOSTBENCH_REST_PREFIX"),
            max_redirects: non_empty("HOSTBENCH_MAX_REDIRECTS")
                .and_then(|raw| parse_redirect_limit(&raw)),
            stray_requests: non_empty("HOSTBENCH_STRAY_REQUESTS")
                .and_then(|raw| parse_stray_mode(&raw)),
        }
    }
}

fn parse_redirect_limit(raw: &str) -> Option<usize> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "none" | "unbounded" | "unlimited" => Some(0),
        other => other.parse().ok(),
    }
}

fn parse_stray_mode(raw: &str) -> Option<StrayMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "allow" | "0" | "false" | "off" => Some(StrayMode::Allow),
        "deny" | "prevent" | "1" | "true" | "on" => Some(StrayMode::Deny),
        _ => None,
    }
}
