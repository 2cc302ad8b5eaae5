use std::{path::PathBuf, sync::Arc};

use hostbench_runtime::{Database, HostRuntime, RuntimeBuilder};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Rows in these tables are wiped when a suite finishes.
pub const DEFAULT_CORE_TABLES: &[&str] = &[
    "posts",
    "postmeta",
    "comments",
    "commentmeta",
    "term_relationships",
    "termmeta",
];

pub const DEFAULT_MAX_REDIRECTS: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct HarnessConfig {
    pub database: DatabaseSettings,
    pub site: SiteSettings,
    pub requests: RequestSettings,
    pub outbound: OutboundSettings,
    pub metadata: ConfigMetadata,
}

impl HarnessConfig {
    /// A runtime builder carrying the site and table settings.
    pub fn runtime_builder(&self) -> RuntimeBuilder {
        HostRuntime::builder()
            .site_url(self.site.url.clone())
            .rest_prefix(self.site.rest_prefix.clone())
            .table_prefix(self.database.table_prefix.clone())
    }

    /// Builds the runtime, connecting the configured database if any.
    pub async fn connect(&self) -> Result<Arc<HostRuntime>> {
        let mut builder = self.runtime_builder();
        if let Some(url) = &self.database.url {
            builder = builder.database(Database::connect(url).await?);
        }
        Ok(builder.build()?)
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub table_prefix: String,
    /// Unprefixed names.
    pub core_tables: Vec<String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            table_prefix: "wp_".to_string(),
            core_tables: DEFAULT_CORE_TABLES
                .iter()
                .map(|table| table.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    /// Absolute; checked when the config is loaded.
    pub url: String,
    pub rest_prefix: String,
    /// `None` keeps plain query-string links.
    pub permalink_structure: Option<String>,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            url: "http://example.org".to_string(),
            rest_prefix: "/wp-json".to_string(),
            permalink_structure: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestSettings {
    /// `None` follows redirects until a non-redirect arrives.
    pub max_redirects: Option<usize>,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            max_redirects: Some(DEFAULT_MAX_REDIRECTS),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OutboundSettings {
    pub stray_requests: StrayMode,
}

/// What happens to outbound calls no fake claims.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum StrayMode {
    /// The call goes out and is reported at teardown.
    #[default]
    Allow,
    /// The call fails, naming its URL.
    Deny,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
