use once_cell::sync::Lazy;
use std::{fs, path::PathBuf};
use thiserror::Error;
use url::Url;

use super::{
    models::{
        ConfigMetadata, DatabaseSettings, HarnessConfig, OutboundSettings,
        RequestSettings, SiteSettings,
    },
    sources::{EnvConfig, FileConfig},
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("hostbench.toml"),
        PathBuf::from("config/hostbench.toml"),
    ]
});

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Skip `.env` entirely.
    pub skip_env_file: bool,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn without_env_file(mut self) -> Self {
        self.options.skip_env_file = true;
        self
    }

    pub fn load(&self) -> Result<HarnessConfig, ConfigLoadError> {
        let env_file_loaded = self.load_env_file()?;
        self.load_with_env(EnvConfig::gather(), env_file_loaded)
    }

    /// Composes the config from an already gathered environment.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<HarnessConfig, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        compose_config(file_config, env, config_path, env_file_loaded)
    }

    fn load_env_file(&self) -> Result<bool, ConfigLoadError> {
        if self.options.skip_env_file {
            return Ok(false);
        }

        let loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true),
            None => dotenvy::dotenv().map(|_| true),
        };
        loaded.or_else(|err| match err {
            dotenvy::Error::Io(_) => Ok(false),
            _ => Err(err.into()),
        })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let (path, required) =
            match (&self.options.config_path, &env.config_path) {
                (Some(explicit), _) => (explicit.clone(), true),
                (None, Some(from_env)) => (from_env.clone(), true),
                (None, None) => match DEFAULT_CONFIG_LOCATIONS
                    .iter()
                    .find(|candidate| candidate.exists())
                {
                    Some(found) => (found.clone(), false),
                    None => return Ok((None, None)),
                },
            };

        if !path.exists() {
            if required {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents =
            fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
                path: path.clone(),
                source,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| {
                ConfigLoadError::Parse {
                    path: path.clone(),
                    source,
                }
            })?;

        Ok((Some(file_config), Some(path)))
    }
}

fn compose_config(
    file_config: Option<FileConfig>,
    env: EnvConfig,
    config_path: Option<PathBuf>,
    env_file_loaded: bool,
) -> Result<HarnessConfig, ConfigLoadError> {
    let FileConfig {
        database: file_database,
        site: file_site,
        requests: file_requests,
        outbound: file_outbound,
    } = file_config.unwrap_or_default();

    let database_defaults = DatabaseSettings::default();
    let database = DatabaseSettings {
        url: env.database_url.or(file_database.url),
        table_prefix: env
            .table_prefix
            .or(file_database.table_prefix)
            .unwrap_or(database_defaults.table_prefix),
        core_tables: file_database
            .core_tables
            .unwrap_or(database_defaults.core_tables),
    };

    let site_defaults = SiteSettings::default();
    let site_url = env
        .site_url
        .or(file_site.url)
        .unwrap_or(site_defaults.url);
    Url::parse(&site_url).map_err(|source| ConfigLoadError::InvalidSiteUrl {
        url: site_url.clone(),
        source,
    })?;
    let site = SiteSettings {
        url: site_url,
        rest_prefix: env
            .rest_prefix
            .or(file_site.rest_prefix)
            .unwrap_or(site_defaults.rest_prefix),
        permalink_structure: file_site
            .permalink_structure
            .filter(|structure| !structure.is_empty()),
    };

    let requests = match env.max_redirects.or(file_requests.max_redirects) {
        Some(0) => RequestSettings {
            max_redirects: None,
        },
        Some(limit) => RequestSettings {
            max_redirects: Some(limit),
        },
        None => RequestSettings::default(),
    };

    let outbound = OutboundSettings {
        stray_requests: env
            .stray_requests
            .or(file_outbound.stray_requests)
            .unwrap_or_default(),
    };

    Ok(HarnessConfig {
        database,
        site,
        requests,
        outbound,
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded,
        },
    })
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid site URL '{url}'")]
    InvalidSiteUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}
