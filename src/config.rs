use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub limits: LimitsConfig,
}

/// Which backend holds the reviews
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Memory,
    #[default]
    Json,
    Postgres,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: Backend,
    /// Directory used by the JSON backend
    pub path: PathBuf,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Json,
            path: PathBuf::from(".movie-reviews/store"),
            database_url: None,
            max_connections: 5,
        }
    }
}

/// Truncation and pagination limits applied by the service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub latest_for_movie: usize,
    pub latest_for_user: usize,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            latest_for_movie: 5,
            latest_for_user: 20,
            default_page_size: 5,
            max_page_size: 100,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            info!(path = %path.display(), "Loaded configuration");
            config
        } else {
            info!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.store.database_url = Some(url);
        }

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from the default location (.movie-reviews/config.yml)
    pub fn load_default() -> Result<Self> {
        Self::load(".movie-reviews/config.yml")
    }

    fn validate(&self) -> Result<()> {
        let limits = &self.limits;
        if limits.default_page_size == 0 || limits.max_page_size == 0 {
            anyhow::bail!("Page sizes must be at least 1");
        }
        if limits.default_page_size > limits.max_page_size {
            anyhow::bail!(
                "default_page_size ({}) exceeds max_page_size ({})",
                limits.default_page_size,
                limits.max_page_size
            );
        }
        Ok(())
    }
}
