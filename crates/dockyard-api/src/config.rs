//! Configuration management for the Dockyard API
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use dockyard_catalog::CatalogConfig;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API server host
    pub api_host: String,

    /// API server port
    pub api_port: u16,

    /// Directory holding `sources.json` and `settings.json`
    pub data_dir: PathBuf,

    /// Root of the per-source bundle caches, served under `/storage`
    pub storage_dir: PathBuf,

    /// Root of the installed deployment tree
    pub deploy_dir: PathBuf,

    /// Ceiling on one catalog download
    pub max_download_bytes: u64,

    /// Ceiling on the uncompressed size of one archive
    pub max_extract_bytes: u64,

    /// Timeout for one catalog fetch, in seconds
    pub fetch_timeout_secs: u64,

    /// Executable providing the `compose` subcommand
    pub compose_binary: String,

    /// Timeout for one compose invocation, in seconds
    pub compose_timeout_secs: u64,

    /// Accept sources on loopback and private networks
    pub allow_private_sources: bool,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        let config = Config {
            api_host: var_or("API_HOST", "0.0.0.0"),

            api_port: var_or("API_PORT", "8080")
                .parse()
                .context("Invalid API_PORT")?,

            data_dir: var_or("DATA_DIR", "./data").into(),

            storage_dir: var_or("STORAGE_DIR", "./storage").into(),

            deploy_dir: var_or("DEPLOY_DIR", "./deployments").into(),

            max_download_bytes: var_or("MAX_DOWNLOAD_BYTES", "52428800")
                .parse()
                .context("Invalid MAX_DOWNLOAD_BYTES")?,

            max_extract_bytes: var_or("MAX_EXTRACT_BYTES", "536870912")
                .parse()
                .context("Invalid MAX_EXTRACT_BYTES")?,

            fetch_timeout_secs: var_or("FETCH_TIMEOUT_SECS", "60")
                .parse()
                .context("Invalid FETCH_TIMEOUT_SECS")?,

            compose_binary: var_or("COMPOSE_BINARY", "docker"),

            compose_timeout_secs: var_or("COMPOSE_TIMEOUT_SECS", "300")
                .parse()
                .context("Invalid COMPOSE_TIMEOUT_SECS")?,

            allow_private_sources: var_or("ALLOW_PRIVATE_SOURCES", "false")
                .parse()
                .context("Invalid ALLOW_PRIVATE_SOURCES")?,
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.api_port == 0 {
            anyhow::bail!("API_PORT must be greater than 0");
        }
        if self.max_download_bytes == 0 {
            anyhow::bail!("MAX_DOWNLOAD_BYTES must be greater than 0");
        }
        if self.max_extract_bytes == 0 {
            anyhow::bail!("MAX_EXTRACT_BYTES must be greater than 0");
        }
        if self.fetch_timeout_secs == 0 {
            anyhow::bail!("FETCH_TIMEOUT_SECS must be greater than 0");
        }
        if self.compose_timeout_secs == 0 {
            anyhow::bail!("COMPOSE_TIMEOUT_SECS must be greater than 0");
        }
        if self.compose_binary.trim().is_empty() {
            anyhow::bail!("COMPOSE_BINARY must not be empty");
        }

        Ok(())
    }

    /// Get the API server address
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    pub fn sources_file(&self) -> PathBuf {
        self.data_dir.join("sources.json")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn compose_timeout(&self) -> Duration {
        Duration::from_secs(self.compose_timeout_secs)
    }

    /// Catalog settings derived from this configuration
    pub fn catalog_config(&self) -> CatalogConfig {
        let mut catalog = CatalogConfig::new(self.storage_dir.clone());
        catalog.max_download_bytes = self.max_download_bytes;
        catalog.max_extract_bytes = self.max_extract_bytes;
        catalog.fetch_timeout = Duration::from_secs(self.fetch_timeout_secs);
        catalog.allow_private_hosts = self.allow_private_sources;
        catalog
    }

    /// Ensure data, storage and deployment directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        for (label, dir) in [
            ("data", &self.data_dir),
            ("storage", &self.storage_dir),
            ("deployment", &self.deploy_dir),
        ] {
            std::fs::create_dir_all(dir).with_context(|| {
                format!("Failed to create {} directory: {}", label, dir.display())
            })?;
        }

        Ok(())
    }

    /// Configuration rooted in one directory, for tests and local runs
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Config {
            api_host: "127.0.0.1".to_string(),
            api_port: 8080,
            data_dir: root.join("data"),
            storage_dir: root.join("storage"),
            deploy_dir: root.join("deployments"),
            max_download_bytes: 52_428_800,
            max_extract_bytes: 536_870_912,
            fetch_timeout_secs: 60,
            compose_binary: "docker".to_string(),
            compose_timeout_secs: 300,
            allow_private_sources: false,
        }
    }
}
