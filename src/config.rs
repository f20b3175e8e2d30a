//! Viewer configuration.
//!
//! Read from an optional TOML file and overridden by `FEED_VIEWER_*`
//! environment variables, e.g. `FEED_VIEWER_POOL_CAPACITY=8`.

use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use url::Url;

use crate::coordinator::CoordinatorSettings;

/// File read when no path is given on the command line.
pub const DEFAULT_CONFIG_FILE: &str = "feed-viewer.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// JSON manifest listing the feed's media addresses.
    pub manifest_url: String,
    /// Number of playback handles kept alive.
    pub pool_capacity: usize,
    /// Fraction of the viewport a drag must cross before the neighbor plays.
    pub peek_threshold: f64,
    /// Fallback readiness poll period while the scroll lock is held.
    pub readiness_poll_secs: u64,
    /// Reloads of a failed neighbor before the scroll lock gives up on it.
    pub load_retry_limit: u32,
    /// Bytes buffered per source by the HTTP backend.
    pub prebuffer_bytes: usize,
    pub request_timeout_secs: u64,
    /// Used when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            manifest_url: "http://localhost:8080/manifest.json".into(),
            pool_capacity: 5,
            peek_threshold: 0.3,
            readiness_poll_secs: 5,
            load_retry_limit: 1,
            prebuffer_bytes: 256 * 1024,
            request_timeout_secs: 15,
            log_filter: "info".into(),
        }
    }
}

impl ViewerConfig {
    /// Load from `path`, or from [`DEFAULT_CONFIG_FILE`] if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let builder = config::Config::builder().add_source(file).add_source(
            config::Environment::with_prefix("FEED_VIEWER")
                .prefix_separator("_")
                .try_parsing(true),
        );
        Self::from_builder(builder)
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let config: Self = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.pool_capacity >= 3,
            "pool_capacity must be at least 3 to hold the neighbor window (got {})",
            self.pool_capacity
        );
        ensure!(
            self.peek_threshold > 0.0 && self.peek_threshold < 1.0,
            "peek_threshold must be between 0 and 1 (got {})",
            self.peek_threshold
        );
        ensure!(
            self.readiness_poll_secs > 0,
            "readiness_poll_secs must be positive"
        );
        self.manifest_url()?;
        Ok(())
    }

    pub fn manifest_url(&self) -> Result<Url> {
        Url::parse(&self.manifest_url)
            .with_context(|| format!("Invalid manifest URL: {}", self.manifest_url))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            peek_threshold: self.peek_threshold,
            readiness_poll: Duration::from_secs(self.readiness_poll_secs),
            load_retry_limit: self.load_retry_limit,
        }
    }
}
