//! Application Configuration
//!
//! Drift and indexing settings stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::DriftError;
use crate::index::WriteOptions;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Drift model settings
    pub drift: DriftSettings,
    /// Search index settings
    pub index: IndexSettings,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Check every section for out-of-range values
    pub fn validate(&self) -> Result<()> {
        self.drift.validate()?;
        self.index.validate()?;
        Ok(())
    }
}

/// Drift model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftSettings {
    /// Canonical side length pages are resized to before scoring
    pub resize_dim: u32,
    /// Cumulative explained variance the component count must reach
    pub variance_threshold: f64,
    /// Pages per scored batch
    pub batch_size: usize,
    /// Refuse to fit unless there are at least `resize_dim²` reference images
    ///
    /// Off by default: at the default 220x220 this would demand 48400
    /// references. With it off, fit only requires two images that vary, and
    /// the component count is capped at the rank the references support.
    pub require_full_rank: bool,
}

impl Default for DriftSettings {
    fn default() -> Self {
        Self {
            resize_dim: 220,
            variance_threshold: 0.95,
            batch_size: 10,
            require_full_rank: false,
        }
    }
}

impl DriftSettings {
    /// Reject settings a model cannot be fit with
    pub fn validate(&self) -> std::result::Result<(), DriftError> {
        if self.resize_dim == 0 {
            return Err(DriftError::InvalidConfig("resize_dim must be at least 1".into()));
        }
        if !(self.variance_threshold > 0.0 && self.variance_threshold <= 1.0) {
            return Err(DriftError::InvalidConfig(format!(
                "variance_threshold must be in (0, 1], got {}",
                self.variance_threshold
            )));
        }
        if self.batch_size == 0 {
            return Err(DriftError::InvalidConfig("batch_size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Search index connection and bulk write settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Index that OCR records are written to
    pub name: String,
    /// Endpoint host:port or full URL
    pub endpoint_url: String,
    /// Use https when the endpoint has no scheme
    pub use_tls: bool,
    /// Verify server certificates
    pub verify_certs: bool,
    /// Records per bulk request
    pub chunk_size: usize,
    /// Parallel bulk workers
    pub concurrency: usize,
    /// Chunks buffered ahead of the workers
    pub queue_size: usize,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            name: "ocr-results".to_string(),
            endpoint_url: "localhost:9200".to_string(),
            use_tls: false,
            verify_certs: false,
            chunk_size: 1000,
            concurrency: 16,
            queue_size: 16,
            request_timeout_secs: 60,
        }
    }
}

impl IndexSettings {
    /// Reject settings the writer cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("index name must not be empty");
        }
        if self.endpoint_url.is_empty() {
            anyhow::bail!("index endpoint_url must not be empty");
        }
        if self.chunk_size == 0 || self.concurrency == 0 || self.queue_size == 0 {
            anyhow::bail!("chunk_size, concurrency and queue_size must all be at least 1");
        }
        Ok(())
    }

    /// Bulk writer options derived from these settings
    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            chunk_size: self.chunk_size,
            concurrency: self.concurrency,
            queue_size: self.queue_size,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
