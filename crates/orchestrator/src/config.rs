//! Configuration management for the prover orchestrator
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

/// Thread count used when available parallelism can't be determined
const FALLBACK_THREADS: usize = 6;
/// Upper bound on the default thread count
const MAX_DEFAULT_THREADS: usize = 8;

/// Where program artifacts are fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLocation {
    /// Static-asset server base URL
    Http(String),
    /// Local directory
    Dir(PathBuf),
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API server host
    pub host: String,

    /// API server port
    pub port: u16,

    /// Artifact source
    pub artifacts: ArtifactLocation,

    /// Query string appended to HTTP artifact fetches
    pub cache_bust: Option<String>,

    /// Compute engine thread count
    pub num_threads: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let artifacts = match var("ARTIFACT_BASE_URL") {
            Some(url) => ArtifactLocation::Http(url),
            None => ArtifactLocation::Dir(PathBuf::from(
                var("ARTIFACT_DIR").unwrap_or_else(|| "./artifacts".to_string()),
            )),
        };

        let num_threads = match var("NUM_THREADS") {
            Some(value) => value.parse().context("Invalid NUM_THREADS")?,
            None => default_num_threads(),
        };

        let config = Config {
            host: var("PROVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),

            port: var("PROVER_PORT")
                .unwrap_or_else(|| "8086".to_string())
                .parse()
                .context("Invalid PROVER_PORT")?,

            artifacts,

            cache_bust: match var("ARTIFACT_CACHE_BUST") {
                Some(value) if value.is_empty() => None,
                Some(value) => Some(value),
                None => Some("v=2".to_string()),
            },

            num_threads,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("PROVER_PORT must be greater than 0");
        }

        if self.num_threads == 0 {
            anyhow::bail!("NUM_THREADS must be at least 1");
        }

        if let ArtifactLocation::Http(url) = &self.artifacts {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("ARTIFACT_BASE_URL must be an http(s) URL, got {}", url);
            }
        }

        Ok(())
    }

    /// Get the API server address
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Available parallelism, capped
pub fn default_num_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_THREADS)
        .min(MAX_DEFAULT_THREADS)
}
