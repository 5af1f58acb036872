//! TOML configuration parsing and validation.
//!
//! Every section except `[db]` has defaults, so a config file can be as
//! small as:
//!
//! ```toml
//! [db]
//! path = "./data/ldocs.sqlite"
//! ```
//!
//! The embedding backend can be switched without editing the file by setting
//! `LDOCS_EMBEDDING_PROVIDER` (see [`apply_env_overrides`]).

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable that overrides `[embedding] provider`.
pub const PROVIDER_ENV: &str = "LDOCS_EMBEDDING_PROVIDER";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Maximum number of ranked chunks a search returns.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
        }
    }
}

fn default_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Base URL of the backend; each provider has its own default.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Concurrent embedding calls issued for the chunks of one file.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            url: None,
            timeout_secs: default_timeout_secs(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_concurrency() -> usize {
    4
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Close sessions that have seen no request for this many seconds (0 = never).
    #[serde(default)]
    pub session_idle_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            session_idle_timeout_secs: 0,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IngestConfig {
    /// Delete stored documents under the indexed root whose files have vanished.
    #[serde(default)]
    pub prune_missing: bool,
}

impl Config {
    /// All-defaults configuration with the database at `db_path`.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            server: ServerConfig::default(),
            ingest: IngestConfig::default(),
        }
    }

    /// Check cross-field constraints. Called by [`load_config`]; callers that
    /// build a `Config` by hand should call it too.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(Error::InvalidArgument(
                "chunking.chunk_size must be > 0".to_string(),
            ));
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(Error::InvalidArgument(format!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.overlap, self.chunking.chunk_size
            )));
        }
        if self.retrieval.limit == 0 {
            return Err(Error::InvalidArgument(
                "retrieval.limit must be >= 1".to_string(),
            ));
        }
        if self.embedding.dims == 0 {
            return Err(Error::Config("embedding.dims must be > 0".to_string()));
        }
        if self.embedding.max_concurrency == 0 {
            return Err(Error::Config(
                "embedding.max_concurrency must be >= 1".to_string(),
            ));
        }

        match self.embedding.provider.as_str() {
            "disabled" | "hashing" | "ollama" => {}
            "openai" => {
                if self.embedding.model.is_none() {
                    return Err(Error::Config(format!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    )));
                }
            }
            other => {
                return Err(Error::Config(format!(
                    "unknown embedding provider: '{}'. Must be disabled, ollama, openai, or hashing.",
                    other
                )))
            }
        }

        Ok(())
    }
}

/// Apply environment overrides on top of the parsed file.
pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(provider) = std::env::var(PROVIDER_ENV) {
        let provider = provider.trim();
        if !provider.is_empty() {
            config.embedding.provider = provider.to_string();
        }
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).map_err(|e| Error::Config(format!("failed to parse config: {}", e)))
}

/// Read, override from the environment, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let mut config = parse_config(&content)?;
    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}
