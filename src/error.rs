//! Error taxonomy shared by the pipelines, the store and the session layer.
//!
//! Unsupported file types are not errors: the extractor returns `Ok(None)`
//! and ingestion skips them silently.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed chunking parameters, tool arguments or queries.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Crawl or file read failure. Aborts the ingestion run for its root.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The embedding provider failed or returned an unusable vector.
    #[error("embedding provider failed: {0}")]
    Provider(String),

    #[error("embedding provider timed out after {secs}s")]
    ProviderTimeout { secs: u64 },

    /// Missing, unknown or malformed session / handshake.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("store failure: {0}")]
    Store(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure came from the embedding provider (including timeouts).
    pub fn is_provider_failure(&self) -> bool {
        matches!(self, Error::Provider(_) | Error::ProviderTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
