//! Error types shared by the collector and its adapters.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Why an upstream item could not become a [`PostRecord`](crate::domain::PostRecord).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedItem {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Failures reported by a [`PostSource`](crate::ports::PostSource).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient network error: {0}")]
    Transient(String),

    #[error("channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("unexpected upstream response: {0}")]
    Upstream(String),
}

impl SourceError {
    /// Rate limits and network blips are worth another attempt; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }
}

/// Failures reading or appending to a dataset file.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("dataset I/O failed on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not encode record {id}: {source}")]
    Encode {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Run-level failures. Anything here means no summary could be produced.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("could not open upstream session: {0}")]
    Session(SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid collector settings: {0}")]
    Settings(String),
}
