//! Centralized error types for mailrank.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// All errors produced by the mailrank library.
#[derive(Error, Debug)]
pub enum MailRankError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The ingestion source does not exist.
    #[error("Mail source not found: {0}")]
    SourceNotFound(PathBuf),

    /// The ingestion source exists but cannot be read by any parser.
    #[error("Unsupported mail source '{path}': {reason}")]
    UnsupportedSource { path: PathBuf, reason: String },

    /// A single message could not be turned into a [`Message`](crate::model::message::Message).
    #[error("Parse error in '{source_id}': {reason}")]
    Parse { source_id: String, reason: String },

    /// The configuration file could not be parsed.
    #[error("Invalid configuration in '{path}': {reason}")]
    Config { path: PathBuf, reason: String },

    /// A caller passed an argument outside its contract (weight, limit, dimension).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The index directory, its `CURRENT` pointer, or a required file is missing.
    ///
    /// This is the normal state of an archive that has not been indexed yet.
    #[error("Index unavailable at '{path}': {reason}")]
    IndexUnavailable { path: PathBuf, reason: String },

    /// An index file exists but is corrupt or was written by an incompatible version.
    #[error("Corrupt or incompatible index file '{path}': {reason}")]
    InvalidIndex { path: PathBuf, reason: String },

    /// Retrieval did not finish before the caller's deadline.
    #[error("Search timed out after {0:?}")]
    Timeout(Duration),

    /// The message store reported an error.
    #[error("Message store error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Encoding or decoding a persisted structure failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The embedding collaborator failed.
    #[error("Embedding error: {0}")]
    Embedding(String),
}

/// Convenience alias for `Result<T, MailRankError>`.
pub type Result<T> = std::result::Result<T, MailRankError>;

impl MailRankError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an `IndexUnavailable` variant.
    pub fn unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::IndexUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error means "there is no usable index yet".
    pub fn is_index_unavailable(&self) -> bool {
        matches!(
            self,
            Self::IndexUnavailable { .. } | Self::InvalidIndex { .. }
        )
    }
}

impl From<bincode::Error> for MailRankError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for MailRankError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare; prefer `MailRankError::io`).
impl From<std::io::Error> for MailRankError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
