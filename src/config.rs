//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MAILRANK_CONFIG` (environment variable)
//! 2. `~/.config/mailrank/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailrank\config.toml` (Windows)
//! 3. Built-in defaults
//!
//! Command-line flags override whatever is loaded here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MailRankError, Result};
use crate::index::semantic::Metric;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Ingestion defaults.
    pub ingest: IngestConfig,
    /// Index location and retention.
    pub index: IndexConfig,
    /// Query-time tuning.
    pub search: SearchConfig,
    /// Embedding collaborator settings.
    pub embedding: EmbeddingConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Ingestion defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// SQLite message store.
    pub db_path: PathBuf,
    /// Number of messages written per transaction.
    pub batch_size: usize,
}

/// Index location and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Directory holding index generations and the `CURRENT` pointer.
    pub index_dir: PathBuf,
    /// How many generations to keep on disk after a build (minimum 1).
    pub keep_generations: usize,
}

/// Query-time tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Default number of results.
    pub limit: usize,
    /// Default weight of the semantic score in `[0, 1]`.
    pub semantic_weight: f64,
    /// Lexical candidates fetched per query (raised to `limit` if smaller).
    pub lexical_candidates: usize,
    /// Semantic candidates fetched per query (raised to `limit` if smaller).
    pub semantic_candidates: usize,
    /// Retrieval deadline in milliseconds (0 = no deadline).
    pub timeout_ms: u64,
    /// On timeout, rank with whichever branch finished instead of failing.
    pub allow_partial: bool,
    /// Run the lexical and semantic branches on separate threads.
    pub parallel: bool,
    /// Number of query embeddings kept in the LRU cache (0 disables it).
    pub query_cache_size: usize,
}

/// Embedding collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Vector dimension of the hashing embedder.
    pub dimension: usize,
    /// Vector comparison used by the semantic index.
    pub metric: Metric,
    /// Maximum characters of a message fed to the embedder.
    pub max_chars: usize,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/emails.db"),
            batch_size: 100,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("data/index"),
            keep_generations: 2,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            semantic_weight: 0.5,
            lexical_candidates: 50,
            semantic_candidates: 50,
            timeout_ms: 0,
            allow_partial: false,
            parallel: true,
            query_cache_size: 64,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: 256,
            metric: Metric::Cosine,
            max_chars: 8000,
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found. A file that
/// exists but cannot be read or parsed is an error; the caller decides
/// whether to fall back to defaults once logging is available.
pub fn load_config() -> Result<Config> {
    match config_file_path() {
        Some(path) if path.exists() => load_config_from(&path),
        _ => Ok(Config::default()),
    }
}

/// Load configuration from an explicit TOML file.
pub fn load_config_from(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| MailRankError::io(path, e))?;
    toml::from_str(&contents).map_err(|e| MailRankError::Config {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILRANK_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mailrank").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailrank")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("mailrank.log")
}
