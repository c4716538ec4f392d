//! Hybrid search: query parsing, candidate fusion, and the query engine.

pub mod engine;
pub mod fusion;
pub mod query;
pub mod types;

pub use engine::{HybridEngine, RetrievalOptions};
pub use types::{ScoredCandidate, SearchHit, SearchOutcome, SearchWarning};
