//! Result types of a hybrid search.

use serde::Serialize;

use crate::model::message::Message;

/// Every score computed for one candidate during a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub message_id: String,
    /// Raw lexical score (`>= 0`, 0 if the lexical branch did not return it).
    pub keyword_score: f64,
    /// Similarity after metric conversion (`>= 0`).
    pub semantic_score: f64,
    pub normalized_keyword_score: f64,
    pub normalized_semantic_score: f64,
    /// Additive, uncapped.
    pub importance_bonus: f64,
    pub hybrid_score: f64,
    pub final_score: f64,
}

impl ScoredCandidate {
    pub(crate) fn new(message_id: String, keyword_score: f64, semantic_score: f64) -> Self {
        Self {
            message_id,
            keyword_score,
            semantic_score,
            normalized_keyword_score: 0.0,
            normalized_semantic_score: 0.0,
            importance_bonus: 0.0,
            hybrid_score: 0.0,
            final_score: 0.0,
        }
    }
}

/// One ranked result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub message: Message,
    pub scores: ScoredCandidate,
}

/// Why a search ran with less than both branches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SearchWarning {
    /// The snapshot has no lexical index.
    LexicalUnavailable,
    /// The snapshot has no semantic index.
    SemanticUnavailable,
    /// Query vectors and index vectors differ in size.
    SemanticDimensionMismatch { index: usize, embedder: usize },
    /// The embedder failed on the query text.
    EmbeddingFailed(String),
    /// A branch missed the deadline and its results were discarded.
    BranchTimedOut(Branch),
}

impl std::fmt::Display for SearchWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LexicalUnavailable => write!(f, "lexical index unavailable"),
            Self::SemanticUnavailable => write!(f, "semantic index unavailable"),
            Self::SemanticDimensionMismatch { index, embedder } => write!(
                f,
                "semantic index has dimension {index}, embedder produces {embedder}"
            ),
            Self::EmbeddingFailed(reason) => write!(f, "query embedding failed: {reason}"),
            Self::BranchTimedOut(branch) => write!(f, "{branch} retrieval timed out"),
        }
    }
}

/// One of the two retrieval branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    Lexical,
    Semantic,
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexical => write!(f, "lexical"),
            Self::Semantic => write!(f, "semantic"),
        }
    }
}

/// Ranked hits plus diagnostics about how they were produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchOutcome {
    /// At most `limit` hits, best first.
    pub hits: Vec<SearchHit>,
    pub warnings: Vec<SearchWarning>,
    /// Semantic weight actually applied (differs from the request when a branch was missing).
    pub effective_semantic_weight: f64,
    pub lexical_candidates: usize,
    pub semantic_candidates: usize,
    /// Index generation that served the query, if any.
    pub generation: Option<u64>,
}

impl SearchOutcome {
    /// Ranked message ids, for comparisons.
    pub fn ids(&self) -> Vec<&str> {
        self.hits
            .iter()
            .map(|h| h.scores.message_id.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}
