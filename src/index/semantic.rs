//! Flat exhaustive vector index.
//!
//! Vectors are stored contiguously (`ids.len() * dimension` floats) and a
//! query scans all of them. Archives of a few hundred thousand messages fit
//! comfortably, and the scan is exact, so results are reproducible.

use serde::{Deserialize, Serialize};

use crate::embedding::{cosine_similarity, l2_distance};
use crate::error::{MailRankError, Result};

/// Vector comparison used by a [`SemanticIndex`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity, higher is closer.
    #[default]
    Cosine,
    /// Euclidean distance, lower is closer.
    L2,
}

impl Metric {
    /// Convert a raw metric value into a similarity `>= 0`.
    ///
    /// Cosine is clamped at zero; a distance `d` becomes `1 / (1 + d)`.
    pub fn to_similarity(self, raw: f64) -> f64 {
        match self {
            Self::Cosine => raw.max(0.0),
            Self::L2 => 1.0 / (1.0 + raw.max(0.0)),
        }
    }

    fn measure(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => cosine_similarity(a, b),
            Self::L2 => l2_distance(a, b),
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cosine => write!(f, "cosine"),
            Self::L2 => write!(f, "l2"),
        }
    }
}

/// One nearest-neighbour result, carrying the metric's raw value.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub message_id: String,
    pub raw: f64,
}

/// Exact nearest-neighbour index over fixed-dimension vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticIndex {
    dimension: usize,
    metric: Metric,
    model: String,
    ids: Vec<String>,
    vectors: Vec<f32>,
}

impl SemanticIndex {
    /// Create an empty index for vectors of `dimension` components.
    pub fn new(dimension: usize, metric: Metric, model: impl Into<String>) -> Self {
        Self {
            dimension,
            metric,
            model: model.into(),
            ids: Vec::new(),
            vectors: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Name of the embedding model the vectors came from.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Append a vector for `message_id`.
    pub fn add(&mut self, message_id: impl Into<String>, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(MailRankError::InvalidArgument(format!(
                "vector has {} components, index expects {}",
                vector.len(),
                self.dimension
            )));
        }
        self.ids.push(message_id.into());
        self.vectors.extend_from_slice(vector);
        Ok(())
    }

    /// Return up to `k` nearest neighbours of `query`, closest first.
    ///
    /// Equal values keep insertion order. The scan stops early, returning
    /// what it has ranked so far, once `should_continue` returns `false`.
    pub fn query(
        &self,
        query: &[f32],
        k: usize,
        should_continue: &dyn Fn() -> bool,
    ) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(MailRankError::InvalidArgument(format!(
                "query vector has {} components, index expects {}",
                query.len(),
                self.dimension
            )));
        }
        if k == 0 || self.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = Vec::with_capacity(self.ids.len());
        for (i, vector) in self.vectors.chunks_exact(self.dimension).enumerate() {
            // Check the flag every 1024 vectors
            if i % 1024 == 0 && !should_continue() {
                break;
            }
            scored.push((i, self.metric.measure(query, vector)));
        }

        match self.metric {
            Metric::Cosine => scored.sort_by(|a, b| {
                b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
            }),
            Metric::L2 => scored.sort_by(|a, b| {
                a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)
            }),
        }
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, raw)| Neighbor {
                message_id: self.ids[i].clone(),
                raw: f64::from(raw),
            })
            .collect())
    }
}
