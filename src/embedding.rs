//! Embedding collaborator: text → fixed-dimension vector.
//!
//! The engine only depends on the [`Embedder`] trait. The bundled
//! [`HashingEmbedder`] needs no model files: it hashes word tokens and
//! character trigrams into a fixed number of buckets (the "hashing trick")
//! and L2-normalizes the result, so the same text always maps to the same
//! vector and vectors are cosine/L2 comparable.

use sha2::{Digest, Sha256};

use crate::error::{MailRankError, Result};

/// Trait for embedding providers.
///
/// Implementations must be deterministic: index-time and query-time vectors
/// for the same text have to match.
pub trait Embedder: Send + Sync {
    /// Model identifier recorded in the semantic index.
    fn model_name(&self) -> &str;

    /// Output vector dimension.
    fn dimension(&self) -> usize;

    /// Embed one text.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Weight of a whole-word feature.
const WORD_WEIGHT: f32 = 1.0;

/// Weight of a character-trigram feature.
const TRIGRAM_WEIGHT: f32 = 0.5;

/// Deterministic feature-hashing embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    name: String,
}

impl HashingEmbedder {
    /// Create an embedder producing vectors of `dimension` components.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(MailRankError::InvalidArgument(
                "embedding dimension must be positive".into(),
            ));
        }
        Ok(Self {
            dimension,
            name: format!("hashing-sha256-{dimension}"),
        })
    }

    /// Add one hashed feature to `acc`.
    ///
    /// The first 8 digest bytes pick the bucket, the 9th picks the sign, which
    /// keeps colliding features from always reinforcing each other.
    fn add_feature(&self, acc: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        acc[bucket] += sign * weight;
    }
}

impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut acc = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            self.add_feature(&mut acc, &format!("w:{token}"), WORD_WEIGHT);

            let chars: Vec<char> = token.chars().collect();
            if chars.len() >= 3 {
                for window in chars.windows(3) {
                    let trigram: String = window.iter().collect();
                    self.add_feature(&mut acc, &format!("t:{trigram}"), TRIGRAM_WEIGHT);
                }
            }
        }

        l2_normalize(&mut acc);
        Ok(acc)
    }
}

/// Lowercase and split on every non-alphanumeric character.
///
/// Shared with the lexical index so both branches see the same terms.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Scale `v` to unit length in place (zero vectors are left untouched).
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity in `[-1, 1]`; `0.0` for empty, mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Euclidean distance; `f32::INFINITY` for mismatched lengths.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
