//! Fielded inverted index with BM25F-style scoring.
//!
//! Each searchable field keeps its own postings and length statistics so a
//! term in the subject can weigh more than the same term in the body.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::embedding::tokenize;
use crate::model::message::Message;
use crate::search::query::{parse_query, LexicalQuery, QueryTerm};

/// BM25 term-frequency saturation.
pub const K1: f64 = 1.2;

/// BM25 length normalization.
pub const B: f64 = 0.75;

/// A searchable message field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LexicalField {
    Subject,
    Body,
    Attachment,
    Sender,
}

impl LexicalField {
    /// Every field, in storage order. Also the default search set.
    pub const ALL: [LexicalField; 4] = [
        LexicalField::Subject,
        LexicalField::Body,
        LexicalField::Attachment,
        LexicalField::Sender,
    ];

    /// Score multiplier for matches in this field.
    pub fn boost(self) -> f64 {
        match self {
            Self::Subject => 2.0,
            Self::Sender => 1.5,
            Self::Body => 1.0,
            Self::Attachment => 0.8,
        }
    }

    /// Resolve a query prefix such as `subject` or `from`.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "subject" => Some(Self::Subject),
            "body" => Some(Self::Body),
            "attachment" => Some(Self::Attachment),
            "from" | "sender" => Some(Self::Sender),
            _ => None,
        }
    }

    /// The text of this field in `msg`.
    pub fn text(self, msg: &Message) -> &str {
        match self {
            Self::Subject => &msg.subject,
            Self::Body => &msg.body_text,
            Self::Attachment => &msg.body_attachment_text,
            Self::Sender => &msg.sender,
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::Subject => 0,
            Self::Body => 1,
            Self::Attachment => 2,
            Self::Sender => 3,
        }
    }
}

/// One lexical match with its raw relevance score (`>= 0`).
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub message_id: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Posting {
    doc: u32,
    tf: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FieldIndex {
    postings: BTreeMap<String, Vec<Posting>>,
    doc_lengths: Vec<u32>,
    total_length: u64,
}

impl FieldIndex {
    fn avg_length(&self) -> f64 {
        if self.doc_lengths.is_empty() || self.total_length == 0 {
            1.0
        } else {
            self.total_length as f64 / self.doc_lengths.len() as f64
        }
    }
}

/// Inverted index over the subject, body, attachment text and sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalIndex {
    doc_ids: Vec<String>,
    fields: Vec<FieldIndex>,
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self {
            doc_ids: Vec::new(),
            fields: vec![FieldIndex::default(); LexicalField::ALL.len()],
        }
    }
}

impl LexicalIndex {
    /// Index every message, in order.
    pub fn build(messages: &[Message]) -> Self {
        let mut index = Self::default();
        for msg in messages {
            index.add(msg);
        }
        index
    }

    /// Append one message. Its insertion position breaks score ties.
    pub fn add(&mut self, msg: &Message) {
        let doc = self.doc_ids.len() as u32;
        self.doc_ids.push(msg.id.clone());

        for field in LexicalField::ALL {
            let mut tf: HashMap<String, u32> = HashMap::new();
            let mut length = 0u32;
            for token in tokenize(field.text(msg)) {
                *tf.entry(token).or_default() += 1;
                length += 1;
            }

            let fi = &mut self.fields[field.slot()];
            fi.doc_lengths.push(length);
            fi.total_length += u64::from(length);
            for (term, count) in tf {
                fi.postings
                    .entry(term)
                    .or_default()
                    .push(Posting { doc, tf: count });
            }
        }
    }

    /// Number of indexed messages.
    pub fn len(&self) -> usize {
        self.doc_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    /// Number of distinct terms across all fields.
    pub fn term_count(&self) -> usize {
        self.fields.iter().map(|f| f.postings.len()).sum()
    }

    /// Parse `text` and run it, with no cancellation.
    pub fn query(&self, text: &str, default_fields: &[LexicalField], limit: usize) -> Vec<LexicalHit> {
        self.search(&parse_query(text), default_fields, limit, &|| true)
    }

    /// Run a parsed query and return up to `limit` hits, best first.
    ///
    /// Terms without a field prefix search `default_fields`. Equal scores
    /// keep insertion order. Returns nothing once `should_continue` reports
    /// `false`.
    pub fn search(
        &self,
        query: &LexicalQuery,
        default_fields: &[LexicalField],
        limit: usize,
        should_continue: &dyn Fn() -> bool,
    ) -> Vec<LexicalHit> {
        if limit == 0 || self.doc_ids.is_empty() {
            return Vec::new();
        }

        let mut combined: Option<HashMap<u32, f64>> = None;
        let mut excluded: Vec<HashMap<u32, f64>> = Vec::new();

        for term in &query.terms {
            if !should_continue() {
                trace!("Lexical search cancelled");
                return Vec::new();
            }
            let Some(matches) = self.match_term(term, default_fields) else {
                continue;
            };
            if term.negated {
                excluded.push(matches);
                continue;
            }
            combined = Some(match combined {
                None => matches,
                Some(mut acc) if query.is_or => {
                    for (doc, score) in matches {
                        *acc.entry(doc).or_default() += score;
                    }
                    acc
                }
                Some(acc) => acc
                    .into_iter()
                    .filter_map(|(doc, score)| matches.get(&doc).map(|s| (doc, score + s)))
                    .collect(),
            });
        }

        // No positive term matches nothing
        let Some(scores) = combined else {
            return Vec::new();
        };

        let mut hits: Vec<(u32, f64)> = scores
            .into_iter()
            .filter(|(doc, _)| !excluded.iter().any(|ex| ex.contains_key(doc)))
            .collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        hits.truncate(limit);

        hits.into_iter()
            .map(|(doc, score)| LexicalHit {
                message_id: self.doc_ids[doc as usize].clone(),
                score,
            })
            .collect()
    }

    /// Documents matching every token of `term`, with their summed score.
    ///
    /// `None` when the term has no searchable token at all.
    fn match_term(
        &self,
        term: &QueryTerm,
        default_fields: &[LexicalField],
    ) -> Option<HashMap<u32, f64>> {
        let fields: &[LexicalField] = match &term.field {
            Some(f) => std::slice::from_ref(f),
            None => default_fields,
        };

        let mut result: Option<HashMap<u32, f64>> = None;
        for token in tokenize(&term.text) {
            let token_scores = self.score_token(&token, fields);
            result = Some(match result {
                None => token_scores,
                Some(acc) => acc
                    .into_iter()
                    .filter_map(|(doc, score)| token_scores.get(&doc).map(|s| (doc, score + s)))
                    .collect(),
            });
        }
        result
    }

    /// BM25F contribution of one token over `fields`, for every document containing it.
    fn score_token(&self, token: &str, fields: &[LexicalField]) -> HashMap<u32, f64> {
        let n = self.doc_ids.len() as f64;
        let mut scores: HashMap<u32, f64> = HashMap::new();

        for field in fields {
            let fi = &self.fields[field.slot()];
            let Some(postings) = fi.postings.get(token) else {
                continue;
            };
            let df = postings.len() as f64;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
            let avg = fi.avg_length();

            for p in postings {
                let tf = f64::from(p.tf);
                let len = f64::from(fi.doc_lengths[p.doc as usize]);
                let norm = tf + K1 * (1.0 - B + B * len / avg);
                *scores.entry(p.doc).or_default() += field.boost() * idf * tf * (K1 + 1.0) / norm;
            }
        }
        scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, subject: &str, body: &str, sender: &str) -> Message {
        Message {
            id: id.to_string(),
            subject: subject.to_string(),
            body_text: body.to_string(),
            sender: sender.to_string(),
            ..Default::default()
        }
    }

    fn sample() -> LexicalIndex {
        LexicalIndex::build(&[
            message("m1", "Quarterly status report", "numbers attached", "boss@co.com"),
            message("m2", "Lunch", "status of the lunch order", "me@co.com"),
            message("m3", "Invoice 42", "please pay the invoice", "vendor@ext.com"),
        ])
    }

    fn ids(hits: &[LexicalHit]) -> Vec<&str> {
        hits.iter().map(|h| h.message_id.as_str()).collect()
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let idx = LexicalIndex::build(&[]);
        assert!(idx.query("status", &LexicalField::ALL, 10).is_empty());
    }

    #[test]
    fn test_subject_match_outranks_body_match() {
        let idx = sample();
        let hits = idx.query("status", &LexicalField::ALL, 10);
        assert_eq!(ids(&hits), vec!["m1", "m2"]);
        assert!(hits[0].score > hits[1].score);
        assert!(hits.iter().all(|h| h.score > 0.0));
    }

    #[test]
    fn test_terms_are_and_by_default() {
        let idx = sample();
        assert_eq!(ids(&idx.query("status lunch", &LexicalField::ALL, 10)), vec!["m2"]);
    }

    #[test]
    fn test_or_query_matches_any_term() {
        let idx = sample();
        let hits = idx.query("invoice OR lunch", &LexicalField::ALL, 10);
        let mut got = ids(&hits);
        got.sort();
        assert_eq!(got, vec!["m2", "m3"]);
    }

    #[test]
    fn test_negation_excludes() {
        let idx = sample();
        assert_eq!(ids(&idx.query("status -lunch", &LexicalField::ALL, 10)), vec!["m1"]);
    }

    #[test]
    fn test_only_negated_terms_match_nothing() {
        let idx = sample();
        assert!(idx.query("-lunch", &LexicalField::ALL, 10).is_empty());
    }

    #[test]
    fn test_field_prefix_restricts_search() {
        let idx = sample();
        assert_eq!(ids(&idx.query("subject:status", &LexicalField::ALL, 10)), vec!["m1"]);
        assert_eq!(ids(&idx.query("from:vendor@ext.com", &LexicalField::ALL, 10)), vec!["m3"]);
    }

    #[test]
    fn test_default_fields_are_respected() {
        let idx = sample();
        let hits = idx.query("status", &[LexicalField::Body], 10);
        assert_eq!(ids(&hits), vec!["m2"]);
    }

    #[test]
    fn test_limit_and_tie_order() {
        let idx = LexicalIndex::build(&[
            message("a", "same words", "", ""),
            message("b", "same words", "", ""),
            message("c", "same words", "", ""),
        ]);
        let hits = idx.query("same", &LexicalField::ALL, 2);
        assert_eq!(ids(&hits), vec!["a", "b"]);
        assert_eq!(hits[0].score, hits[1].score);
    }

    #[test]
    fn test_quoted_phrase_requires_all_tokens() {
        let idx = sample();
        assert_eq!(
            ids(&idx.query("\"status report\"", &LexicalField::ALL, 10)),
            vec!["m1"]
        );
    }

    #[test]
    fn test_cancelled_search_returns_nothing() {
        let idx = sample();
        let hits = idx.search(&parse_query("status"), &LexicalField::ALL, 10, &|| false);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_bm25_single_document_score() {
        // One doc, one subject token: idf = ln(1 + 0.5/1.5), tf-part = 1
        let idx = LexicalIndex::build(&[message("x", "hello", "", "")]);
        let hits = idx.query("subject:hello", &LexicalField::ALL, 1);
        let expected = 2.0 * (1.0f64 + 0.5 / 1.5).ln();
        assert!((hits[0].score - expected).abs() < 1e-9);
    }
}
