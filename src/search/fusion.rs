//! Score fusion: union, normalization, importance bonus and ranking.
//!
//! Every step is a pure function over the candidate list so that the
//! engine's concurrency never touches the ranking math.

use std::collections::HashMap;

use tracing::warn;

use crate::contacts::ImportanceProfile;
use crate::error::{MailRankError, Result};
use crate::index::documents::DocumentStore;
use crate::index::lexical::LexicalHit;
use crate::index::semantic::{Metric, Neighbor};
use crate::model::message::Message;
use crate::search::types::{ScoredCandidate, SearchHit};

/// Bonus when the sender is the main user.
pub const MAIN_USER_SENDER_BONUS: f64 = 0.50;

/// Bonus when the main user is among the recipients.
pub const MAIN_USER_RECIPIENT_BONUS: f64 = 0.20;

/// Bonus when the sender is an important contact.
pub const IMPORTANT_SENDER_BONUS: f64 = 0.30;

/// Reject weights outside `[0, 1]` (NaN included). Never clamps.
pub fn validate_weight(semantic_weight: f64) -> Result<()> {
    if (0.0..=1.0).contains(&semantic_weight) {
        Ok(())
    } else {
        Err(MailRankError::InvalidArgument(format!(
            "semantic weight must be within [0, 1], got {semantic_weight}"
        )))
    }
}

/// Merge both candidate lists by message id.
///
/// Lexical hits come first in lexical order, then semantic-only hits in
/// semantic order. A repeated id keeps its first position and the highest
/// raw score. Semantic raw values are converted with `metric`.
pub fn union_candidates(
    lexical: &[LexicalHit],
    semantic: &[Neighbor],
    metric: Metric,
) -> Vec<ScoredCandidate> {
    let mut candidates: Vec<ScoredCandidate> = Vec::with_capacity(lexical.len() + semantic.len());
    let mut slot: HashMap<&str, usize> = HashMap::new();

    for hit in lexical {
        let score = hit.score.max(0.0);
        match slot.get(hit.message_id.as_str()) {
            Some(&i) => {
                candidates[i].keyword_score = candidates[i].keyword_score.max(score);
            }
            None => {
                slot.insert(&hit.message_id, candidates.len());
                candidates.push(ScoredCandidate::new(hit.message_id.clone(), score, 0.0));
            }
        }
    }

    for neighbor in semantic {
        let similarity = metric.to_similarity(neighbor.raw);
        match slot.get(neighbor.message_id.as_str()) {
            Some(&i) => {
                candidates[i].semantic_score = candidates[i].semantic_score.max(similarity);
            }
            None => {
                slot.insert(&neighbor.message_id, candidates.len());
                candidates.push(ScoredCandidate::new(
                    neighbor.message_id.clone(),
                    0.0,
                    similarity,
                ));
            }
        }
    }

    candidates
}

/// Divide each raw score by its working-set maximum.
///
/// A zero maximum gives every candidate a normalized score of 0.
pub fn normalize(candidates: &mut [ScoredCandidate]) {
    let max_keyword = candidates
        .iter()
        .map(|c| c.keyword_score)
        .fold(0.0f64, f64::max);
    let max_semantic = candidates
        .iter()
        .map(|c| c.semantic_score)
        .fold(0.0f64, f64::max);

    for c in candidates.iter_mut() {
        c.normalized_keyword_score = if max_keyword > 0.0 {
            c.keyword_score / max_keyword
        } else {
            0.0
        };
        c.normalized_semantic_score = if max_semantic > 0.0 {
            c.semantic_score / max_semantic
        } else {
            0.0
        };
    }
}

/// Additive social bonus for `message` under `profile`.
///
/// The parts are not capped: a main user mailing themselves earns 0.70.
pub fn importance_bonus(message: &Message, profile: &ImportanceProfile) -> f64 {
    let mut bonus = 0.0;
    if let Some(main_user) = profile.main_user.as_deref() {
        if message.sender == main_user {
            bonus += MAIN_USER_SENDER_BONUS;
        }
        if message.has_recipient(main_user) {
            bonus += MAIN_USER_RECIPIENT_BONUS;
        }
    }
    if !message.sender.is_empty() && profile.is_important(&message.sender) {
        bonus += IMPORTANT_SENDER_BONUS;
    }
    bonus
}

/// Weighted combination of the normalized scores.
pub fn hybrid_score(normalized_keyword: f64, normalized_semantic: f64, semantic_weight: f64) -> f64 {
    (1.0 - semantic_weight) * normalized_keyword + semantic_weight * normalized_semantic
}

/// Stable sort by final score, best first, then keep `limit`.
pub fn rank(mut candidates: Vec<ScoredCandidate>, limit: usize) -> Vec<ScoredCandidate> {
    candidates.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(limit);
    candidates
}

/// Run every fusion step over the raw branch results.
pub fn fuse(
    lexical: &[LexicalHit],
    semantic: &[Neighbor],
    metric: Metric,
    documents: &DocumentStore,
    profile: &ImportanceProfile,
    semantic_weight: f64,
    limit: usize,
) -> Vec<SearchHit> {
    fuse_filtered(
        lexical,
        semantic,
        metric,
        documents,
        profile,
        semantic_weight,
        limit,
        &|_| false,
    )
}

/// [`fuse`], additionally dropping every candidate for which `excluded`
/// holds (for example, documents matching a negated query term).
///
/// Candidates without a stored document, excluded candidates, and
/// candidates with no keyword and no semantic relevance are all dropped
/// before normalization, so the importance bonus alone never makes a hit.
#[allow(clippy::too_many_arguments)]
pub fn fuse_filtered(
    lexical: &[LexicalHit],
    semantic: &[Neighbor],
    metric: Metric,
    documents: &DocumentStore,
    profile: &ImportanceProfile,
    semantic_weight: f64,
    limit: usize,
    excluded: &dyn Fn(&Message) -> bool,
) -> Vec<SearchHit> {
    if limit == 0 {
        return Vec::new();
    }

    let mut candidates: Vec<ScoredCandidate> = union_candidates(lexical, semantic, metric)
        .into_iter()
        .filter(|c| c.keyword_score > 0.0 || c.semantic_score > 0.0)
        .filter(|c| match documents.get(&c.message_id) {
            Some(message) => !excluded(message),
            None => {
                warn!(message_id = %c.message_id, "Candidate has no stored document, dropped");
                false
            }
        })
        .collect();

    normalize(&mut candidates);

    for c in candidates.iter_mut() {
        if let Some(message) = documents.get(&c.message_id) {
            c.importance_bonus = importance_bonus(message, profile);
        }
        c.hybrid_score = hybrid_score(
            c.normalized_keyword_score,
            c.normalized_semantic_score,
            semantic_weight,
        );
        c.final_score = c.hybrid_score + c.importance_bonus;
    }

    rank(candidates, limit)
        .into_iter()
        .filter_map(|scores| {
            documents.get(&scores.message_id).map(|m| SearchHit {
                message: m.clone(),
                scores,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn lex(id: &str, score: f64) -> LexicalHit {
        LexicalHit {
            message_id: id.to_string(),
            score,
        }
    }

    fn sem(id: &str, raw: f64) -> Neighbor {
        Neighbor {
            message_id: id.to_string(),
            raw,
        }
    }

    fn doc(id: &str, sender: &str, recipients: &[&str]) -> Message {
        Message {
            id: id.to_string(),
            sender: sender.to_string(),
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    fn profile(main: &str, contacts: &[&str]) -> ImportanceProfile {
        ImportanceProfile {
            main_user: Some(main.to_string()),
            important_contacts: contacts.iter().map(|c| c.to_string()).collect::<BTreeSet<_>>(),
        }
    }

    #[test]
    fn test_weight_validation() {
        assert!(validate_weight(0.0).is_ok());
        assert!(validate_weight(1.0).is_ok());
        assert!(validate_weight(0.3).is_ok());
        assert!(validate_weight(-0.01).is_err());
        assert!(validate_weight(1.01).is_err());
        assert!(validate_weight(f64::NAN).is_err());
    }

    #[test]
    fn test_union_order_and_zero_fill() {
        let c = union_candidates(
            &[lex("a", 2.0), lex("b", 1.0)],
            &[sem("c", 0.9), sem("a", 0.4)],
            Metric::Cosine,
        );
        let ids: Vec<&str> = c.iter().map(|c| c.message_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(c[0].semantic_score, 0.4);
        assert_eq!(c[1].semantic_score, 0.0);
        assert_eq!(c[2].keyword_score, 0.0);
    }

    #[test]
    fn test_union_duplicate_keeps_first_position_and_max() {
        let c = union_candidates(&[lex("a", 1.0), lex("b", 2.0), lex("a", 3.0)], &[], Metric::Cosine);
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].message_id, "a");
        assert_eq!(c[0].keyword_score, 3.0);
    }

    #[test]
    fn test_union_converts_l2_distance() {
        let c = union_candidates(&[], &[sem("a", 1.0)], Metric::L2);
        assert!((c[0].semantic_score - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_normalize_max_is_one() {
        let mut c = union_candidates(&[lex("a", 4.0), lex("b", 2.0)], &[], Metric::Cosine);
        normalize(&mut c);
        assert_eq!(c[0].normalized_keyword_score, 1.0);
        assert_eq!(c[1].normalized_keyword_score, 0.5);
        assert!(c.iter().all(|c| c.normalized_semantic_score == 0.0));
    }

    #[test]
    fn test_normalize_zero_max() {
        let mut c = union_candidates(&[lex("a", 0.0)], &[sem("b", -0.5)], Metric::Cosine);
        normalize(&mut c);
        assert!(c.iter().all(|c| c.normalized_keyword_score == 0.0));
        assert!(c.iter().all(|c| c.normalized_semantic_score == 0.0));
    }

    #[test]
    fn test_bonus_parts() {
        let p = profile("me@co.com", &["boss@co.com"]);
        assert_eq!(importance_bonus(&doc("1", "me@co.com", &["x@y.z"]), &p), 0.5);
        assert_eq!(importance_bonus(&doc("2", "x@y.z", &["me@co.com"]), &p), 0.2);
        assert!((importance_bonus(&doc("3", "boss@co.com", &["me@co.com"]), &p) - 0.5).abs() < 1e-12);
        assert_eq!(importance_bonus(&doc("4", "x@y.z", &[]), &p), 0.0);
    }

    #[test]
    fn test_self_addressed_main_user_exceeds_half() {
        let p = profile("me@co.com", &[]);
        let bonus = importance_bonus(&doc("1", "me@co.com", &["me@co.com"]), &p);
        assert!(bonus >= 0.5);
        assert!((bonus - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_main_user_who_is_also_important_earns_full_bonus() {
        // A main user mailing themselves counts as their own contact
        let p = profile("me@co.com", &["me@co.com"]);
        let bonus = importance_bonus(&doc("1", "me@co.com", &["me@co.com"]), &p);
        assert!((bonus - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_profile_gives_no_bonus() {
        let bonus = importance_bonus(&doc("1", "", &[""]), &ImportanceProfile::empty());
        assert_eq!(bonus, 0.0);
    }

    #[test]
    fn test_hybrid_moves_toward_semantic_as_weight_grows() {
        let (nk, ns) = (0.9, 0.2);
        let mut prev = hybrid_score(nk, ns, 0.0);
        assert_eq!(prev, nk);
        for step in 1..=10 {
            let w = f64::from(step) / 10.0;
            let h = hybrid_score(nk, ns, w);
            assert!(h <= prev);
            assert!((h - ns).abs() <= (prev - ns).abs());
            prev = h;
        }
        assert!((prev - ns).abs() < 1e-12);
    }

    #[test]
    fn test_tie_keeps_union_order() {
        // "status": A only lexical (4.0), C only semantic (0.8), w = 0.5
        let docs = DocumentStore::new(vec![
            doc("A", "boss@co.com", &["me@co.com"]),
            doc("B", "me@co.com", &["boss@co.com", "vendor@ext.com"]),
            doc("C", "vendor@ext.com", &["me@co.com"]),
        ]);
        let hits = fuse(
            &[lex("A", 4.0)],
            &[sem("C", 0.8)],
            Metric::Cosine,
            &docs,
            &ImportanceProfile::empty(),
            0.5,
            10,
        );
        let ids: Vec<&str> = hits.iter().map(|h| h.scores.message_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C"]);
        assert_eq!(hits[0].scores.hybrid_score, 0.5);
        assert_eq!(hits[1].scores.hybrid_score, 0.5);
        assert_eq!(hits[0].scores.final_score, hits[1].scores.final_score);
    }

    #[test]
    fn test_bonus_can_reorder() {
        let docs = DocumentStore::new(vec![
            doc("x", "stranger@ext.com", &[]),
            doc("y", "me@co.com", &[]),
        ]);
        let hits = fuse(
            &[lex("x", 4.0), lex("y", 3.0)],
            &[],
            Metric::Cosine,
            &docs,
            &profile("me@co.com", &[]),
            0.0,
            10,
        );
        assert_eq!(hits[0].message.id, "y");
        assert!((hits[0].scores.final_score - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_ids_dropped_before_normalization() {
        let docs = DocumentStore::new(vec![doc("a", "", &[])]);
        let hits = fuse(
            &[lex("ghost", 10.0), lex("a", 2.0)],
            &[],
            Metric::Cosine,
            &docs,
            &ImportanceProfile::empty(),
            0.0,
            10,
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].scores.normalized_keyword_score, 1.0);
    }

    #[test]
    fn test_zero_relevance_candidates_dropped() {
        let docs = DocumentStore::new(vec![
            doc("a", "me@co.com", &["me@co.com"]),
            doc("b", "me@co.com", &[]),
            doc("c", "x@y.z", &[]),
        ]);
        let p = profile("me@co.com", &["me@co.com"]);

        let hits = fuse(
            &[lex("a", 0.0)],
            &[sem("b", -0.3), sem("c", 0.0)],
            Metric::Cosine,
            &docs,
            &p,
            0.5,
            10,
        );
        assert!(hits.is_empty());

        let hits = fuse(&[lex("c", 1.0)], &[sem("b", -0.3)], Metric::Cosine, &docs, &p, 0.5, 10);
        let ids: Vec<&str> = hits.iter().map(|h| h.message.id.as_str()).collect();
        assert_eq!(ids, vec!["c"]);
    }

    #[test]
    fn test_excluded_candidates_dropped_from_both_branches() {
        let docs = DocumentStore::new(vec![
            doc("a", "spam@ext.com", &[]),
            doc("b", "friend@ext.com", &[]),
            doc("c", "spam@ext.com", &[]),
        ]);
        let hits = fuse_filtered(
            &[lex("a", 3.0), lex("b", 1.0)],
            &[sem("c", 0.9), sem("b", 0.4)],
            Metric::Cosine,
            &docs,
            &ImportanceProfile::empty(),
            0.5,
            10,
            &|m| m.sender.starts_with("spam"),
        );
        let ids: Vec<&str> = hits.iter().map(|h| h.message.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
        // Normalization only sees what survived
        assert_eq!(hits[0].scores.normalized_keyword_score, 1.0);
        assert_eq!(hits[0].scores.normalized_semantic_score, 1.0);
    }

    #[test]
    fn test_limit_respected() {
        let docs = DocumentStore::new((0..5).map(|i| doc(&i.to_string(), "", &[])).collect());
        let lexical: Vec<LexicalHit> = (0..5).map(|i| lex(&i.to_string(), 1.0 + f64::from(i))).collect();
        for limit in 0..7 {
            let hits = fuse(
                &lexical,
                &[],
                Metric::Cosine,
                &docs,
                &ImportanceProfile::empty(),
                0.5,
                limit,
            );
            assert!(hits.len() <= limit);
        }
    }
}
