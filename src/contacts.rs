//! Contact-graph analysis: who owns the archive, and who they talk to most.
//!
//! The archive owner ("main user") is inferred from sending frequency, and
//! their closest correspondents from how often mail flows between them and
//! the owner. Both feed the importance bonus applied at query time.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::message::Message;

/// Maximum number of important contacts kept in a profile.
pub const MAX_IMPORTANT_CONTACTS: usize = 10;

/// Social-importance signals derived from a message collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportanceProfile {
    /// Inferred owner of the archive.
    pub main_user: Option<String>,
    /// At most [`MAX_IMPORTANT_CONTACTS`] addresses with the most interactions.
    pub important_contacts: BTreeSet<String>,
}

impl ImportanceProfile {
    /// A profile with no owner and no contacts (no bonus is ever applied).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether `address` is the main user.
    pub fn is_main_user(&self, address: &str) -> bool {
        self.main_user.as_deref() == Some(address)
    }

    /// Whether `address` is one of the important contacts.
    pub fn is_important(&self, address: &str) -> bool {
        self.important_contacts.contains(address)
    }
}

/// Full output of the analysis, for reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContactReport {
    /// The derived profile.
    pub profile: ImportanceProfile,
    /// Every non-empty sender with its message count, most frequent first.
    pub sender_counts: Vec<(String, usize)>,
    /// Every address that interacted with the main user, most frequent first.
    pub interactions: Vec<(String, usize)>,
}

/// Derive the [`ImportanceProfile`] for a message collection.
///
/// Pure and total: an empty input (or one without any sender) yields an
/// empty profile.
pub fn analyze(messages: &[Message]) -> ImportanceProfile {
    analyze_report(messages).profile
}

/// Same as [`analyze`], also returning the ranked count tables.
pub fn analyze_report(messages: &[Message]) -> ContactReport {
    let sender_counts = ranked(messages.iter().map(|m| m.sender.as_str()));

    if sender_counts.is_empty() {
        debug!(messages = messages.len(), "No senders found, empty profile");
        return ContactReport::default();
    }

    // Prefer senders that look like addresses; some archives carry bare
    // display names or role titles in the sender field.
    let main_user = sender_counts
        .iter()
        .find(|(sender, _)| sender.contains('@'))
        .unwrap_or(&sender_counts[0])
        .0
        .clone();

    let credited = messages.iter().flat_map(|m| {
        let targets: Vec<&str> = if m.sender == main_user {
            m.recipients.iter().map(String::as_str).collect()
        } else if m.has_recipient(&main_user) {
            vec![m.sender.as_str()]
        } else {
            Vec::new()
        };
        targets
    });
    let interactions = ranked(credited);

    let important_contacts = interactions
        .iter()
        .take(MAX_IMPORTANT_CONTACTS)
        .map(|(addr, _)| addr.clone())
        .collect();

    debug!(
        main_user = %main_user,
        senders = sender_counts.len(),
        contacts = interactions.len(),
        "Contact analysis complete"
    );

    ContactReport {
        profile: ImportanceProfile {
            main_user: Some(main_user),
            important_contacts,
        },
        sender_counts,
        interactions,
    }
}

/// Count occurrences of each non-empty key and order them by count
/// descending, ties in first-seen order.
fn ranked<'a>(keys: impl Iterator<Item = &'a str>) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    let mut slot: HashMap<&'a str, usize> = HashMap::new();

    for key in keys.filter(|k| !k.is_empty()) {
        match slot.get(key) {
            Some(&i) => counts[i].1 += 1,
            None => {
                slot.insert(key, counts.len());
                counts.push((key.to_string(), 1));
            }
        }
    }

    // `sort_by` is stable, which gives the first-seen tie-break.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(sender: &str, recipients: &[&str]) -> Message {
        Message {
            sender: sender.to_string(),
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_input_gives_empty_profile() {
        assert_eq!(analyze(&[]), ImportanceProfile::empty());
    }

    #[test]
    fn test_only_empty_senders_gives_empty_profile() {
        let profile = analyze(&[msg("", &["me@co.com"]), msg("", &[])]);
        assert!(profile.main_user.is_none());
        assert!(profile.important_contacts.is_empty());
    }

    #[test]
    fn test_main_user_is_top_sender_with_at() {
        let messages = vec![
            msg("PM", &["me@co.com"]),
            msg("PM", &["me@co.com"]),
            msg("PM", &["me@co.com"]),
            msg("me@co.com", &["boss@co.com"]),
            msg("me@co.com", &["boss@co.com"]),
            msg("boss@co.com", &["me@co.com"]),
        ];
        let profile = analyze(&messages);
        // "PM" sends the most but has no '@'
        assert_eq!(profile.main_user.as_deref(), Some("me@co.com"));
    }

    #[test]
    fn test_fallback_when_no_sender_has_at() {
        let messages = vec![
            msg("Alice", &["Bob"]),
            msg("Bob", &["Alice"]),
            msg("Bob", &["Carol"]),
        ];
        let profile = analyze(&messages);
        assert_eq!(profile.main_user.as_deref(), Some("Bob"));
    }

    #[test]
    fn test_tie_on_sender_count_uses_encounter_order() {
        let messages = vec![
            msg("boss@co.com", &["me@co.com"]),
            msg("me@co.com", &["boss@co.com", "vendor@ext.com"]),
            msg("vendor@ext.com", &["me@co.com"]),
        ];
        let profile = analyze(&messages);
        assert_eq!(profile.main_user.as_deref(), Some("boss@co.com"));
    }

    #[test]
    fn test_interactions_credit_recipients_and_senders() {
        let messages = vec![
            msg("me@co.com", &["boss@co.com", "vendor@ext.com"]),
            msg("me@co.com", &["boss@co.com"]),
            msg("boss@co.com", &["me@co.com"]),
            msg("vendor@ext.com", &["me@co.com"]),
            msg("stranger@ext.com", &["someone@else.com"]),
        ];
        let report = analyze_report(&messages);
        assert_eq!(report.profile.main_user.as_deref(), Some("me@co.com"));
        assert_eq!(
            report.interactions,
            vec![
                ("boss@co.com".to_string(), 3),
                ("vendor@ext.com".to_string(), 2),
            ]
        );
        assert!(report.profile.is_important("boss@co.com"));
        assert!(!report.profile.is_important("stranger@ext.com"));
    }

    #[test]
    fn test_important_contacts_capped_at_ten() {
        let mut messages: Vec<Message> = (0..15)
            .map(|i| msg("me@co.com", &[&format!("c{i}@x.com")]))
            .collect();
        // c14 gets extra interactions and must be included
        messages.push(msg("c14@x.com", &["me@co.com"]));
        let profile = analyze(&messages);
        assert_eq!(profile.important_contacts.len(), MAX_IMPORTANT_CONTACTS);
        assert!(profile.is_important("c14@x.com"));
        // Ties resolved by first-credited order: c0..c8 fill the rest
        assert!(profile.is_important("c0@x.com"));
        assert!(profile.is_important("c8@x.com"));
        assert!(!profile.is_important("c9@x.com"));
    }

    #[test]
    fn test_contacts_are_subset_of_seen_addresses() {
        let messages = vec![
            msg("me@co.com", &["a@x.com", "b@x.com"]),
            msg("c@x.com", &["me@co.com"]),
            msg("me@co.com", &["a@x.com"]),
        ];
        let profile = analyze(&messages);
        let seen: BTreeSet<&str> = messages
            .iter()
            .flat_map(|m| {
                std::iter::once(m.sender.as_str()).chain(m.recipients.iter().map(String::as_str))
            })
            .collect();
        assert!(seen.contains(profile.main_user.as_deref().unwrap()));
        for c in &profile.important_contacts {
            assert!(seen.contains(c.as_str()));
        }
    }
}
