//! The canonical message record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One mail item, normalized from whatever container it came from.
///
/// String fields are never absent: ingestion stores `""` when a header or
/// body is missing, so downstream code never has to distinguish "empty"
/// from "unknown".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    /// Unique within one archive and stable across rebuilds of the same source.
    pub id: String,

    /// Decoded subject line.
    pub subject: String,

    /// Plain-text body (HTML-only messages are converted to text).
    pub body_text: String,

    /// Concatenated text extracted from textual attachments.
    pub body_attachment_text: String,

    /// Sender address. Empty if unrecoverable.
    pub sender: String,

    /// `To` followed by `Cc` addresses, first occurrence order, duplicates removed.
    pub recipients: Vec<String>,

    /// Parsed `Date:` header.
    pub sent_at: Option<DateTime<Utc>>,

    /// Folder the message was found in, relative to the ingestion root.
    pub folder_path: String,

    /// `Thread-Topic` header, or the subject without reply/forward prefixes.
    pub thread_topic: String,
}

impl Message {
    /// Whether `address` is one of the recipients (exact, case-sensitive match).
    pub fn has_recipient(&self, address: &str) -> bool {
        self.recipients.iter().any(|r| r == address)
    }

    /// Text handed to the embedding collaborator, capped at `max_chars` characters.
    pub fn embedding_text(&self, max_chars: usize) -> String {
        let mut text = String::with_capacity(
            self.subject.len() + self.body_text.len() + self.body_attachment_text.len() + 2,
        );
        for part in [&self.subject, &self.body_text, &self.body_attachment_text] {
            if part.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(part);
        }
        match text.char_indices().nth(max_chars) {
            Some((cut, _)) => text[..cut].to_string(),
            None => text,
        }
    }
}

/// Remove duplicate addresses while keeping first-occurrence order.
///
/// Empty strings are dropped as well.
pub fn dedup_addresses<I>(addresses: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = std::collections::HashSet::new();
    addresses
        .into_iter()
        .filter(|a| !a.is_empty() && seen.insert(a.clone()))
        .collect()
}
