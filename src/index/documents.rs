//! Stored message records, addressable by id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::message::Message;

/// The messages of one index generation, in ingestion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentStore {
    messages: Vec<Message>,
    #[serde(skip)]
    by_id: HashMap<String, usize>,
}

impl DocumentStore {
    /// Take ownership of `messages`. A repeated id resolves to its first occurrence.
    pub fn new(messages: Vec<Message>) -> Self {
        let mut store = Self {
            messages,
            by_id: HashMap::new(),
        };
        store.rebuild_lookup();
        store
    }

    /// Recreate the id lookup (it is not persisted).
    pub(crate) fn rebuild_lookup(&mut self) {
        self.by_id.clear();
        self.by_id.reserve(self.messages.len());
        for (i, msg) in self.messages.iter().enumerate() {
            self.by_id.entry(msg.id.clone()).or_insert(i);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.by_id.get(id).map(|&i| &self.messages[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(id: &str, subject: &str) -> Message {
        Message {
            id: id.into(),
            subject: subject.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_lookup_by_id() {
        let store = DocumentStore::new(vec![m("a", "first"), m("b", "second")]);
        assert_eq!(store.get("b").map(|m| m.subject.as_str()), Some("second"));
        assert!(store.get("zzz").is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_duplicate_id_resolves_to_first() {
        let store = DocumentStore::new(vec![m("a", "first"), m("a", "again")]);
        assert_eq!(store.get("a").map(|m| m.subject.as_str()), Some("first"));
    }

    #[test]
    fn test_lookup_restored_after_bincode() {
        let store = DocumentStore::new(vec![m("a", "first")]);
        let bytes = bincode::serialize(&store).unwrap();
        let mut back: DocumentStore = bincode::deserialize(&bytes).unwrap();
        assert!(!back.contains("a"));
        back.rebuild_lookup();
        assert!(back.contains("a"));
    }
}
