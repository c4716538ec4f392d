//! SQLite message store.
//!
//! Ingestion writes canonical [`Message`] records here; index builds read
//! them back in ingestion order.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use tracing::{debug, info};

use crate::error::{MailRankError, Result};
use crate::model::message::Message;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    subject TEXT NOT NULL,
    body_text TEXT NOT NULL,
    body_attachment_text TEXT NOT NULL,
    sender TEXT NOT NULL,
    recipients TEXT NOT NULL,  -- JSON array
    sent_at TEXT,              -- RFC 3339
    folder_path TEXT NOT NULL,
    thread_topic TEXT NOT NULL,
    ingested_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender);
"#;

/// Message database.
pub struct MessageStore {
    conn: Connection,
}

impl MessageStore {
    /// Start a fresh database at `path`, replacing any existing file.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| MailRankError::io(parent, e))?;
        }
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let file = path.with_file_name(format!(
                "{}{suffix}",
                path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
            ));
            match std::fs::remove_file(&file) {
                Ok(()) => debug!(path = %file.display(), "Removed previous database file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(MailRankError::io(&file, e)),
            }
        }

        let store = Self {
            conn: Connection::open(path)?,
        };
        store.init_schema()?;
        info!(path = %path.display(), "Message store created");
        Ok(store)
    }

    /// Open an existing database.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(MailRankError::SourceNotFound(path.to_path_buf()));
        }
        let store = Self {
            conn: Connection::open(path)?,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Insert `messages` in one transaction. A repeated id replaces the stored row.
    pub fn insert_batch(&mut self, messages: &[Message]) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                r#"
                INSERT OR REPLACE INTO messages
                    (id, subject, body_text, body_attachment_text, sender,
                     recipients, sent_at, folder_path, thread_topic, ingested_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )?;
            for msg in messages {
                let recipients = serde_json::to_string(&msg.recipients)?;
                stmt.execute(params![
                    msg.id,
                    msg.subject,
                    msg.body_text,
                    msg.body_attachment_text,
                    msg.sender,
                    recipients,
                    msg.sent_at.map(|d| d.to_rfc3339()),
                    msg.folder_path,
                    msg.thread_topic,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        debug!(count = messages.len(), "Batch stored");
        Ok(messages.len())
    }

    /// Every stored message, in ingestion order.
    pub fn load_all(&self) -> Result<Vec<Message>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, subject, body_text, body_attachment_text, sender,
                   recipients, sent_at, folder_path, thread_topic
            FROM messages
            ORDER BY rowid
            "#,
        )?;
        let rows = stmt.query_map([], row_to_message)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Number of stored messages.
    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let recipients_json: String = row.get(5)?;
    let recipients: Vec<String> = serde_json::from_str(&recipients_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    let sent_at = match row.get::<_, Option<String>>(6)? {
        Some(s) => Some(
            DateTime::parse_from_rfc3339(&s)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    Ok(Message {
        id: row.get(0)?,
        subject: row.get(1)?,
        body_text: row.get(2)?,
        body_attachment_text: row.get(3)?,
        sender: row.get(4)?,
        recipients,
        sent_at,
        folder_path: row.get(7)?,
        thread_topic: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(id: &str) -> Message {
        Message {
            id: id.into(),
            subject: "Budget".into(),
            body_text: "see attached".into(),
            body_attachment_text: "q1 q2".into(),
            sender: "me@co.com".into(),
            recipients: vec!["a@x.com".into(), "b@x.com".into()],
            sent_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()),
            folder_path: "Inbox".into(),
            thread_topic: "Budget".into(),
        }
    }

    #[test]
    fn test_insert_and_load_preserves_fields_and_order() {
        let mut store = MessageStore::open_in_memory().unwrap();
        let mut undated = sample("b");
        undated.sent_at = None;
        store.insert_batch(&[sample("z"), undated.clone()]).unwrap();
        store.insert_batch(&[sample("a")]).unwrap();

        let loaded = store.load_all().unwrap();
        let ids: Vec<&str> = loaded.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "b", "a"]);
        assert_eq!(loaded[0], sample("z"));
        assert_eq!(loaded[1], undated);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_create_replaces_existing_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("emails.db");
        {
            let mut store = MessageStore::create(&path).unwrap();
            store.insert_batch(&[sample("1")]).unwrap();
        }
        assert_eq!(MessageStore::open(&path).unwrap().count().unwrap(), 1);

        let store = MessageStore::create(&path).unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_open_missing_database() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            MessageStore::open(&dir.path().join("nope.db")),
            Err(MailRankError::SourceNotFound(_))
        ));
    }
}
