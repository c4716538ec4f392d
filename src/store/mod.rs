//! Persistent message storage.

pub mod sqlite;

pub use sqlite::MessageStore;
