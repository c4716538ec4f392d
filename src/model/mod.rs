//! Core data model: the canonical message record shared by ingestion, indexing and search.

pub mod message;
