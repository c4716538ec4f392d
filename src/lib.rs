//! `mailrank`: hybrid keyword and semantic retrieval over personal mail archives.
//!
//! This crate provides the core library: ingestion of EML/MBOX sources into a
//! message store, contact-graph analysis, persisted lexical and semantic
//! indexes, and the hybrid query engine that fuses both rankings with a
//! social-importance bonus.

pub mod config;
pub mod contacts;
pub mod embedding;
pub mod error;
pub mod i18n;
pub mod index;
pub mod ingest;
pub mod model;
pub mod parser;
pub mod search;
pub mod store;
