//! Email parsing: MBOX streaming, EML directory walking, raw header helpers, and MIME decoding.

pub mod eml;
pub mod header;
pub mod mbox;
pub mod mime;
