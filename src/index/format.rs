//! Binary index file format.
//!
//! Every file inside an index generation (documents, lexical, semantic)
//! shares one layout:
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ HEADER (64 bytes, fixed)             │
//! │  magic: [u8; 8] = b"MAILRNK\0"       │
//! │  version: u32                        │
//! │  kind: u8                            │
//! │  count: u64                          │
//! │  payload_len: u64                    │
//! │  payload_sha256: [u8; 32]            │
//! │  (padding to 64 bytes)               │
//! ├──────────────────────────────────────┤
//! │ PAYLOAD (variable)                   │
//! │  bincode-serialized structure        │
//! └──────────────────────────────────────┘
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{MailRankError, Result};

/// Magic bytes identifying a mailrank index file.
pub const MAGIC: &[u8; 8] = b"MAILRNK\0";

/// Current index format version.
pub const VERSION: u32 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 64;

/// What a file inside a generation holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileKind {
    Documents = 1,
    Lexical = 2,
    Semantic = 3,
}

impl FileKind {
    /// File name inside a generation directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Documents => "documents.bin",
            Self::Lexical => "lexical.bin",
            Self::Semantic => "semantic.bin",
        }
    }
}

/// Serializable file header.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct IndexHeader {
    /// Magic bytes (must equal [`MAGIC`]).
    pub magic: [u8; 8],
    /// Format version (must equal [`VERSION`]).
    pub version: u32,
    /// [`FileKind`] discriminant.
    pub kind: u8,
    /// Number of records in the payload (messages, vectors, ...).
    pub count: u64,
    /// Payload length in bytes.
    pub payload_len: u64,
    /// SHA-256 of the payload.
    pub payload_sha256: [u8; 32],
}

impl IndexHeader {
    /// Validate that the header is well-formed and of the expected kind.
    pub fn validate(&self, expected: FileKind) -> std::result::Result<(), String> {
        if self.magic != *MAGIC {
            return Err("Invalid magic bytes".into());
        }
        if self.version != VERSION {
            return Err(format!(
                "Incompatible version: expected {VERSION}, found {}",
                self.version
            ));
        }
        if self.kind != expected as u8 {
            return Err(format!(
                "Wrong file kind: expected {}, found {}",
                expected as u8, self.kind
            ));
        }
        Ok(())
    }
}

/// Serialize `value` behind a header and write it to `path`.
///
/// Returns the number of bytes written.
pub fn write_file<T: Serialize>(
    path: &Path,
    kind: FileKind,
    count: u64,
    value: &T,
) -> Result<u64> {
    let payload = bincode::serialize(value)?;

    let header = IndexHeader {
        magic: *MAGIC,
        version: VERSION,
        kind: kind as u8,
        count,
        payload_len: payload.len() as u64,
        payload_sha256: Sha256::digest(&payload).into(),
    };
    let header_bytes = bincode::serialize(&header)?;

    // Pad header to HEADER_SIZE
    let mut padded_header = vec![0u8; HEADER_SIZE];
    let copy_len = header_bytes.len().min(HEADER_SIZE);
    padded_header[..copy_len].copy_from_slice(&header_bytes[..copy_len]);

    let mut file = File::create(path).map_err(|e| MailRankError::io(path, e))?;
    file.write_all(&padded_header)
        .map_err(|e| MailRankError::io(path, e))?;
    file.write_all(&payload)
        .map_err(|e| MailRankError::io(path, e))?;
    file.sync_all().map_err(|e| MailRankError::io(path, e))?;

    debug!(path = %path.display(), kind = ?kind, count, "Index file written");
    Ok((HEADER_SIZE + payload.len()) as u64)
}

/// Read and validate a file written by [`write_file`].
///
/// A missing file is reported as `IndexUnavailable`; anything else that is
/// wrong with it as `InvalidIndex`.
pub fn read_file<T: DeserializeOwned>(path: &Path, kind: FileKind) -> Result<(IndexHeader, T)> {
    let data = std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MailRankError::unavailable(path, "file not found")
        } else {
            MailRankError::io(path, e)
        }
    })?;

    let invalid = |reason: String| MailRankError::InvalidIndex {
        path: path.to_path_buf(),
        reason,
    };

    if data.len() < HEADER_SIZE {
        return Err(invalid("File too small".into()));
    }

    let header: IndexHeader = bincode::deserialize(&data[..HEADER_SIZE])
        .map_err(|e| invalid(format!("Header deserialization failed: {e}")))?;
    header.validate(kind).map_err(invalid)?;

    let payload = &data[HEADER_SIZE..];
    if payload.len() as u64 != header.payload_len {
        return Err(invalid(format!(
            "Payload length mismatch: header says {}, file has {}",
            header.payload_len,
            payload.len()
        )));
    }
    let digest: [u8; 32] = Sha256::digest(payload).into();
    if digest != header.payload_sha256 {
        return Err(invalid("Payload checksum mismatch".into()));
    }

    let value: T = bincode::deserialize(payload)
        .map_err(|e| invalid(format!("Payload deserialization failed: {e}")))?;
    Ok((header, value))
}
