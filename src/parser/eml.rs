//! Directories of individual `.eml` files (RFC 5322 messages without MBOX framing).

use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::error::{MailRankError, Result};
use crate::model::message::Message;
use crate::parser::mime;

/// Read and parse a single `.eml` file.
pub fn read_eml(path: &Path, id: &str, folder_path: &str) -> Result<Message> {
    let data = std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MailRankError::SourceNotFound(path.to_path_buf())
        } else {
            MailRankError::io(path, e)
        }
    })?;
    mime::parse_message(&data, id, folder_path)
}

/// Every `.eml` file under `root`, in a stable (file name) order.
///
/// Unreadable directory entries are logged and skipped.
pub fn find_eml_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(MailRankError::SourceNotFound(root.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };
        if entry.file_type().is_file() && is_eml(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Whether `path` has an `.eml` extension (any case).
pub fn is_eml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("eml"))
}
