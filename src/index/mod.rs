//! On-disk index generations.
//!
//! ```text
//! index_dir/
//! ├── CURRENT              name of the live generation
//! ├── gen-000001/
//! │   ├── documents.bin
//! │   ├── lexical.bin
//! │   ├── semantic.bin
//! │   └── profile.json
//! └── gen-000002/ ...
//! ```
//!
//! A generation is written once and never modified. Readers follow
//! `CURRENT`, which is replaced atomically after a build completes.

pub mod builder;
pub mod documents;
pub mod format;
pub mod lexical;
pub mod reader;
pub mod semantic;

use std::path::{Path, PathBuf};

use crate::error::{MailRankError, Result};

/// Pointer file naming the live generation.
pub const CURRENT_FILE: &str = "CURRENT";

/// Importance profile cached next to the index files.
pub const PROFILE_FILE: &str = "profile.json";

const GENERATION_PREFIX: &str = "gen-";

/// Directory name of generation `generation`.
pub fn generation_dir_name(generation: u64) -> String {
    format!("{GENERATION_PREFIX}{generation:06}")
}

/// Inverse of [`generation_dir_name`].
pub fn parse_generation(name: &str) -> Option<u64> {
    name.strip_prefix(GENERATION_PREFIX)?.parse().ok()
}

/// Path of generation `generation` inside `index_dir`.
pub fn generation_path(index_dir: &Path, generation: u64) -> PathBuf {
    index_dir.join(generation_dir_name(generation))
}

/// Every generation present in `index_dir`, ascending. Empty if the directory is missing.
pub fn list_generations(index_dir: &Path) -> Result<Vec<u64>> {
    let entries = match std::fs::read_dir(index_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(MailRankError::io(index_dir, e)),
    };

    let mut generations = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| MailRankError::io(index_dir, e))?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(generation) = entry.file_name().to_str().and_then(parse_generation) {
            generations.push(generation);
        }
    }
    generations.sort_unstable();
    Ok(generations)
}

/// Read the live generation number from `CURRENT`.
pub fn current_generation(index_dir: &Path) -> Result<u64> {
    let pointer = index_dir.join(CURRENT_FILE);
    let contents = std::fs::read_to_string(&pointer).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MailRankError::unavailable(&pointer, "no index has been built")
        } else {
            MailRankError::io(&pointer, e)
        }
    })?;
    parse_generation(contents.trim()).ok_or_else(|| MailRankError::InvalidIndex {
        path: pointer.clone(),
        reason: format!("unrecognized generation name '{}'", contents.trim()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_names() {
        assert_eq!(generation_dir_name(7), "gen-000007");
        assert_eq!(parse_generation("gen-000007"), Some(7));
        assert_eq!(parse_generation("gen-1234567"), Some(1_234_567));
        assert_eq!(parse_generation("CURRENT"), None);
        assert_eq!(parse_generation("gen-abc"), None);
    }

    #[test]
    fn test_list_generations_ignores_other_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("gen-000003")).unwrap();
        std::fs::create_dir(dir.path().join("gen-000001")).unwrap();
        std::fs::create_dir(dir.path().join("scratch")).unwrap();
        std::fs::write(dir.path().join("gen-000009"), b"not a dir").unwrap();
        assert_eq!(list_generations(dir.path()).unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_missing_dir_has_no_generations() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_generations(&dir.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn test_missing_current_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = current_generation(dir.path()).unwrap_err();
        assert!(matches!(err, MailRankError::IndexUnavailable { .. }));
    }
}
