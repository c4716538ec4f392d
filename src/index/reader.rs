//! Loading index generations into memory.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::contacts::{self, ImportanceProfile};
use crate::error::{MailRankError, Result};
use crate::index::documents::DocumentStore;
use crate::index::format::{self, FileKind, IndexHeader};
use crate::index::lexical::LexicalIndex;
use crate::index::semantic::{Metric, SemanticIndex};
use crate::index::{current_generation, generation_path, list_generations, PROFILE_FILE};

/// One fully loaded, immutable index generation.
///
/// Either index may be absent (missing or corrupt file); the documents are
/// always present.
#[derive(Debug)]
pub struct IndexSnapshot {
    pub generation: u64,
    pub path: PathBuf,
    pub documents: DocumentStore,
    pub lexical: Option<LexicalIndex>,
    pub semantic: Option<SemanticIndex>,
    pub profile: ImportanceProfile,
}

impl IndexSnapshot {
    /// Load the generation named by `CURRENT` in `index_dir`.
    ///
    /// Errors are `IndexUnavailable` when there is nothing usable to serve.
    pub fn open(index_dir: &Path) -> Result<Self> {
        let generation = current_generation(index_dir).map_err(as_unavailable)?;
        Self::open_generation(index_dir, generation)
    }

    /// Load a specific generation.
    pub fn open_generation(index_dir: &Path, generation: u64) -> Result<Self> {
        let path = generation_path(index_dir, generation);
        if !path.is_dir() {
            return Err(MailRankError::unavailable(&path, "generation directory missing"));
        }

        let (_, mut documents): (IndexHeader, DocumentStore) =
            format::read_file(&path.join(FileKind::Documents.file_name()), FileKind::Documents)
                .map_err(as_unavailable)?;
        documents.rebuild_lookup();

        let lexical = load_optional::<LexicalIndex>(&path, FileKind::Lexical);
        let semantic = load_optional::<SemanticIndex>(&path, FileKind::Semantic);
        let profile = load_profile(&path, &documents);

        debug!(
            generation,
            documents = documents.len(),
            lexical = lexical.is_some(),
            semantic = semantic.is_some(),
            "Index snapshot loaded"
        );

        Ok(Self {
            generation,
            path,
            documents,
            lexical,
            semantic,
            profile,
        })
    }
}

/// Treat a corrupt or unreadable index as "no index".
fn as_unavailable(e: MailRankError) -> MailRankError {
    match e {
        MailRankError::InvalidIndex { path, reason } => MailRankError::IndexUnavailable {
            path,
            reason: format!("invalid index: {reason}"),
        },
        MailRankError::Io { path, source } => MailRankError::IndexUnavailable {
            path,
            reason: source.to_string(),
        },
        other => other,
    }
}

fn load_optional<T: serde::de::DeserializeOwned>(dir: &Path, kind: FileKind) -> Option<T> {
    match format::read_file::<T>(&dir.join(kind.file_name()), kind) {
        Ok((_, value)) => Some(value),
        Err(e) => {
            warn!(kind = ?kind, error = %e, "Index branch unavailable");
            None
        }
    }
}

/// Read `profile.json`, recomputing it from the documents if missing or unreadable.
fn load_profile(dir: &Path, documents: &DocumentStore) -> ImportanceProfile {
    let path = dir.join(PROFILE_FILE);
    let parsed = std::fs::read(&path)
        .map_err(|e| e.to_string())
        .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|e| e.to_string()));
    match parsed {
        Ok(profile) => profile,
        Err(reason) => {
            debug!(path = %path.display(), reason = %reason, "Recomputing importance profile");
            contacts::analyze(documents.messages())
        }
    }
}

/// Summary of an index directory, for the `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub index_dir: PathBuf,
    pub generation: u64,
    pub generations_on_disk: Vec<u64>,
    pub documents: usize,
    pub lexical_terms: Option<usize>,
    pub vectors: Option<usize>,
    pub dimension: Option<usize>,
    pub metric: Option<Metric>,
    pub model: Option<String>,
    pub main_user: Option<String>,
    pub important_contacts: usize,
    pub size_bytes: u64,
}

/// Open the current generation and describe it.
pub fn inspect(index_dir: &Path) -> Result<IndexStatus> {
    let snapshot = IndexSnapshot::open(index_dir)?;

    let mut size_bytes = 0u64;
    let entries =
        std::fs::read_dir(&snapshot.path).map_err(|e| MailRankError::io(&snapshot.path, e))?;
    for entry in entries.flatten() {
        if let Ok(meta) = entry.metadata() {
            size_bytes += meta.len();
        }
    }

    Ok(IndexStatus {
        index_dir: index_dir.to_path_buf(),
        generation: snapshot.generation,
        generations_on_disk: list_generations(index_dir)?,
        documents: snapshot.documents.len(),
        lexical_terms: snapshot.lexical.as_ref().map(LexicalIndex::term_count),
        vectors: snapshot.semantic.as_ref().map(SemanticIndex::len),
        dimension: snapshot.semantic.as_ref().map(SemanticIndex::dimension),
        metric: snapshot.semantic.as_ref().map(SemanticIndex::metric),
        model: snapshot.semantic.as_ref().map(|s| s.model().to_string()),
        main_user: snapshot.profile.main_user.clone(),
        important_contacts: snapshot.profile.important_contacts.len(),
        size_bytes,
    })
}
