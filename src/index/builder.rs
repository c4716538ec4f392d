//! Index construction and persistence.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::contacts::{self, ImportanceProfile};
use crate::embedding::Embedder;
use crate::error::{MailRankError, Result};
use crate::index::documents::DocumentStore;
use crate::index::format::{self, FileKind};
use crate::index::lexical::LexicalIndex;
use crate::index::semantic::{Metric, SemanticIndex};
use crate::index::{
    generation_dir_name, generation_path, list_generations, CURRENT_FILE, PROFILE_FILE,
};
use crate::model::message::Message;

/// Knobs for [`build_index`].
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Vector comparison for the semantic index.
    pub metric: Metric,
    /// Characters of each message fed to the embedder.
    pub max_chars: usize,
    /// Generations kept after the swap, the new one included (minimum 1).
    pub keep_generations: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            metric: Metric::Cosine,
            max_chars: 8000,
            keep_generations: 2,
        }
    }
}

/// What a build produced.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub generation: u64,
    pub path: PathBuf,
    pub messages: usize,
    pub lexical_terms: usize,
    pub vectors: usize,
    pub bytes_written: u64,
    pub profile: ImportanceProfile,
    /// Generations deleted by retention.
    pub pruned: Vec<u64>,
}

/// Build a new index generation from `messages` and make it current.
///
/// 1. Analyze the contact graph.
/// 2. Build the lexical index and embed every message.
/// 3. Write all files into a fresh generation directory.
/// 4. Atomically point `CURRENT` at it, then prune old generations.
///
/// `progress` receives `(embedded, total)`.
pub fn build_index(
    index_dir: &Path,
    messages: Vec<Message>,
    embedder: &dyn Embedder,
    options: &BuildOptions,
    progress: Option<&dyn Fn(u64, u64)>,
) -> Result<BuildReport> {
    std::fs::create_dir_all(index_dir).map_err(|e| MailRankError::io(index_dir, e))?;

    let generation = list_generations(index_dir)?.last().map_or(1, |g| g + 1);
    info!(
        path = %index_dir.display(),
        generation,
        messages = messages.len(),
        "Building index"
    );

    let profile = contacts::analyze(&messages);
    let lexical = LexicalIndex::build(&messages);

    let total = messages.len() as u64;
    let mut semantic = SemanticIndex::new(
        embedder.dimension(),
        options.metric,
        embedder.model_name(),
    );
    for (i, msg) in messages.iter().enumerate() {
        let vector = embedder.embed(&msg.embedding_text(options.max_chars))?;
        semantic.add(msg.id.clone(), &vector)?;
        if let Some(cb) = progress {
            cb(i as u64 + 1, total);
        }
    }

    let documents = DocumentStore::new(messages);

    let gen_path = generation_path(index_dir, generation);
    if gen_path.exists() {
        // Leftover from an interrupted build
        std::fs::remove_dir_all(&gen_path).map_err(|e| MailRankError::io(&gen_path, e))?;
    }
    std::fs::create_dir_all(&gen_path).map_err(|e| MailRankError::io(&gen_path, e))?;

    let mut bytes_written = 0u64;
    bytes_written += format::write_file(
        &gen_path.join(FileKind::Documents.file_name()),
        FileKind::Documents,
        documents.len() as u64,
        &documents,
    )?;
    bytes_written += format::write_file(
        &gen_path.join(FileKind::Lexical.file_name()),
        FileKind::Lexical,
        lexical.len() as u64,
        &lexical,
    )?;
    bytes_written += format::write_file(
        &gen_path.join(FileKind::Semantic.file_name()),
        FileKind::Semantic,
        semantic.len() as u64,
        &semantic,
    )?;

    let profile_path = gen_path.join(PROFILE_FILE);
    let profile_json = serde_json::to_vec_pretty(&profile)?;
    std::fs::write(&profile_path, &profile_json).map_err(|e| MailRankError::io(&profile_path, e))?;
    bytes_written += profile_json.len() as u64;

    swap_current(index_dir, generation)?;
    let pruned = prune_generations(index_dir, generation, options.keep_generations);

    info!(
        generation,
        bytes = bytes_written,
        pruned = pruned.len(),
        "Index written"
    );

    Ok(BuildReport {
        generation,
        path: gen_path,
        messages: documents.len(),
        lexical_terms: lexical.term_count(),
        vectors: semantic.len(),
        bytes_written,
        profile,
        pruned,
    })
}

/// Replace `CURRENT` with a pointer to `generation` (write temp, then rename).
fn swap_current(index_dir: &Path, generation: u64) -> Result<()> {
    let tmp = index_dir.join(format!("{CURRENT_FILE}.tmp"));
    let target = index_dir.join(CURRENT_FILE);
    std::fs::write(&tmp, generation_dir_name(generation)).map_err(|e| MailRankError::io(&tmp, e))?;
    std::fs::rename(&tmp, &target).map_err(|e| MailRankError::io(&target, e))?;
    debug!(generation, "CURRENT updated");
    Ok(())
}

/// Delete all but the newest `keep` generations, never the current one.
///
/// Failures are logged: an undeletable old generation does not fail the build.
fn prune_generations(index_dir: &Path, current: u64, keep: usize) -> Vec<u64> {
    let generations = match list_generations(index_dir) {
        Ok(g) => g,
        Err(e) => {
            warn!(error = %e, "Could not list generations for pruning");
            return Vec::new();
        }
    };

    let keep = keep.max(1);
    let cutoff = generations.len().saturating_sub(keep);
    let mut pruned = Vec::new();
    for &generation in &generations[..cutoff] {
        if generation == current {
            continue;
        }
        let path = generation_path(index_dir, generation);
        match std::fs::remove_dir_all(&path) {
            Ok(()) => {
                debug!(generation, "Pruned old generation");
                pruned.push(generation);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Could not prune generation"),
        }
    }
    pruned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::index::current_generation;

    fn messages() -> Vec<Message> {
        vec![
            Message {
                id: "1".into(),
                subject: "Status report".into(),
                sender: "me@co.com".into(),
                recipients: vec!["boss@co.com".into()],
                ..Default::default()
            },
            Message {
                id: "2".into(),
                subject: "Lunch".into(),
                sender: "boss@co.com".into(),
                recipients: vec!["me@co.com".into()],
                ..Default::default()
            },
        ]
    }

    #[test]
    fn test_build_writes_generation_and_current() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = HashingEmbedder::new(16).unwrap();
        let report = build_index(
            dir.path(),
            messages(),
            &embedder,
            &BuildOptions::default(),
            None,
        )
        .unwrap();

        assert_eq!(report.generation, 1);
        assert_eq!(report.messages, 2);
        assert_eq!(report.vectors, 2);
        assert_eq!(report.profile.main_user.as_deref(), Some("me@co.com"));
        assert_eq!(current_generation(dir.path()).unwrap(), 1);
        for name in ["documents.bin", "lexical.bin", "semantic.bin", "profile.json"] {
            assert!(report.path.join(name).exists(), "{name} missing");
        }
        assert!(!dir.path().join("CURRENT.tmp").exists());
    }

    #[test]
    fn test_rebuild_advances_and_prunes() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = HashingEmbedder::new(16).unwrap();
        let options = BuildOptions {
            keep_generations: 2,
            ..Default::default()
        };
        for _ in 0..3 {
            build_index(dir.path(), messages(), &embedder, &options, None).unwrap();
        }
        assert_eq!(current_generation(dir.path()).unwrap(), 3);
        assert_eq!(list_generations(dir.path()).unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_keep_zero_still_keeps_current() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = HashingEmbedder::new(16).unwrap();
        let options = BuildOptions {
            keep_generations: 0,
            ..Default::default()
        };
        build_index(dir.path(), messages(), &embedder, &options, None).unwrap();
        let report = build_index(dir.path(), messages(), &embedder, &options, None).unwrap();
        assert_eq!(report.pruned, vec![1]);
        assert_eq!(list_generations(dir.path()).unwrap(), vec![2]);
    }

    #[test]
    fn test_progress_reports_every_message() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = HashingEmbedder::new(16).unwrap();
        let calls = std::cell::RefCell::new(Vec::new());
        let cb = |done: u64, total: u64| calls.borrow_mut().push((done, total));
        build_index(
            dir.path(),
            messages(),
            &embedder,
            &BuildOptions::default(),
            Some(&cb),
        )
        .unwrap();
        assert_eq!(*calls.borrow(), vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn test_empty_archive_builds() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = HashingEmbedder::new(16).unwrap();
        let report =
            build_index(dir.path(), Vec::new(), &embedder, &BuildOptions::default(), None).unwrap();
        assert_eq!(report.messages, 0);
        assert_eq!(report.profile, ImportanceProfile::empty());
    }
}
