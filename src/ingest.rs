//! Ingestion: detect a mail source, stream its messages, and persist them.
//!
//! Supported sources are a directory tree of `.eml` files, a single `.eml`
//! file, and an MBOX file. Outlook stores (`.pst`/`.ost`) are recognised and
//! rejected.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{MailRankError, Result};
use crate::model::message::Message;
use crate::parser::{eml, mbox, mime};
use crate::store::MessageStore;

/// Container format of a mail source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    EmlDirectory,
    EmlFile,
    Mbox,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::EmlDirectory => write!(f, "eml directory"),
            SourceKind::EmlFile => write!(f, "eml file"),
            SourceKind::Mbox => write!(f, "mbox"),
        }
    }
}

/// A detected, readable mail source.
#[derive(Debug, Clone)]
pub struct Source {
    path: PathBuf,
    kind: SourceKind,
}

/// Counters for one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Messages delivered to the callback.
    pub messages: u64,
    /// Messages that could not be parsed and were skipped.
    pub skipped: u64,
}

/// Detect the kind of mail source at `path`.
pub fn open_source(path: &Path) -> Result<Source> {
    if !path.exists() {
        return Err(MailRankError::SourceNotFound(path.to_path_buf()));
    }
    let unsupported = |reason: &str| MailRankError::UnsupportedSource {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let kind = if path.is_dir() {
        SourceKind::EmlDirectory
    } else {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "eml" => SourceKind::EmlFile,
            "pst" | "ost" => return Err(unsupported("Outlook PST/OST stores are not supported")),
            "mbox" | "mbx" => SourceKind::Mbox,
            _ if mbox::looks_like_mbox(path) => SourceKind::Mbox,
            _ => return Err(unsupported("not a directory, .eml file, or MBOX file")),
        }
    };

    debug!(path = %path.display(), kind = %kind, "Detected mail source");
    Ok(Source {
        path: path.to_path_buf(),
        kind,
    })
}

impl Source {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Stream every message of the source to `on_message`, in source order.
    ///
    /// Messages that fail to parse are logged and counted as skipped. An
    /// error returned by `on_message` stops the walk and is propagated.
    /// `progress` receives `(done, total)` in files (EML) or bytes (MBOX).
    pub fn for_each_message(
        &self,
        on_message: &mut dyn FnMut(Message) -> Result<()>,
        progress: Option<&dyn Fn(u64, u64)>,
    ) -> Result<IngestStats> {
        let mut ids = IdAllocator::default();
        let mut stats = IngestStats::default();
        match self.kind {
            SourceKind::EmlDirectory => {
                let files = eml::find_eml_files(&self.path)?;
                let total = files.len() as u64;
                for (i, file) in files.iter().enumerate() {
                    let rel = file.strip_prefix(&self.path).unwrap_or(file);
                    let folder = rel.parent().map(slash_path).unwrap_or_default();
                    let id = ids.assign(slash_path(rel), i as u64 + 1);
                    deliver(eml::read_eml(file, &id, &folder), &mut stats, on_message)?;
                    if let Some(cb) = progress {
                        cb(i as u64 + 1, total);
                    }
                }
            }
            SourceKind::EmlFile => {
                let id = self
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                deliver(eml::read_eml(&self.path, &id, ""), &mut stats, on_message)?;
                if let Some(cb) = progress {
                    cb(1, 1);
                }
            }
            SourceKind::Mbox => {
                let stem = self
                    .path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let parser = mbox::MboxParser::new(&self.path)?;
                let mut failure: Option<MailRankError> = None;
                parser.parse(
                    &mut |seq, raw| {
                        let candidate =
                            mime::message_id(raw).unwrap_or_else(|| format!("{stem}#{seq}"));
                        let id = ids.assign(candidate, seq);
                        let parsed = mime::parse_message(raw, &id, &stem);
                        match deliver(parsed, &mut stats, &mut *on_message) {
                            Ok(()) => true,
                            Err(e) => {
                                failure = Some(e);
                                false
                            }
                        }
                    },
                    progress,
                )?;
                if let Some(e) = failure {
                    return Err(e);
                }
            }
        }

        info!(
            path = %self.path.display(),
            messages = stats.messages,
            skipped = stats.skipped,
            "Source read"
        );
        Ok(stats)
    }
}

/// Ingest `source` into `store`, writing `batch_size` messages per transaction.
pub fn ingest(
    source: &Source,
    store: &mut MessageStore,
    batch_size: usize,
    progress: Option<&dyn Fn(u64, u64)>,
) -> Result<IngestStats> {
    if batch_size == 0 {
        return Err(MailRankError::InvalidArgument(
            "batch size must be at least 1".into(),
        ));
    }

    let mut batch: Vec<Message> = Vec::with_capacity(batch_size);
    let stats = source.for_each_message(
        &mut |msg| {
            batch.push(msg);
            if batch.len() >= batch_size {
                store.insert_batch(&batch)?;
                batch.clear();
            }
            Ok(())
        },
        progress,
    )?;
    if !batch.is_empty() {
        store.insert_batch(&batch)?;
    }
    Ok(stats)
}

fn deliver(
    parsed: Result<Message>,
    stats: &mut IngestStats,
    on_message: &mut dyn FnMut(Message) -> Result<()>,
) -> Result<()> {
    match parsed {
        Ok(msg) => {
            stats.messages += 1;
            on_message(msg)
        }
        Err(e @ MailRankError::Parse { .. }) => {
            warn!(error = %e, "Skipping unparseable message");
            stats.skipped += 1;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Relative path with `/` separators, independent of the platform.
fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Hands out ids that are unique within one run.
#[derive(Default)]
struct IdAllocator {
    seen: HashSet<String>,
}

impl IdAllocator {
    fn assign(&mut self, candidate: String, sequence: u64) -> String {
        if self.seen.insert(candidate.clone()) {
            return candidate;
        }
        let mut id = format!("{candidate}#{sequence}");
        let mut n = 1;
        while !self.seen.insert(id.clone()) {
            n += 1;
            id = format!("{candidate}#{sequence}.{n}");
        }
        debug!(original = %candidate, assigned = %id, "Duplicate message id renamed");
        id
    }
}
