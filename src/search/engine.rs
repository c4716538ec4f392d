//! The hybrid query engine.
//!
//! Holds the live [`IndexSnapshot`], the injected embedder and a small LRU
//! of query embeddings. Each search retrieves lexical and semantic
//! candidates independently (on two worker threads by default), then
//! hands both lists to [`fusion::fuse`].

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::contacts::ImportanceProfile;
use crate::embedding::Embedder;
use crate::error::{MailRankError, Result};
use crate::index::lexical::{LexicalField, LexicalHit};
use crate::index::reader::IndexSnapshot;
use crate::index::semantic::{Metric, Neighbor};
use crate::search::fusion;
use crate::search::query::{parse_query, LexicalQuery};
use crate::search::types::{Branch, SearchOutcome, SearchWarning};

type EmbeddingCache = Arc<Mutex<LruCache<String, Arc<Vec<f32>>>>>;

/// Retrieval tuning, usually taken from [`SearchConfig`].
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    /// Lexical candidates per query (raised to `limit` if smaller).
    pub lexical_candidates: usize,
    /// Semantic candidates per query (raised to `limit` if smaller).
    pub semantic_candidates: usize,
    /// Deadline for the retrieval phase.
    pub timeout: Option<Duration>,
    /// Degrade to the finished branch instead of failing on timeout.
    pub allow_partial: bool,
    /// Run the branches on worker threads.
    pub parallel: bool,
    /// Query embeddings kept in memory (0 disables the cache).
    pub query_cache_size: usize,
    /// Fields searched by terms without a prefix.
    pub default_fields: Vec<LexicalField>,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self::from(&SearchConfig::default())
    }
}

impl From<&SearchConfig> for RetrievalOptions {
    fn from(cfg: &SearchConfig) -> Self {
        Self {
            lexical_candidates: cfg.lexical_candidates,
            semantic_candidates: cfg.semantic_candidates,
            timeout: (cfg.timeout_ms > 0).then(|| Duration::from_millis(cfg.timeout_ms)),
            allow_partial: cfg.allow_partial,
            parallel: cfg.parallel,
            query_cache_size: cfg.query_cache_size,
            default_fields: LexicalField::ALL.to_vec(),
        }
    }
}

/// Branch output sent back to the coordinating thread.
enum BranchOutput {
    Lexical(Vec<LexicalHit>),
    Semantic(std::result::Result<Vec<Neighbor>, SearchWarning>),
}

/// What the retrieval phase produced. `None` means the branch contributes nothing.
#[derive(Default)]
struct Retrieved {
    lexical: Option<Vec<LexicalHit>>,
    semantic: Option<Vec<Neighbor>>,
    warnings: Vec<SearchWarning>,
}

/// Per-call retrieval plan shared by the inline and threaded paths.
struct Branches<'a> {
    parsed: &'a LexicalQuery,
    /// Text handed to the embedder.
    text: &'a str,
    run_lexical: bool,
    run_semantic: bool,
    n: usize,
    m: usize,
    timeout: Option<Duration>,
}

/// Hybrid lexical + semantic search over one index directory.
pub struct HybridEngine {
    index_dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    snapshot: RwLock<Option<Arc<IndexSnapshot>>>,
    query_cache: Option<EmbeddingCache>,
    options: RetrievalOptions,
}

impl HybridEngine {
    /// Open the current generation in `index_dir`.
    ///
    /// Never fails: without a usable index every search returns no hits
    /// until [`reload`](Self::reload) succeeds.
    pub fn open(index_dir: &Path, embedder: Arc<dyn Embedder>, options: RetrievalOptions) -> Self {
        let snapshot = match IndexSnapshot::open(index_dir) {
            Ok(s) => {
                info!(
                    path = %index_dir.display(),
                    generation = s.generation,
                    documents = s.documents.len(),
                    "Index opened"
                );
                Some(Arc::new(s))
            }
            Err(e) if e.is_index_unavailable() => {
                info!(error = %e, "No usable index, searches return no results");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to open index, searches return no results");
                None
            }
        };
        Self::with_snapshot(index_dir, snapshot, embedder, options)
    }

    /// Build an engine around an already loaded snapshot.
    pub fn with_snapshot(
        index_dir: &Path,
        snapshot: Option<Arc<IndexSnapshot>>,
        embedder: Arc<dyn Embedder>,
        options: RetrievalOptions,
    ) -> Self {
        let query_cache = NonZeroUsize::new(options.query_cache_size)
            .map(|cap| Arc::new(Mutex::new(LruCache::new(cap))));
        Self {
            index_dir: index_dir.to_path_buf(),
            embedder,
            snapshot: RwLock::new(snapshot),
            query_cache,
            options,
        }
    }

    /// Re-open the current generation and swap it in.
    ///
    /// On failure the previous snapshot keeps serving and the error is returned.
    pub fn reload(&self) -> Result<()> {
        let fresh = IndexSnapshot::open(&self.index_dir).inspect_err(|e| {
            warn!(error = %e, "Reload failed, keeping previous snapshot");
        })?;
        let generation = fresh.generation;
        let mut guard = match self.snapshot.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(Arc::new(fresh));
        info!(generation, "Index snapshot swapped");
        Ok(())
    }

    /// The snapshot currently served, if any.
    pub fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        match self.snapshot.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.snapshot().is_some()
    }

    pub fn options(&self) -> &RetrievalOptions {
        &self.options
    }

    /// Search with an explicit importance profile.
    ///
    /// Returns at most `limit` hits. `semantic_weight` must lie in `[0, 1]`.
    /// Uses the engine's configured timeout.
    pub fn search(
        &self,
        query: &str,
        profile: &ImportanceProfile,
        limit: usize,
        semantic_weight: f64,
    ) -> Result<SearchOutcome> {
        self.search_within(query, profile, limit, semantic_weight, self.options.timeout)
    }

    /// [`search`](Self::search) with a deadline for this call only.
    /// `None` lets retrieval run to completion.
    pub fn search_within(
        &self,
        query: &str,
        profile: &ImportanceProfile,
        limit: usize,
        semantic_weight: f64,
        timeout: Option<Duration>,
    ) -> Result<SearchOutcome> {
        fusion::validate_weight(semantic_weight)?;
        match self.snapshot() {
            Some(snapshot) => self.run(&snapshot, query, profile, limit, semantic_weight, timeout),
            None => {
                debug!("Search without index");
                Ok(empty_outcome(semantic_weight, None))
            }
        }
    }

    /// Search using the importance profile stored with the index.
    pub fn search_with_loaded_profile(
        &self,
        query: &str,
        limit: usize,
        semantic_weight: f64,
    ) -> Result<SearchOutcome> {
        self.search_with_loaded_profile_within(query, limit, semantic_weight, self.options.timeout)
    }

    /// [`search_with_loaded_profile`](Self::search_with_loaded_profile) with
    /// a deadline for this call only.
    pub fn search_with_loaded_profile_within(
        &self,
        query: &str,
        limit: usize,
        semantic_weight: f64,
        timeout: Option<Duration>,
    ) -> Result<SearchOutcome> {
        fusion::validate_weight(semantic_weight)?;
        match self.snapshot() {
            Some(snapshot) => self.run(
                &snapshot,
                query,
                &snapshot.profile,
                limit,
                semantic_weight,
                timeout,
            ),
            None => Ok(empty_outcome(semantic_weight, None)),
        }
    }

    fn run(
        &self,
        snapshot: &Arc<IndexSnapshot>,
        query: &str,
        profile: &ImportanceProfile,
        limit: usize,
        semantic_weight: f64,
        timeout: Option<Duration>,
    ) -> Result<SearchOutcome> {
        let generation = Some(snapshot.generation);
        let query = query.trim();
        if limit == 0 || query.is_empty() {
            return Ok(empty_outcome(semantic_weight, generation));
        }

        let started = Instant::now();
        let n = self.options.lexical_candidates.max(limit);
        let m = self.options.semantic_candidates.max(limit);

        let parsed = parse_query(query);
        // Negated terms and field prefixes carry no meaning for the embedder
        let semantic_text = parsed.semantic_text();

        let mut warnings = Vec::new();
        let run_lexical = snapshot.lexical.is_some();
        if !run_lexical {
            warnings.push(SearchWarning::LexicalUnavailable);
        }
        let run_semantic = match &snapshot.semantic {
            None => {
                warnings.push(SearchWarning::SemanticUnavailable);
                false
            }
            Some(index) if index.dimension() != self.embedder.dimension() => {
                warnings.push(SearchWarning::SemanticDimensionMismatch {
                    index: index.dimension(),
                    embedder: self.embedder.dimension(),
                });
                false
            }
            Some(_) => !semantic_text.is_empty(),
        };

        let branches = Branches {
            parsed: &parsed,
            text: &semantic_text,
            run_lexical,
            run_semantic,
            n,
            m,
            timeout,
        };
        let retrieved = if self.options.parallel {
            self.retrieve_parallel(snapshot, &branches)?
        } else {
            self.retrieve_inline(snapshot, &branches)?
        };
        warnings.extend(retrieved.warnings);

        let effective_weight = match (&retrieved.lexical, &retrieved.semantic) {
            (Some(_), Some(_)) => semantic_weight,
            (Some(_), None) => 0.0,
            (None, Some(_)) => 1.0,
            (None, None) => {
                for w in &warnings {
                    warn!(warning = %w, "Search branch skipped");
                }
                let mut outcome = empty_outcome(semantic_weight, generation);
                outcome.warnings = warnings;
                return Ok(outcome);
            }
        };

        let lexical = retrieved.lexical.unwrap_or_default();
        let semantic = retrieved.semantic.unwrap_or_default();
        let metric = snapshot
            .semantic
            .as_ref()
            .map_or(Metric::Cosine, |s| s.metric());

        let fields = &self.options.default_fields;
        let hits = fusion::fuse_filtered(
            &lexical,
            &semantic,
            metric,
            &snapshot.documents,
            profile,
            effective_weight,
            limit,
            &|message| parsed.excludes(message, fields),
        );

        for w in &warnings {
            warn!(warning = %w, "Search degraded");
        }
        debug!(
            lexical = lexical.len(),
            semantic = semantic.len(),
            hits = hits.len(),
            weight = effective_weight,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Search complete"
        );

        Ok(SearchOutcome {
            hits,
            warnings,
            effective_semantic_weight: effective_weight,
            lexical_candidates: lexical.len(),
            semantic_candidates: semantic.len(),
            generation,
        })
    }

    /// Run both branches on the calling thread, lexical first.
    fn retrieve_inline(&self, snapshot: &IndexSnapshot, b: &Branches<'_>) -> Result<Retrieved> {
        let deadline = b.timeout.map(|t| Instant::now() + t);
        let in_time = || deadline.map_or(true, |d| Instant::now() < d);
        let mut out = Retrieved::default();
        let mut timed_out = Vec::new();

        if b.run_lexical {
            let hits = lexical_branch(snapshot, b.parsed, &self.options.default_fields, b.n, &in_time);
            if in_time() {
                out.lexical = Some(hits);
            } else {
                timed_out.push(Branch::Lexical);
            }
        }

        if b.run_semantic && in_time() {
            let result = semantic_branch(
                snapshot,
                self.embedder.as_ref(),
                self.query_cache.as_ref(),
                b.text,
                b.m,
                &in_time,
            );
            if in_time() {
                store_semantic(&mut out, result);
            } else {
                timed_out.push(Branch::Semantic);
            }
        } else if b.run_semantic {
            timed_out.push(Branch::Semantic);
        }

        self.settle_timeout(out, timed_out, b.timeout)
    }

    /// Run each branch on its own named thread and wait until the deadline.
    fn retrieve_parallel(
        &self,
        snapshot: &Arc<IndexSnapshot>,
        b: &Branches<'_>,
    ) -> Result<Retrieved> {
        let deadline = b.timeout.map(|t| Instant::now() + t);
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<BranchOutput>();
        let mut pending: Vec<Branch> = Vec::new();

        if b.run_lexical {
            let snapshot = Arc::clone(snapshot);
            let parsed = b.parsed.clone();
            let n = b.n;
            let fields = self.options.default_fields.clone();
            let cancel = Arc::clone(&cancel);
            let tx = tx.clone();
            spawn_branch("mailrank-lexical", move || {
                let keep_going = || !cancel.load(Ordering::Relaxed);
                let hits = lexical_branch(&snapshot, &parsed, &fields, n, &keep_going);
                // The receiver is gone after a timeout
                let _ = tx.send(BranchOutput::Lexical(hits));
            })?;
            pending.push(Branch::Lexical);
        }

        if b.run_semantic {
            let snapshot = Arc::clone(snapshot);
            let embedder = Arc::clone(&self.embedder);
            let cache = self.query_cache.clone();
            let text = b.text.to_string();
            let m = b.m;
            let cancel = Arc::clone(&cancel);
            let tx = tx.clone();
            spawn_branch("mailrank-semantic", move || {
                let keep_going = || !cancel.load(Ordering::Relaxed);
                let result = semantic_branch(
                    &snapshot,
                    embedder.as_ref(),
                    cache.as_ref(),
                    &text,
                    m,
                    &keep_going,
                );
                let _ = tx.send(BranchOutput::Semantic(result));
            })?;
            pending.push(Branch::Semantic);
        }
        drop(tx);

        let mut out = Retrieved::default();
        while !pending.is_empty() {
            let received = match deadline {
                Some(d) => rx.recv_timeout(d.saturating_duration_since(Instant::now())),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(BranchOutput::Lexical(hits)) => {
                    pending.retain(|b| *b != Branch::Lexical);
                    out.lexical = Some(hits);
                }
                Ok(BranchOutput::Semantic(result)) => {
                    pending.retain(|b| *b != Branch::Semantic);
                    store_semantic(&mut out, result);
                }
                Err(RecvTimeoutError::Timeout) => {
                    cancel.store(true, Ordering::Relaxed);
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!(branches = ?pending, "Search worker exited without a result");
                    for branch in pending.drain(..) {
                        out.warnings.push(match branch {
                            Branch::Lexical => SearchWarning::LexicalUnavailable,
                            Branch::Semantic => SearchWarning::SemanticUnavailable,
                        });
                    }
                }
            }
        }

        self.settle_timeout(out, pending, b.timeout)
    }

    /// Apply the timeout policy to branches that did not finish in time.
    fn settle_timeout(
        &self,
        mut out: Retrieved,
        timed_out: Vec<Branch>,
        timeout: Option<Duration>,
    ) -> Result<Retrieved> {
        if timed_out.is_empty() {
            return Ok(out);
        }
        let timeout = timeout.unwrap_or_default();
        let finished = out.lexical.is_some() || out.semantic.is_some();
        if !self.options.allow_partial || !finished {
            warn!(branches = ?timed_out, timeout_ms = timeout.as_millis() as u64, "Search timed out");
            return Err(MailRankError::Timeout(timeout));
        }
        for branch in timed_out {
            out.warnings.push(SearchWarning::BranchTimedOut(branch));
        }
        Ok(out)
    }
}

fn empty_outcome(semantic_weight: f64, generation: Option<u64>) -> SearchOutcome {
    SearchOutcome {
        effective_semantic_weight: semantic_weight,
        generation,
        ..Default::default()
    }
}

fn store_semantic(out: &mut Retrieved, result: std::result::Result<Vec<Neighbor>, SearchWarning>) {
    match result {
        Ok(neighbors) => out.semantic = Some(neighbors),
        Err(warning) => out.warnings.push(warning),
    }
}

fn spawn_branch<F>(name: &str, job: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(job)
        .map(|_| ())
        .map_err(|e| MailRankError::io(name, e))
}

fn lexical_branch(
    snapshot: &IndexSnapshot,
    query: &LexicalQuery,
    fields: &[LexicalField],
    n: usize,
    should_continue: &dyn Fn() -> bool,
) -> Vec<LexicalHit> {
    match &snapshot.lexical {
        Some(index) => index.search(query, fields, n, should_continue),
        None => Vec::new(),
    }
}

fn semantic_branch(
    snapshot: &IndexSnapshot,
    embedder: &dyn Embedder,
    cache: Option<&EmbeddingCache>,
    text: &str,
    m: usize,
    should_continue: &dyn Fn() -> bool,
) -> std::result::Result<Vec<Neighbor>, SearchWarning> {
    let Some(index) = &snapshot.semantic else {
        return Err(SearchWarning::SemanticUnavailable);
    };

    let vector = embed_cached(embedder, cache, text)
        .map_err(|e| SearchWarning::EmbeddingFailed(e.to_string()))?;
    // A query without features is not near anything
    if vector.iter().all(|x| *x == 0.0) {
        return Ok(Vec::new());
    }
    if vector.len() != index.dimension() {
        return Err(SearchWarning::SemanticDimensionMismatch {
            index: index.dimension(),
            embedder: vector.len(),
        });
    }

    index
        .query(&vector, m, should_continue)
        .map_err(|e| SearchWarning::EmbeddingFailed(e.to_string()))
}

fn embed_cached(
    embedder: &dyn Embedder,
    cache: Option<&EmbeddingCache>,
    text: &str,
) -> Result<Arc<Vec<f32>>> {
    if let Some(cache) = cache {
        if let Ok(mut c) = cache.lock() {
            if let Some(v) = c.get(text) {
                return Ok(Arc::clone(v));
            }
        }
    }

    let vector = Arc::new(embedder.embed(text)?);

    if let Some(cache) = cache {
        if let Ok(mut c) = cache.lock() {
            c.put(text.to_string(), Arc::clone(&vector));
        }
    }
    Ok(vector)
}
