//! Incremental indexing of source documents into an `Indexable` backend.
//!
//! Per document: fingerprint, skip if the recorded fingerprint matches,
//! otherwise delete whatever the target holds for the path, upsert the new
//! chunks and record them.
//! The backend is always written before the record is updated, so a record
//! never names a chunk that did not land.

use chrono::Utc;
use indicatif::ProgressBar;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use recall_core::chunker::Chunker;
use recall_core::error::{RecallError, Result};
use recall_core::source::{SourceBatch, SourceDocument, UnreadableSource};
use recall_core::state::{IndexRecord, IndexState, IndexStateStore};
use recall_core::traits::{Backend, Indexable};
use recall_core::types::Chunk;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    pub files_processed: usize,
    pub chunks_written: usize,
    pub files_skipped: usize,
    pub files_removed: usize,
    pub failures: Vec<DocumentFailure>,
    /// Best-effort copies that did not reach a mirror backend. Not retried.
    pub mirror_failures: Vec<DocumentFailure>,
}

/// A document left eligible for retry on the next run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentFailure {
    pub path: String,
    pub error: String,
}

impl DocumentFailure {
    fn new(path: impl Into<String>, error: impl ToString) -> Self {
        Self { path: path.into(), error: error.to_string() }
    }
}

enum Outcome {
    Written(Vec<Chunk>),
    /// Old chunks still in place; the record stays as it was.
    Untouched(RecallError),
    /// Old chunks may be gone and new ones did not land.
    Lost(RecallError),
}

/// A mirror backend that was reachable at the start of a run.
struct Mirror<'a> {
    name: &'a str,
    store: &'a dyn Indexable,
}

/// Writes chunks to one target backend, whose success decides the index
/// record, and copies them to any mirror backends on a best-effort basis.
pub struct Indexer {
    chunker: Chunker,
    state_store: IndexStateStore,
    target: Arc<dyn Backend>,
    mirrors: Vec<Arc<dyn Backend>>,
    progress: Option<ProgressBar>,
}

impl Indexer {
    pub fn new(chunker: Chunker, state_store: IndexStateStore, target: Arc<dyn Backend>) -> Self {
        Self { chunker, state_store, target, mirrors: Vec::new(), progress: None }
    }

    /// Backends without the `Indexable` capability are ignored.
    pub fn with_mirrors(mut self, mirrors: Vec<Arc<dyn Backend>>) -> Self {
        self.mirrors = mirrors;
        self
    }

    pub fn set_progress(&mut self, progress: ProgressBar) {
        self.progress = Some(progress);
    }

    pub fn state_store(&self) -> &IndexStateStore {
        &self.state_store
    }

    /// Bring the chunk store in line with `docs`, the complete current source set.
    /// Content for paths missing from `docs` is removed along with its record.
    pub async fn reindex(&self, docs: &[SourceDocument], force: bool) -> Result<ReindexReport> {
        self.run(docs, &[], force).await
    }

    /// As `reindex`, for a batch that may hold sources that could not be read.
    /// Those keep their records and content and are reported as failures.
    pub async fn reindex_batch(&self, batch: &SourceBatch, force: bool) -> Result<ReindexReport> {
        self.run(&batch.documents, &batch.unreadable, force).await
    }

    async fn run(&self, docs: &[SourceDocument], unreadable: &[UnreadableSource], force: bool) -> Result<ReindexReport> {
        let indexable = self.target.as_indexable().ok_or_else(|| {
            RecallError::InvalidConfig(format!("backend '{}' cannot index chunks", self.target.name()))
        })?;
        let _lock = self.state_store.lock()?;
        let mut state = self.state_store.load();
        let mut report = ReindexReport::default();
        let mirrors = self.live_mirrors().await;

        for source in unreadable {
            report.failures.push(DocumentFailure::new(&source.path, &source.error));
        }
        if let Some(pb) = &self.progress {
            pb.set_length(docs.len() as u64);
        }

        for doc in docs {
            if let Some(pb) = &self.progress {
                pb.set_message(doc.path.clone());
            }
            let fingerprint = doc.fingerprint();
            let unchanged = state.files.get(&doc.path).is_some_and(|r| r.fingerprint == fingerprint);
            if !force && unchanged {
                debug!(path = %doc.path, "unchanged, skipping");
                report.files_skipped += 1;
            } else {
                match self.index_document(indexable, doc).await {
                    Outcome::Written(chunks) => {
                        report.files_processed += 1;
                        report.chunks_written += chunks.len();
                        self.mirror_document(&mirrors, &doc.path, &chunks, &mut report).await;
                        let chunk_ids = chunks.into_iter().map(|c| c.id).collect();
                        state.files.insert(doc.path.clone(), IndexRecord { fingerprint, chunk_ids });
                        self.checkpoint(&state);
                    }
                    Outcome::Untouched(e) => {
                        warn!(path = %doc.path, error = %e, "document left for retry");
                        report.failures.push(DocumentFailure::new(&doc.path, e));
                    }
                    Outcome::Lost(e) => {
                        warn!(path = %doc.path, error = %e, "document left for retry");
                        report.failures.push(DocumentFailure::new(&doc.path, e));
                        state.files.insert(doc.path.clone(), IndexRecord::pending());
                        self.checkpoint(&state);
                    }
                }
            }
            if let Some(pb) = &self.progress {
                pb.inc(1);
            }
        }

        let live: HashSet<&str> = docs.iter().map(|d| d.path.as_str()).chain(unreadable.iter().map(|u| u.path.as_str())).collect();
        self.remove_missing(indexable, &mirrors, &live, &mut state, &mut report).await;

        state.last_full_index = Some(Utc::now());
        self.state_store.save(&state)?;
        if let Some(pb) = &self.progress {
            pb.finish_and_clear();
        }
        info!(
            processed = report.files_processed,
            chunks = report.chunks_written,
            skipped = report.files_skipped,
            removed = report.files_removed,
            failed = report.failures.len(),
            mirror_failed = report.mirror_failures.len(),
            "reindex finished"
        );
        Ok(report)
    }

    /// The target is cleared by path even without a prior record: a lost or
    /// corrupt state must not leave superseded chunks searchable.
    async fn index_document(&self, indexable: &dyn Indexable, doc: &SourceDocument) -> Outcome {
        let write_failure = |e: anyhow::Error| RecallError::ChunkWriteFailure { path: doc.path.clone(), reason: format!("{:#}", e) };

        let chunks = self.chunker.chunk_document(&doc.path, &doc.text);
        if let Err(e) = indexable.delete_chunks(&doc.path).await {
            return Outcome::Untouched(write_failure(e));
        }
        if !chunks.is_empty() {
            if let Err(e) = indexable.upsert_chunks(&chunks).await {
                return Outcome::Lost(write_failure(e));
            }
        }
        debug!(path = %doc.path, chunks = chunks.len(), "indexed");
        Outcome::Written(chunks)
    }

    async fn live_mirrors(&self) -> Vec<Mirror<'_>> {
        let mut live = Vec::new();
        for backend in &self.mirrors {
            let Some(store) = backend.as_indexable() else { continue };
            match backend.probe().await {
                Ok(()) => live.push(Mirror { name: backend.name(), store }),
                Err(e) => warn!(backend = backend.name(), error = %format!("{:#}", e), "mirror unreachable, skipped for this run"),
            }
        }
        live
    }

    async fn mirror_document(&self, mirrors: &[Mirror<'_>], path: &str, chunks: &[Chunk], report: &mut ReindexReport) {
        for mirror in mirrors {
            let copied = match mirror.store.delete_chunks(path).await {
                Ok(()) if chunks.is_empty() => Ok(()),
                Ok(()) => mirror.store.upsert_chunks(chunks).await,
                Err(e) => Err(e),
            };
            if let Err(e) = copied {
                warn!(backend = mirror.name, path, error = %format!("{:#}", e), "mirror copy failed");
                report.mirror_failures.push(DocumentFailure::new(path, format!("{}: {:#}", mirror.name, e)));
            }
        }
    }

    /// Paths with a record, or with content in the target, that are no longer
    /// sources. Content is deleted before the record is dropped; a failed
    /// delete keeps the record.
    async fn remove_missing(
        &self,
        indexable: &dyn Indexable,
        mirrors: &[Mirror<'_>],
        live: &HashSet<&str>,
        state: &mut IndexState,
        report: &mut ReindexReport,
    ) {
        let mut candidates: BTreeSet<String> = state.files.keys().cloned().collect();
        match indexable.source_paths().await {
            Ok(Some(stored)) => candidates.extend(stored),
            Ok(None) => {}
            Err(e) => warn!(error = %format!("{:#}", e), "could not list stored sources; pruning by record only"),
        }
        candidates.retain(|p| !live.contains(p.as_str()));

        for path in candidates {
            match indexable.delete_chunks(&path).await {
                Ok(()) => {
                    debug!(path = %path, "source gone, content removed");
                    state.files.remove(&path);
                    report.files_removed += 1;
                    self.mirror_document(mirrors, &path, &[], report).await;
                    self.checkpoint(state);
                }
                Err(e) => {
                    let e = RecallError::ChunkWriteFailure { path: path.clone(), reason: format!("{:#}", e) };
                    warn!(error = %e, "could not remove content of a deleted source");
                    report.failures.push(DocumentFailure::new(path, e));
                }
            }
        }
    }

    fn checkpoint(&self, state: &IndexState) {
        if let Err(e) = self.state_store.save(state) {
            warn!(error = %e, "failed to checkpoint index state");
        }
    }
}
