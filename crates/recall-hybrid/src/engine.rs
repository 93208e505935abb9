use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use recall_core::chunker::Chunker;
use recall_core::config::{RecallConfig, SearchConfig};
use recall_core::error::{RecallError, Result};
use recall_core::source::{SourceDocument, SourceSet};
use recall_core::state::IndexStateStore;
use recall_core::traits::{Backend, Searchable};
use recall_core::types::{BackendStatus, Capabilities, FactId, SearchResult};
use recall_remote::{LettaArchive, Mem0FactStore};
use recall_text::TantivyChunkStore;

use crate::fanout::{BackendReply, FanOutCoordinator};
use crate::indexer::{Indexer, ReindexReport};
use crate::merge::{merge, RankedResult};

pub const CHUNKS_BACKEND: &str = "chunks";
pub const FACTS_BACKEND: &str = "facts";
pub const ARCHIVE_BACKEND: &str = "archive";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallStatus {
    Results,
    /// At least one backend answered, none had a match.
    NoResults,
    /// Every searchable backend failed or none is configured.
    NoBackendsAvailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecallResponse {
    pub query: String,
    pub status: RecallStatus,
    pub results: Vec<RankedResult>,
    pub backends: Vec<BackendReply>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FactOutcome {
    pub backend: String,
    pub fact_id: Option<FactId>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub path: String,
    pub chunks: usize,
    /// Last write failed; the file is retried on the next reindex.
    pub pending: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendStats {
    pub status: BackendStatus,
    pub capabilities: Capabilities,
    pub items: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub sources: Vec<SourceStats>,
    pub indexed_chunks: usize,
    pub last_full_index: Option<DateTime<Utc>>,
    pub backends: Vec<BackendStats>,
}

impl Stats {
    pub fn chunks_for(&self, path: &str) -> usize {
        self.sources.iter().find(|s| s.path == path).map_or(0, |s| s.chunks)
    }
}

/// Entry point tying the indexer, the fan-out coordinator and the merger to
/// one set of backends.
pub struct RecallEngine {
    backends: Vec<Arc<dyn Backend>>,
    indexer: Option<Indexer>,
    coordinator: FanOutCoordinator,
    search: SearchConfig,
    sources: SourceSet,
}

impl RecallEngine {
    /// The first indexable backend in `backends` receives document chunks
    /// and owns the index records; any later indexable backend gets copies.
    pub fn new(config: &RecallConfig, backends: Vec<Arc<dyn Backend>>) -> Self {
        let mut indexable = backends.iter().filter(|b| b.as_indexable().is_some()).cloned();
        let indexer = indexable.next().map(|target| {
            Indexer::new(Chunker::new(config.chunking.clone()), IndexStateStore::new(config.state_file()), target)
                .with_mirrors(indexable.collect())
        });
        Self {
            backends,
            indexer,
            coordinator: FanOutCoordinator::new(config.search.timeout()),
            search: config.search.clone(),
            sources: config.source_set(),
        }
    }

    /// Local chunk store plus whichever remote services are enabled. A chunk
    /// store that cannot be opened is kept as an unavailable backend, so
    /// queries still reach the others.
    pub fn from_config(config: &RecallConfig) -> Result<Self> {
        let mut backends: Vec<Arc<dyn Backend>> = Vec::new();
        let dir = config.chunk_index_dir();
        match TantivyChunkStore::open(CHUNKS_BACKEND, &dir) {
            Ok(chunks) => backends.push(Arc::new(chunks)),
            Err(e) => {
                let reason = format!("chunk index {}: {:#}", dir.display(), e);
                warn!(error = %reason, "chunk store unavailable");
                backends.push(Arc::new(UnavailableBackend::new(CHUNKS_BACKEND, reason)));
            }
        }
        let timeout = config.search.timeout();
        if config.facts.enabled {
            let facts = Mem0FactStore::new(FACTS_BACKEND, &config.facts, timeout).map_err(|e| RecallError::InvalidConfig(format!("{:#}", e)))?;
            backends.push(Arc::new(facts));
        }
        if config.archive.enabled {
            let archive = LettaArchive::new(ARCHIVE_BACKEND, &config.archive, timeout).map_err(|e| RecallError::InvalidConfig(format!("{:#}", e)))?;
            backends.push(Arc::new(archive));
        }
        Ok(Self::new(config, backends))
    }

    pub fn backends(&self) -> &[Arc<dyn Backend>] {
        &self.backends
    }

    pub fn indexer_mut(&mut self) -> Option<&mut Indexer> {
        self.indexer.as_mut()
    }

    pub async fn recall(&self, query: &str, limit: usize) -> Result<RecallResponse> {
        let per_backend = limit.saturating_mul(self.search.oversample);
        let replies = self.coordinator.search(query, per_backend, &self.backends).await?;
        let results = merge(replies.iter().map(|r| r.results.as_slice()), limit);
        let status = if !results.is_empty() {
            RecallStatus::Results
        } else if replies.iter().any(|r| r.status.reachable) {
            RecallStatus::NoResults
        } else {
            RecallStatus::NoBackendsAvailable
        };
        debug!(query, ?status, hits = results.len(), "recall finished");
        Ok(RecallResponse { query: query.to_string(), status, results, backends: replies })
    }

    /// Reindex the configured source set.
    pub async fn reindex(&self, force: bool) -> Result<ReindexReport> {
        let indexer = self.indexer()?;
        let batch = self.sources.read_all()?;
        indexer.reindex_batch(&batch, force).await
    }

    pub async fn reindex_documents(&self, docs: &[SourceDocument], force: bool) -> Result<ReindexReport> {
        self.indexer()?.reindex(docs, force).await
    }

    fn indexer(&self) -> Result<&Indexer> {
        self.indexer.as_ref().ok_or_else(|| RecallError::InvalidConfig("no backend accepts chunks".to_string()))
    }

    /// Store `text` in every fact store. Per-store failures are reported, not raised.
    pub async fn add_fact(&self, text: &str) -> Result<Vec<FactOutcome>> {
        if text.trim().is_empty() {
            return Err(RecallError::InvalidInput("fact text is empty".to_string()));
        }
        let stores: Vec<_> = self.backends.iter().filter_map(|b| b.as_fact_store().map(|f| (b.name(), f))).collect();
        if stores.is_empty() {
            return Err(RecallError::InvalidConfig("no fact store configured".to_string()));
        }
        let timeout = self.search.timeout();
        let calls = stores.into_iter().map(|(name, store)| async move {
            let outcome = match tokio::time::timeout(timeout, store.add_fact(text)).await {
                Ok(Ok(id)) => Ok(id),
                Ok(Err(e)) => Err(format!("{:#}", e)),
                Err(_) => Err(format!("no answer within {:?}", timeout)),
            };
            match outcome {
                Ok(id) => FactOutcome { backend: name.to_string(), fact_id: Some(id), error: None },
                Err(reason) => {
                    warn!(backend = name, error = %reason, "fact not stored");
                    FactOutcome { backend: name.to_string(), fact_id: None, error: Some(reason) }
                }
            }
        });
        Ok(join_all(calls).await)
    }

    pub async fn stats(&self) -> Result<Stats> {
        let state = match &self.indexer {
            Some(indexer) => indexer.state_store().load(),
            None => Default::default(),
        };
        let sources = state
            .files
            .iter()
            .map(|(path, record)| SourceStats { path: path.clone(), chunks: record.chunk_ids.len(), pending: record.is_pending() })
            .collect();
        let timeout = self.search.timeout();
        let backends = join_all(self.backends.iter().map(|b| backend_stats(b.as_ref(), timeout))).await;
        Ok(Stats { sources, indexed_chunks: state.total_chunks(), last_full_index: state.last_full_index, backends })
    }
}

/// Stands in for a backend that could not be constructed. Searchable so that
/// every query reports it unreachable along with the reason.
struct UnavailableBackend {
    name: String,
    reason: String,
}

impl UnavailableBackend {
    fn new(name: &str, reason: String) -> Self {
        Self { name: name.to_string(), reason }
    }
}

#[async_trait]
impl Searchable for UnavailableBackend {
    async fn search(&self, _query: &str, _limit: usize) -> anyhow::Result<Vec<SearchResult>> {
        Err(anyhow!("{}", self.reason))
    }
}

#[async_trait]
impl Backend for UnavailableBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_searchable(&self) -> Option<&dyn Searchable> {
        Some(self)
    }

    async fn probe(&self) -> anyhow::Result<()> {
        Err(anyhow!("{}", self.reason))
    }
}

async fn backend_stats(backend: &dyn Backend, timeout: Duration) -> BackendStats {
    let name = backend.name();
    let probe = async {
        match backend.probe().await {
            Ok(()) => backend.item_count().await,
            Err(e) => Err(e),
        }
    };
    let (status, items) = match tokio::time::timeout(timeout, probe).await {
        Ok(Ok(items)) => (BackendStatus::reachable(name), items),
        Ok(Err(e)) => (BackendStatus::unreachable(name, format!("{:#}", e)), None),
        Err(_) => (BackendStatus::unreachable(name, format!("no answer within {:?}", timeout)), None),
    };
    BackendStats { status, capabilities: backend.capabilities(), items }
}
