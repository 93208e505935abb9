#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use recall_core::traits::{Backend, FactStore, Indexable, Searchable};
use recall_core::types::{Chunk, FactId, SearchResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Upsert { path: String, chunks: usize },
    Delete(String),
    Search(String),
    AddFact(String),
}

/// Recording backend with switchable capabilities and failures.
#[derive(Default)]
pub struct FakeBackend {
    name: String,
    indexable: bool,
    searchable: bool,
    fact_store: bool,
    results: Vec<SearchResult>,
    delay: Option<Duration>,
    fail_search: bool,
    stored_paths: Option<Vec<String>>,
    fail_upsert: Mutex<HashSet<String>>,
    fail_delete: Mutex<HashSet<String>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeBackend {
    pub fn indexable(name: &str) -> Self {
        Self { name: name.to_string(), indexable: true, ..Self::default() }
    }

    pub fn searchable(name: &str, results: Vec<SearchResult>) -> Self {
        Self { name: name.to_string(), searchable: true, results, ..Self::default() }
    }

    pub fn fact_store(name: &str) -> Self {
        Self { name: name.to_string(), fact_store: true, ..Self::default() }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_search = true;
        self
    }

    /// Report these paths from `source_paths`, as an enumerable store would.
    pub fn holding(mut self, paths: &[&str]) -> Self {
        self.stored_paths = Some(paths.iter().map(|p| p.to_string()).collect());
        self
    }

    pub fn fail_upsert_for(&self, path: &str) {
        self.fail_upsert.lock().unwrap().insert(path.to_string());
    }

    pub fn fail_delete_for(&self, path: &str) {
        self.fail_delete.lock().unwrap().insert(path.to_string());
    }

    pub fn heal(&self) {
        self.fail_upsert.lock().unwrap().clear();
        self.fail_delete.lock().unwrap().clear();
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Indexable for FakeBackend {
    async fn upsert_chunks(&self, chunks: &[Chunk]) -> anyhow::Result<()> {
        let path = chunks.first().map(|c| c.source_path.clone()).unwrap_or_default();
        self.record(Call::Upsert { path: path.clone(), chunks: chunks.len() });
        if self.fail_upsert.lock().unwrap().contains(&path) {
            anyhow::bail!("disk full");
        }
        Ok(())
    }

    async fn delete_chunks(&self, source_path: &str) -> anyhow::Result<()> {
        self.record(Call::Delete(source_path.to_string()));
        if self.fail_delete.lock().unwrap().contains(source_path) {
            anyhow::bail!("store offline");
        }
        Ok(())
    }

    async fn source_paths(&self) -> anyhow::Result<Option<Vec<String>>> {
        Ok(self.stored_paths.clone())
    }
}

#[async_trait]
impl Searchable for FakeBackend {
    async fn search(&self, query: &str, limit: usize) -> anyhow::Result<Vec<SearchResult>> {
        self.record(Call::Search(query.to_string()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_search {
            anyhow::bail!("connection refused");
        }
        Ok(self.results.iter().take(limit).cloned().collect())
    }
}

#[async_trait]
impl FactStore for FakeBackend {
    async fn add_fact(&self, text: &str) -> anyhow::Result<FactId> {
        self.record(Call::AddFact(text.to_string()));
        if self.fail_search {
            anyhow::bail!("connection refused");
        }
        Ok(format!("{}-fact-1", self.name))
    }
}

#[async_trait]
impl Backend for FakeBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_indexable(&self) -> Option<&dyn Indexable> {
        if self.indexable { Some(self) } else { None }
    }

    fn as_searchable(&self) -> Option<&dyn Searchable> {
        if self.searchable { Some(self) } else { None }
    }

    fn as_fact_store(&self) -> Option<&dyn FactStore> {
        if self.fact_store { Some(self) } else { None }
    }

    async fn probe(&self) -> anyhow::Result<()> {
        if self.fail_search {
            anyhow::bail!("connection refused");
        }
        Ok(())
    }
}

pub fn hit(backend: &str, text: &str, score: f32) -> SearchResult {
    SearchResult::new(backend, text, score)
}
