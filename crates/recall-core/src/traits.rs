//! Capability interface every memory backend is reached through.
//!
//! A backend implements [`Backend`] plus whichever of [`Indexable`],
//! [`Searchable`] and [`FactStore`] it supports, and exposes them through the
//! `as_*` accessors. Callers ask for a capability, never for a concrete type.

use async_trait::async_trait;

use crate::types::{Capabilities, Chunk, FactId, SearchResult};

#[async_trait]
pub trait Indexable: Send + Sync {
    /// Insert or overwrite chunks by id.
    async fn upsert_chunks(&self, chunks: &[Chunk]) -> anyhow::Result<()>;
    /// Remove every chunk attributed to `source_path`.
    async fn delete_chunks(&self, source_path: &str) -> anyhow::Result<()>;
    /// Every source path that still has content in the store, if the store
    /// can enumerate them. Used to find content no index record accounts for.
    async fn source_paths(&self) -> anyhow::Result<Option<Vec<String>>> {
        Ok(None)
    }
}

#[async_trait]
pub trait Searchable: Send + Sync {
    /// Results ordered best first. Scores are backend-local, lower is better.
    async fn search(&self, query: &str, limit: usize) -> anyhow::Result<Vec<SearchResult>>;
}

#[async_trait]
pub trait FactStore: Send + Sync {
    async fn add_fact(&self, text: &str) -> anyhow::Result<FactId>;
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn as_indexable(&self) -> Option<&dyn Indexable> {
        None
    }

    fn as_searchable(&self) -> Option<&dyn Searchable> {
        None
    }

    fn as_fact_store(&self) -> Option<&dyn FactStore> {
        None
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            indexable: self.as_indexable().is_some(),
            searchable: self.as_searchable().is_some(),
            fact_store: self.as_fact_store().is_some(),
        }
    }

    /// Whether the backend answers right now. Not cached by callers.
    async fn probe(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Number of stored items, if the backend can count them cheaply.
    async fn item_count(&self) -> anyhow::Result<Option<u64>> {
        Ok(None)
    }
}
