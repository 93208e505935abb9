//! Fact-extraction store reached over the Mem0 REST API.
//!
//! Facts are extracted server side from free text; this adapter only submits
//! text and searches what was extracted, scoped to one user id.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use recall_core::config::FactsConfig;
use recall_core::traits::{Backend, FactStore, Searchable};
use recall_core::types::{FactId, SearchResult, META_RECORD_ID};

use crate::client::{build_client, check_status, join_url, Listing};

/// Score assigned to hits the service returns without one.
const MISSING_SCORE: f32 = 0.5;

#[derive(Debug, Deserialize)]
struct MemoryItem {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    memory: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    event: Option<String>,
}

pub struct Mem0FactStore {
    name: String,
    base_url: String,
    user_id: String,
    client: Client,
}

impl Mem0FactStore {
    pub fn new(name: impl Into<String>, config: &FactsConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            base_url: config.base_url.clone(),
            user_id: config.user_id.clone(),
            client: build_client(timeout)?,
        })
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }
}

#[async_trait]
impl Searchable for Mem0FactStore {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let body = json!({ "query": query, "user_id": self.user_id, "limit": limit });
        let resp = check_status(self.client.post(self.url("/search")).json(&body).send().await?).await?;
        let items = resp.json::<Listing<MemoryItem>>().await?.into_vec();
        let hits = items
            .into_iter()
            .filter_map(|item| {
                let text = item.memory.or(item.text)?;
                let hit = SearchResult::new(self.name.as_str(), text, item.score.unwrap_or(MISSING_SCORE));
                Some(match item.id {
                    Some(id) => hit.with_meta(META_RECORD_ID, id),
                    None => hit,
                })
            })
            .take(limit)
            .collect();
        Ok(hits)
    }
}

#[async_trait]
impl FactStore for Mem0FactStore {
    async fn add_fact(&self, text: &str) -> Result<FactId> {
        let body = json!({
            "messages": [{ "role": "user", "content": text }],
            "user_id": self.user_id,
        });
        let resp = check_status(self.client.post(self.url("/memories")).json(&body).send().await?).await?;
        let items = resp.json::<Listing<MemoryItem>>().await?.into_vec();
        for item in &items {
            debug!(id = ?item.id, event = ?item.event, "fact store event");
        }
        items
            .into_iter()
            .find_map(|item| item.id)
            .ok_or_else(|| anyhow!("fact store extracted nothing from the input"))
    }
}

#[async_trait]
impl Backend for Mem0FactStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_searchable(&self) -> Option<&dyn Searchable> {
        Some(self)
    }

    fn as_fact_store(&self) -> Option<&dyn FactStore> {
        Some(self)
    }

    async fn probe(&self) -> Result<()> {
        check_status(self.client.get(self.url("/docs")).send().await?).await?;
        Ok(())
    }

    async fn item_count(&self) -> Result<Option<u64>> {
        let resp = check_status(
            self.client.get(self.url("/memories")).query(&[("user_id", self.user_id.as_str())]).send().await?,
        )
        .await?;
        let items = resp.json::<Listing<serde_json::Value>>().await?.into_vec();
        Ok(Some(items.len() as u64))
    }
}
