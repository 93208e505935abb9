//! Hierarchical archival store reached over the Letta REST API.
//!
//! Archival passages belong to an agent. The agent is looked up by name on
//! first use and created when missing; its id is cached for the lifetime of
//! the adapter.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use recall_core::config::ArchiveConfig;
use recall_core::traits::{Backend, FactStore, Indexable, Searchable};
use recall_core::types::{Chunk, FactId, SearchResult, META_RECORD_ID};

use crate::client::{build_client, check_status, join_url, Listing};

#[derive(Debug, Deserialize)]
struct Agent {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Passage {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    text: String,
}

/// Upper bound on passages fetched when looking for a file's mirror.
const LIST_LIMIT: usize = 1000;

pub struct LettaArchive {
    name: String,
    base_url: String,
    agent_name: String,
    score: f32,
    mirror_documents: bool,
    passage_chars: usize,
    client: Client,
    agent_id: OnceCell<String>,
}

impl LettaArchive {
    pub fn new(name: impl Into<String>, config: &ArchiveConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            base_url: config.base_url.clone(),
            agent_name: config.agent_name.clone(),
            score: config.score,
            mirror_documents: config.mirror_documents,
            passage_chars: config.passage_chars,
            client: build_client(timeout)?,
            agent_id: OnceCell::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    async fn agent_id(&self) -> Result<&str> {
        let id = self.agent_id.get_or_try_init(|| self.find_or_create_agent()).await?;
        Ok(id.as_str())
    }

    fn archival_url(&self, agent_id: &str) -> String {
        self.url(&format!("/v1/agents/{}/archival", agent_id))
    }

    async fn insert_passage(&self, text: &str) -> Result<Vec<Passage>> {
        let agent_id = self.agent_id().await?;
        let resp = check_status(self.client.post(self.archival_url(agent_id)).json(&json!({ "text": text })).send().await?).await?;
        Ok(resp.json::<Listing<Passage>>().await?.into_vec())
    }

    async fn find_or_create_agent(&self) -> Result<String> {
        let resp = check_status(self.client.get(self.url("/v1/agents")).send().await?).await?;
        let agents = resp.json::<Listing<Agent>>().await?.into_vec();
        if let Some(agent) = agents.into_iter().find(|a| a.name.as_deref() == Some(self.agent_name.as_str())) {
            return Ok(agent.id);
        }

        let payload = json!({
            "name": self.agent_name,
            "system": format!("You are {}, an assistant with persistent memory.", self.agent_name),
            "memory_blocks": [
                { "label": "human", "value": "" },
                { "label": "persona", "value": format!("I am {}.", self.agent_name) },
            ],
        });
        let resp = check_status(self.client.post(self.url("/v1/agents")).json(&payload).send().await?).await?;
        let agent: Agent = resp.json().await?;
        info!(agent = %self.agent_name, id = %agent.id, "created archival agent");
        Ok(agent.id)
    }
}

#[async_trait]
impl Searchable for LettaArchive {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let agent_id = self.agent_id().await?;
        let limit_param = limit.to_string();
        let resp = check_status(
            self.client
                .get(self.archival_url(agent_id))
                .query(&[("query", query), ("limit", limit_param.as_str())])
                .send()
                .await?,
        )
        .await?;
        let passages = resp.json::<Listing<Passage>>().await?.into_vec();
        Ok(passages
            .into_iter()
            .filter(|p| !p.text.trim().is_empty())
            .take(limit)
            .map(|p| {
                let hit = SearchResult::new(self.name.as_str(), p.text, self.score);
                match p.id {
                    Some(id) => hit.with_meta(META_RECORD_ID, id),
                    None => hit,
                }
            })
            .collect())
    }
}

#[async_trait]
impl FactStore for LettaArchive {
    async fn add_fact(&self, text: &str) -> Result<FactId> {
        self.insert_passage(text)
            .await?
            .into_iter()
            .find_map(|p| p.id)
            .ok_or_else(|| anyhow!("archival store returned no passage id"))
    }
}

/// Header line that opens a file's mirrored passage.
fn passage_header(source_path: &str) -> String {
    format!("File: {}\n", source_path)
}

/// Each indexed file is mirrored as one passage: a header naming the file,
/// then the start of its text. Deleting removes every passage with that header.
#[async_trait]
impl Indexable for LettaArchive {
    async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut by_file: BTreeMap<&str, Vec<&Chunk>> = BTreeMap::new();
        for c in chunks {
            by_file.entry(c.source_path.as_str()).or_default().push(c);
        }
        for (path, mut parts) in by_file {
            parts.sort_by_key(|c| c.chunk_index);
            let body: String = parts.iter().map(|c| c.fresh_text()).collect::<String>().chars().take(self.passage_chars).collect();
            let passage = format!("{}\n{}", passage_header(path), body);
            self.insert_passage(&passage).await?;
            debug!(path, chars = body.chars().count(), "mirrored file into archive");
        }
        Ok(())
    }

    async fn delete_chunks(&self, source_path: &str) -> Result<()> {
        let agent_id = self.agent_id().await?;
        let limit = LIST_LIMIT.to_string();
        let resp = check_status(
            self.client.get(self.archival_url(agent_id)).query(&[("limit", limit.as_str())]).send().await?,
        )
        .await?;
        let header = passage_header(source_path);
        let stale = resp
            .json::<Listing<Passage>>()
            .await?
            .into_vec()
            .into_iter()
            .filter(|p| p.text.starts_with(&header))
            .filter_map(|p| p.id);
        for id in stale {
            let url = format!("{}/{}", self.archival_url(agent_id), id);
            check_status(self.client.delete(url).send().await?).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for LettaArchive {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_indexable(&self) -> Option<&dyn Indexable> {
        if self.mirror_documents {
            Some(self)
        } else {
            None
        }
    }

    fn as_searchable(&self) -> Option<&dyn Searchable> {
        Some(self)
    }

    fn as_fact_store(&self) -> Option<&dyn FactStore> {
        Some(self)
    }

    async fn probe(&self) -> Result<()> {
        check_status(self.client.get(self.url("/v1/health/")).send().await?).await?;
        Ok(())
    }
}
