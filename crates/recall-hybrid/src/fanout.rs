use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use recall_core::error::{RecallError, Result};
use recall_core::traits::Backend;
use recall_core::types::{BackendStatus, SearchResult};

/// One searchable backend's contribution to a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendReply {
    pub status: BackendStatus,
    pub results: Vec<SearchResult>,
}

/// Issues a query to every searchable backend at once. Each call is bounded
/// by `timeout`; a backend that errors or overruns contributes nothing and is
/// reported unreachable for this query only.
#[derive(Debug, Clone)]
pub struct FanOutCoordinator {
    timeout: Duration,
}

impl FanOutCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Replies come back in `backends` order, skipping non-searchable ones.
    pub async fn search(&self, query: &str, limit: usize, backends: &[Arc<dyn Backend>]) -> Result<Vec<BackendReply>> {
        if query.trim().is_empty() {
            return Err(RecallError::InvalidInput("query is empty".to_string()));
        }
        if limit == 0 {
            return Err(RecallError::InvalidInput("limit must be positive".to_string()));
        }

        let calls = backends
            .iter()
            .filter_map(|b| b.as_searchable().map(|s| (b.name(), s)))
            .map(|(name, searchable)| async move {
                let outcome = match tokio::time::timeout(self.timeout, searchable.search(query, limit)).await {
                    Ok(Ok(results)) => Ok(results),
                    Ok(Err(e)) => Err(format!("{:#}", e)),
                    Err(_) => Err(format!("no answer within {:?}", self.timeout)),
                };
                match outcome {
                    Ok(results) => {
                        debug!(backend = name, hits = results.len(), "backend answered");
                        BackendReply { status: BackendStatus::reachable(name), results }
                    }
                    Err(reason) => {
                        let e = RecallError::BackendUnreachable { backend: name.to_string(), reason };
                        debug!(error = %e, "backend skipped for this query");
                        BackendReply { status: BackendStatus::unreachable(name, e.to_string()), results: Vec::new() }
                    }
                }
            });
        Ok(join_all(calls).await)
    }
}
