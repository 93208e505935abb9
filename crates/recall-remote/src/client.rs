use anyhow::{anyhow, Result};
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;

pub fn build_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// Turn a non-success status into an error carrying the response body.
pub async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(anyhow!("{} {}: {}", status.as_u16(), status.canonical_reason().unwrap_or(""), body.trim()))
}

/// Services answer either `{"results": [...]}` or a bare list depending on version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Listing<T> {
    Wrapped { results: Vec<T> },
    Bare(Vec<T>),
}

impl<T> Listing<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Wrapped { results } => results,
            Listing::Bare(items) => items,
        }
    }
}

pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
