//! Domain types shared by the chunker, the backends and the merger.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::hashing::content_key;

pub type ChunkId = String;
pub type FactId = String;
pub type Meta = BTreeMap<String, String>;

/// Metadata key holding the originating source file of a chunk hit.
pub const META_SOURCE_PATH: &str = "source_path";
/// Metadata key holding the joined header path of a chunk hit.
pub const META_HEADERS: &str = "headers";
pub const META_CHUNK_INDEX: &str = "chunk_index";
pub const META_CHUNK_ID: &str = "chunk_id";
/// Metadata key holding a backend-assigned record id (facts, passages).
pub const META_RECORD_ID: &str = "id";

/// Separator used when a header path is joined for display.
pub const HEADER_SEPARATOR: &str = " > ";

/// A chunk of a source document that is independently indexed.
///
/// - `id`: stable identifier derived from `(source_path, chunk_index)`
/// - `text`: the payload, including lines carried over from the previous chunk
/// - `header_path`: Markdown headings enclosing the chunk, outermost first
/// - `carried_len`: byte length of the leading overlap copied from the previous chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub source_path: String,
    pub chunk_index: usize,
    pub text: String,
    pub header_path: Vec<String>,
    pub carried_len: usize,
}

impl Chunk {
    pub fn make_id(source_path: &str, chunk_index: usize) -> ChunkId {
        format!("{}:{}", source_path, chunk_index)
    }

    /// Header path joined for display, e.g. `"Preferences > Communication"`.
    pub fn headers(&self) -> String {
        self.header_path.join(HEADER_SEPARATOR)
    }

    /// The part of `text` that is new to this chunk.
    pub fn fresh_text(&self) -> &str {
        &self.text[self.carried_len..]
    }
}

/// One backend's answer to a query.
///
/// `score` is backend-local and lower is always more relevant. `content_key`
/// is a normalized hash of `text` used to collapse the same content surfaced
/// by several backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub backend: String,
    pub text: String,
    pub score: f32,
    pub metadata: Meta,
    pub content_key: String,
}

impl SearchResult {
    pub fn new(backend: impl Into<String>, text: impl Into<String>, score: f32) -> Self {
        let text = text.into();
        let content_key = content_key(&text);
        Self { backend: backend.into(), text, score, metadata: Meta::new(), content_key }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn source_path(&self) -> Option<&str> {
        self.metadata.get(META_SOURCE_PATH).map(String::as_str)
    }

    pub fn headers(&self) -> Option<&str> {
        self.metadata.get(META_HEADERS).map(String::as_str).filter(|h| !h.is_empty())
    }
}

/// Reachability of one backend for one call. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStatus {
    pub name: String,
    pub reachable: bool,
    pub last_error: Option<String>,
}

impl BackendStatus {
    pub fn reachable(name: impl Into<String>) -> Self {
        Self { name: name.into(), reachable: true, last_error: None }
    }

    pub fn unreachable(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self { name: name.into(), reachable: false, last_error: Some(error.into()) }
    }
}

/// Capabilities a backend declares. Used for display and stats only; the
/// coordinator asks the backend itself through the `as_*` accessors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub indexable: bool,
    pub searchable: bool,
    pub fact_store: bool,
}
