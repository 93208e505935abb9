//! recall-text
//!
//! Tantivy-backed persistent chunk store. Implements the `Indexable` and
//! `Searchable` capabilities over BM25 full-text search.

pub mod store;
pub mod tantivy_utils;

pub use store::TantivyChunkStore;
