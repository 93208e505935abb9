use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::debug;

use recall_core::traits::{Backend, Indexable, Searchable};
use recall_core::types::{Chunk, SearchResult, META_CHUNK_ID, META_CHUNK_INDEX, META_HEADERS, META_SOURCE_PATH};

use crate::tantivy_utils::{build_schema, register_tokenizer};

const WRITER_MEMORY: usize = 50_000_000;

#[derive(Clone, Copy)]
struct ChunkFields {
	id: Field,
	source_path: Field,
	chunk_index: Field,
	headers: Field,
	text: Field,
}

struct Inner {
	index: Index,
	reader: IndexReader,
	/// Serializes writers within this process.
	write_lock: Mutex<()>,
	fields: ChunkFields,
}

/// Persistent chunk store. Opening takes no lock: tantivy's directory-wide
/// writer lock is held only for the duration of one write, so any number of
/// processes can search the same index while one of them writes. Every write
/// commits and reloads the reader, and every read reloads it first, so a
/// search sees whatever was last committed by any process.
pub struct TantivyChunkStore {
	name: String,
	inner: Arc<Inner>,
}

impl TantivyChunkStore {
	pub fn open(name: impl Into<String>, index_dir: &Path) -> Result<Self> {
		std::fs::create_dir_all(index_dir)?;
		let index = Index::open_or_create(MmapDirectory::open(index_dir)?, build_schema())?;
		Self::from_index(name.into(), index)
	}

	pub fn in_memory(name: impl Into<String>) -> Result<Self> {
		Self::from_index(name.into(), Index::create_in_ram(build_schema()))
	}

	fn from_index(name: String, index: Index) -> Result<Self> {
		register_tokenizer(&index);
		let schema = index.schema();
		let fields = ChunkFields {
			id: schema.get_field("id")?,
			source_path: schema.get_field("source_path")?,
			chunk_index: schema.get_field("chunk_index")?,
			headers: schema.get_field("headers")?,
			text: schema.get_field("text")?,
		};
		let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;
		Ok(Self { name, inner: Arc::new(Inner { index, reader, write_lock: Mutex::new(()), fields }) })
	}

	pub fn num_chunks(&self) -> Result<u64> {
		self.inner.num_docs()
	}

	/// Ids of every stored chunk attributed to `source_path`, in chunk order.
	pub async fn chunk_ids_for(&self, source_path: &str) -> Result<Vec<String>> {
		let source_path = source_path.to_string();
		self.blocking(move |inner| inner.chunk_ids_for(&source_path)).await
	}

	async fn blocking<T, F>(&self, f: F) -> Result<T>
	where
		F: FnOnce(&Inner) -> Result<T> + Send + 'static,
		T: Send + 'static,
	{
		let inner = Arc::clone(&self.inner);
		tokio::task::spawn_blocking(move || f(&inner)).await?
	}
}

impl Inner {
	/// Run `f` against a writer that exists only for this call, then commit.
	/// The writer is dropped uncommitted if `f` fails.
	fn write<F>(&self, f: F) -> Result<()>
	where
		F: FnOnce(&mut IndexWriter, ChunkFields) -> Result<()>,
	{
		let _guard = self.write_lock.lock().map_err(|_| anyhow!("chunk index write lock poisoned"))?;
		let mut writer: IndexWriter = self.index.writer_with_num_threads(1, WRITER_MEMORY)?;
		f(&mut writer, self.fields)?;
		writer.commit()?;
		writer.wait_merging_threads()?;
		self.reader.reload()?;
		Ok(())
	}

	fn upsert(&self, chunks: &[Chunk]) -> Result<()> {
		self.write(|writer, f| {
			for c in chunks {
				writer.delete_term(Term::from_field_text(f.id, &c.id));
				writer.add_document(doc!(
					f.id => c.id.clone(),
					f.source_path => c.source_path.clone(),
					f.chunk_index => c.chunk_index as u64,
					f.headers => c.headers(),
					f.text => c.text.clone(),
				))?;
			}
			Ok(())
		})
	}

	fn delete(&self, source_path: &str) -> Result<()> {
		self.write(|writer, f| {
			writer.delete_term(Term::from_field_text(f.source_path, source_path));
			Ok(())
		})
	}

	fn search(&self, backend: &str, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
		if limit == 0 {
			return Ok(Vec::new());
		}
		self.reader.reload()?;
		let f = self.fields;
		let searcher = self.reader.searcher();
		let qp = QueryParser::for_index(&self.index, vec![f.text, f.headers]);
		let (q, errors) = qp.parse_query_lenient(query);
		if !errors.is_empty() {
			debug!(query, errors = errors.len(), "query parsed leniently");
		}
		let top_docs = searcher.search(&q, &TopDocs::with_limit(limit))?;
		let mut hits = Vec::with_capacity(top_docs.len());
		for (bm25, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr)?;
			let text_of = |field: Field| doc.get_first(field).and_then(|v| v.as_str()).unwrap_or("").to_string();
			let chunk_index = doc.get_first(f.chunk_index).and_then(|v| v.as_u64()).unwrap_or(0);
			// BM25 grows with relevance; results are ranked lower-is-better.
			let score = 1.0 / (1.0 + bm25);
			hits.push(
				SearchResult::new(backend, text_of(f.text), score)
					.with_meta(META_SOURCE_PATH, text_of(f.source_path))
					.with_meta(META_HEADERS, text_of(f.headers))
					.with_meta(META_CHUNK_INDEX, chunk_index.to_string())
					.with_meta(META_CHUNK_ID, text_of(f.id)),
			);
		}
		Ok(hits)
	}

	fn chunk_ids_for(&self, source_path: &str) -> Result<Vec<String>> {
		self.reader.reload()?;
		let f = self.fields;
		let searcher = self.reader.searcher();
		let limit = usize::try_from(searcher.num_docs())?.max(1);
		let q = TermQuery::new(Term::from_field_text(f.source_path, source_path), IndexRecordOption::Basic);
		let mut found = Vec::new();
		for (_, addr) in searcher.search(&q, &TopDocs::with_limit(limit))? {
			let doc: TantivyDocument = searcher.doc(addr)?;
			let index = doc.get_first(f.chunk_index).and_then(|v| v.as_u64()).unwrap_or(0);
			let id = doc.get_first(f.id).and_then(|v| v.as_str()).unwrap_or("").to_string();
			found.push((index, id));
		}
		found.sort();
		Ok(found.into_iter().map(|(_, id)| id).collect())
	}

	fn num_docs(&self) -> Result<u64> {
		self.reader.reload()?;
		Ok(self.reader.searcher().num_docs())
	}

	fn source_paths(&self) -> Result<Vec<String>> {
		self.reader.reload()?;
		let searcher = self.reader.searcher();
		let limit = usize::try_from(searcher.num_docs())?.max(1);
		let mut paths = BTreeSet::new();
		for (_, addr) in searcher.search(&AllQuery, &TopDocs::with_limit(limit))? {
			let doc: TantivyDocument = searcher.doc(addr)?;
			if let Some(path) = doc.get_first(self.fields.source_path).and_then(|v| v.as_str()) {
				paths.insert(path.to_string());
			}
		}
		Ok(paths.into_iter().collect())
	}
}

#[async_trait]
impl Indexable for TantivyChunkStore {
	async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
		if chunks.is_empty() {
			return Ok(());
		}
		let chunks = chunks.to_vec();
		self.blocking(move |inner| inner.upsert(&chunks)).await
	}

	async fn delete_chunks(&self, source_path: &str) -> Result<()> {
		let source_path = source_path.to_string();
		self.blocking(move |inner| inner.delete(&source_path)).await
	}

	async fn source_paths(&self) -> Result<Option<Vec<String>>> {
		self.blocking(|inner| inner.source_paths()).await.map(Some)
	}
}

#[async_trait]
impl Searchable for TantivyChunkStore {
	async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
		let (backend, query) = (self.name.clone(), query.to_string());
		self.blocking(move |inner| inner.search(&backend, &query, limit)).await
	}
}

#[async_trait]
impl Backend for TantivyChunkStore {
	fn name(&self) -> &str {
		&self.name
	}

	fn as_indexable(&self) -> Option<&dyn Indexable> {
		Some(self)
	}

	fn as_searchable(&self) -> Option<&dyn Searchable> {
		Some(self)
	}

	async fn item_count(&self) -> Result<Option<u64>> {
		self.blocking(|inner| inner.num_docs()).await.map(Some)
	}
}
