mod common;

use std::sync::Arc;
use tempfile::TempDir;

use common::{Call, FakeBackend};
use recall_core::chunker::{Chunker, ChunkingConfig};
use recall_core::error::RecallError;
use recall_core::source::{SourceBatch, SourceDocument, UnreadableSource};
use recall_core::state::IndexStateStore;
use recall_hybrid::Indexer;

fn docs() -> Vec<SourceDocument> {
    vec![
        SourceDocument::new("a.md", "# Travel\nFlights booked for March.\n"),
        SourceDocument::new("b.md", "# Food\nJack prefers tea over coffee.\n"),
        SourceDocument::new("c.md", "# Work\nStandup moved to 10am.\n"),
    ]
}

fn setup() -> (TempDir, Arc<FakeBackend>, Indexer) {
    let dir = TempDir::new().expect("tempdir");
    let backend = Arc::new(FakeBackend::indexable("chunks"));
    let store = IndexStateStore::new(dir.path().join("state.json"));
    let indexer = Indexer::new(Chunker::new(ChunkingConfig::default()), store, backend.clone());
    (dir, backend, indexer)
}

fn upserts(calls: &[Call]) -> Vec<&str> {
    calls
        .iter()
        .filter_map(|c| match c {
            Call::Upsert { path, .. } => Some(path.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn second_run_is_a_no_op() {
    let (_dir, backend, indexer) = setup();
    let first = indexer.reindex(&docs(), false).await.expect("first run");
    assert_eq!(first.files_processed, 3);
    assert_eq!(first.chunks_written, 3);
    assert_eq!(upserts(&backend.take_calls()), vec!["a.md", "b.md", "c.md"]);

    let second = indexer.reindex(&docs(), false).await.expect("second run");
    assert_eq!(second.files_processed, 0);
    assert_eq!(second.files_skipped, 3);
    assert!(backend.take_calls().is_empty(), "no backend writes for unchanged files");

    let state = indexer.state_store().load();
    assert_eq!(state.files.len(), 3);
    assert_eq!(state.files["b.md"].chunk_ids, vec!["b.md:0".to_string()]);
    assert!(state.last_full_index.is_some());
}

#[tokio::test]
async fn only_the_changed_file_is_rewritten() {
    let (_dir, backend, indexer) = setup();
    indexer.reindex(&docs(), false).await.expect("first run");
    backend.take_calls();

    let mut changed = docs();
    changed[1] = SourceDocument::new("b.md", "# Food\nJack now prefers coffee.\n");
    let report = indexer.reindex(&changed, false).await.expect("second run");

    assert_eq!(report.files_processed, 1);
    assert_eq!(report.files_skipped, 2);
    assert_eq!(
        backend.take_calls(),
        vec![Call::Delete("b.md".to_string()), Call::Upsert { path: "b.md".to_string(), chunks: 1 }],
        "old chunks are removed before new ones are written"
    );
}

#[tokio::test]
async fn force_rewrites_everything() {
    let (_dir, backend, indexer) = setup();
    indexer.reindex(&docs(), false).await.expect("first run");
    backend.take_calls();

    let report = indexer.reindex(&docs(), true).await.expect("forced run");
    assert_eq!(report.files_processed, 3);
    assert_eq!(report.files_skipped, 0);
    let calls = backend.take_calls();
    assert_eq!(upserts(&calls).len(), 3);
    assert_eq!(calls.iter().filter(|c| matches!(c, Call::Delete(_))).count(), 3);
}

#[tokio::test]
async fn failed_upsert_leaves_a_pending_record_and_is_retried() {
    let (_dir, backend, indexer) = setup();
    indexer.reindex(&docs(), false).await.expect("first run");

    let mut changed = docs();
    changed[0] = SourceDocument::new("a.md", "# Travel\nFlights moved to April.\n");
    backend.fail_upsert_for("a.md");
    let report = indexer.reindex(&changed, false).await.expect("run with failure");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, "a.md");
    assert!(report.failures[0].error.contains("disk full"));

    let state = indexer.state_store().load();
    assert!(state.files["a.md"].is_pending());
    assert!(state.files["a.md"].chunk_ids.is_empty(), "no record of chunks that did not land");
    assert_eq!(state.files["b.md"].chunk_ids.len(), 1);

    backend.heal();
    backend.take_calls();
    let retry = indexer.reindex(&changed, false).await.expect("retry");
    assert_eq!(retry.files_processed, 1);
    assert!(retry.failures.is_empty());
    assert_eq!(upserts(&backend.take_calls()), vec!["a.md"]);
    assert!(!indexer.state_store().load().files["a.md"].is_pending());
}

#[tokio::test]
async fn failed_delete_keeps_the_old_record() {
    let (_dir, backend, indexer) = setup();
    indexer.reindex(&docs(), false).await.expect("first run");
    let before = indexer.state_store().load().files["c.md"].clone();

    let mut changed = docs();
    changed[2] = SourceDocument::new("c.md", "# Work\nStandup cancelled.\n");
    backend.fail_delete_for("c.md");
    let report = indexer.reindex(&changed, false).await.expect("run with failure");

    assert_eq!(report.failures.len(), 1);
    assert_eq!(indexer.state_store().load().files["c.md"], before);
    assert!(upserts(&backend.take_calls()).iter().all(|p| *p != "c.md"));

    backend.heal();
    let retry = indexer.reindex(&changed, false).await.expect("retry");
    assert_eq!(retry.files_processed, 1);
}

#[tokio::test]
async fn removed_sources_are_pruned() {
    let (_dir, backend, indexer) = setup();
    indexer.reindex(&docs(), false).await.expect("first run");
    backend.take_calls();

    let remaining = docs().into_iter().filter(|d| d.path != "b.md").collect::<Vec<_>>();
    let report = indexer.reindex(&remaining, false).await.expect("second run");

    assert_eq!(report.files_removed, 1);
    assert_eq!(backend.take_calls(), vec![Call::Delete("b.md".to_string())]);
    assert!(!indexer.state_store().load().files.contains_key("b.md"));
}

#[tokio::test]
async fn empty_document_writes_nothing() {
    let (_dir, backend, indexer) = setup();
    let report = indexer.reindex(&[SourceDocument::new("empty.md", "")], false).await.expect("run");
    assert_eq!(report.files_processed, 1);
    assert_eq!(report.chunks_written, 0);
    assert!(upserts(&backend.take_calls()).is_empty());
    assert_eq!(indexer.state_store().load().chunk_count("empty.md"), 0);
}

#[tokio::test]
async fn concurrent_reindex_is_refused() {
    let (_dir, _backend, indexer) = setup();
    let _held = indexer.state_store().lock().expect("lock");
    let err = indexer.reindex(&docs(), false).await.expect_err("locked");
    assert!(matches!(err, RecallError::IndexLocked(_)));
}

#[tokio::test]
async fn target_must_accept_chunks() {
    let dir = TempDir::new().expect("tempdir");
    let backend = Arc::new(FakeBackend::fact_store("facts"));
    let indexer = Indexer::new(Chunker::new(ChunkingConfig::default()), IndexStateStore::new(dir.path().join("s.json")), backend);
    let err = indexer.reindex(&docs(), false).await.expect_err("not indexable");
    assert!(matches!(err, RecallError::InvalidConfig(_)));
}

#[tokio::test]
async fn lost_state_still_clears_old_chunks_before_writing() {
    let (dir, backend, indexer) = setup();
    indexer.reindex(&docs(), false).await.expect("first run");
    std::fs::remove_file(dir.path().join("state.json")).expect("drop state");
    backend.take_calls();

    indexer.reindex(&docs()[..1], false).await.expect("second run");
    assert_eq!(
        backend.take_calls(),
        vec![Call::Delete("a.md".to_string()), Call::Upsert { path: "a.md".to_string(), chunks: 1 }]
    );
}

#[tokio::test]
async fn content_without_a_record_is_pruned() {
    let dir = TempDir::new().expect("tempdir");
    let backend = Arc::new(FakeBackend::indexable("chunks").holding(&["a.md", "orphan.md"]));
    let store = IndexStateStore::new(dir.path().join("state.json"));
    let indexer = Indexer::new(Chunker::new(ChunkingConfig::default()), store, backend.clone());

    let report = indexer.reindex(&docs()[..1], false).await.expect("run");
    assert_eq!(report.files_removed, 1);
    let calls = backend.take_calls();
    assert!(calls.contains(&Call::Delete("orphan.md".to_string())));
    assert!(!calls.contains(&Call::Upsert { path: "orphan.md".to_string(), chunks: 1 }));
}

#[tokio::test]
async fn mirrors_receive_copies_without_affecting_records() {
    let dir = TempDir::new().expect("tempdir");
    let target = Arc::new(FakeBackend::indexable("chunks"));
    let mirror = Arc::new(FakeBackend::indexable("archive"));
    let offline = Arc::new(FakeBackend::indexable("offline").failing());
    let store = IndexStateStore::new(dir.path().join("state.json"));
    let indexer = Indexer::new(Chunker::new(ChunkingConfig::default()), store, target.clone())
        .with_mirrors(vec![mirror.clone(), offline.clone()]);

    mirror.fail_upsert_for("b.md");
    let report = indexer.reindex(&docs(), false).await.expect("run");
    assert!(report.failures.is_empty());
    assert_eq!(report.mirror_failures.len(), 1);
    assert_eq!(report.mirror_failures[0].path, "b.md");
    assert!(report.mirror_failures[0].error.starts_with("archive:"));
    assert_eq!(upserts(&mirror.take_calls()), vec!["a.md", "b.md", "c.md"]);
    assert!(offline.take_calls().is_empty(), "unreachable mirror is skipped");
    assert!(!indexer.state_store().load().files["b.md"].is_pending());

    let remaining = docs().into_iter().filter(|d| d.path != "c.md").collect::<Vec<_>>();
    indexer.reindex(&remaining, false).await.expect("second run");
    assert_eq!(mirror.take_calls(), vec![Call::Delete("c.md".to_string())]);
}

#[tokio::test]
async fn unreadable_sources_keep_their_content() {
    let (_dir, backend, indexer) = setup();
    indexer.reindex(&docs(), false).await.expect("first run");
    backend.take_calls();

    let batch = SourceBatch {
        documents: docs().into_iter().filter(|d| d.path != "b.md").collect(),
        unreadable: vec![UnreadableSource { path: "b.md".to_string(), error: "permission denied".to_string() }],
    };
    let report = indexer.reindex_batch(&batch, false).await.expect("run");
    assert_eq!(report.files_removed, 0);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, "b.md");
    assert!(backend.take_calls().is_empty());
    assert_eq!(indexer.state_store().load().chunk_count("b.md"), 1);
}
