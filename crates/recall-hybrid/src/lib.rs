//! recall-hybrid
//!
//! Orchestration over the capability traits: incremental indexing into the
//! chunk store, concurrent fan-out of a query to every searchable backend,
//! and the merge that turns per-backend answers into one ranked list.

pub mod engine;
pub mod fanout;
pub mod indexer;
pub mod merge;

pub use engine::{RecallEngine, RecallResponse, RecallStatus};
pub use fanout::{BackendReply, FanOutCoordinator};
pub use indexer::{Indexer, ReindexReport};
pub use merge::{merge, RankedResult};
