//! recall-remote
//!
//! HTTP adapters for memory services that run outside this process: a
//! fact-extraction store speaking the Mem0 REST API and a hierarchical
//! archival store speaking the Letta REST API.

pub mod archive;
pub mod client;
pub mod facts;

pub use archive::LettaArchive;
pub use facts::Mem0FactStore;
