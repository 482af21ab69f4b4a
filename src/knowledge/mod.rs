//! Knowledge base: embedding-indexed storage of insights with
//! similarity search, identity dedup, and ingestion helpers.

pub mod ingest;
pub mod store;

pub use ingest::InsightExtractor;
pub use store::{KnowledgeItem, KnowledgeStore, SearchParams, SourceType};
