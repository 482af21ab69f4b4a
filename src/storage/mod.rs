//! Persistent storage: SQLite-backed state for ingested sources,
//! generated content, and the poll cursor.

pub mod db;

pub use db::{Database, GeneratedContentRecord};
