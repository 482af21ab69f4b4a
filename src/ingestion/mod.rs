//! Source ingestion: GitHub commits and coding-session logs.
//!
//! These clients only read; dedup against storage happens in the
//! pipeline via `is_commit_processed` / `is_message_processed` before
//! any model call.

pub mod claude_logs;
pub mod github;

pub use claude_logs::{ClaudeLogParser, ClaudeMessage};
pub use github::{Commit, CommitsError, GitHubClient};
