//! SQLite storage layer.
//!
//! All tables live in one database file so provenance links between
//! knowledge items and generated content stay queryable. Every operation
//! is a single synchronous transaction; no transaction spans a network
//! call, so a crash between an API call and its write loses only that
//! unit of work. Timestamps are stored as fixed-width RFC 3339 UTC text,
//! which sorts chronologically.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

const SCHEMA: &str = r#"
-- Raw ingested commits, deduped by sha
CREATE TABLE IF NOT EXISTS github_commits (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  repo_name TEXT NOT NULL,
  commit_sha TEXT NOT NULL UNIQUE,
  commit_message TEXT NOT NULL,
  timestamp TEXT NOT NULL,
  author TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_commits_timestamp ON github_commits(timestamp);

-- Raw ingested coding-session prompts, deduped by message uuid
CREATE TABLE IF NOT EXISTS claude_messages (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  session_id TEXT NOT NULL,
  message_uuid TEXT NOT NULL UNIQUE,
  project_path TEXT NOT NULL,
  timestamp TEXT NOT NULL,
  prompt_text TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON claude_messages(timestamp);

-- Produced artifacts with their evaluation verdict
CREATE TABLE IF NOT EXISTS generated_content (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  content_type TEXT NOT NULL,
  source_commits TEXT NOT NULL,
  source_messages TEXT NOT NULL,
  content TEXT NOT NULL,
  eval_score REAL NOT NULL,
  eval_feedback TEXT NOT NULL,
  published INTEGER NOT NULL DEFAULT 0,
  published_url TEXT,
  created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_content_published ON generated_content(published);

-- Single-row poll cursor (id is pinned to 1)
CREATE TABLE IF NOT EXISTS poll_state (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  last_poll_time TEXT NOT NULL
);

-- Embedded knowledge items, deduped by (source_type, source_id)
CREATE TABLE IF NOT EXISTS knowledge (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  source_type TEXT NOT NULL,
  source_id TEXT NOT NULL,
  source_url TEXT,
  author TEXT NOT NULL,
  content TEXT NOT NULL,
  insight TEXT,
  embedding BLOB,
  attribution_required INTEGER NOT NULL DEFAULT 1,
  approved INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL,
  UNIQUE(source_type, source_id)
);
CREATE INDEX IF NOT EXISTS idx_knowledge_type ON knowledge(source_type);

-- Provenance: which knowledge items influenced which artifacts (append-only)
CREATE TABLE IF NOT EXISTS content_knowledge_links (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  content_id INTEGER NOT NULL,
  knowledge_id INTEGER NOT NULL,
  relevance_score REAL NOT NULL,
  created_at TEXT NOT NULL
);
"#;

/// One produced artifact (post/thread/blog) with its evaluation verdict.
///
/// Immutable except for the publish transition, which is one-way.
#[derive(Debug, Clone)]
pub struct GeneratedContentRecord {
    pub id: i64,
    pub content_type: String,
    pub source_commits: Vec<String>,
    pub source_messages: Vec<String>,
    pub content: String,
    pub eval_score: f64,
    pub eval_feedback: String,
    pub published: bool,
    pub published_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A stored commit row.
#[derive(Debug, Clone)]
pub struct StoredCommit {
    pub repo_name: String,
    pub commit_sha: String,
    pub commit_message: String,
    pub timestamp: DateTime<Utc>,
    pub author: String,
}

/// A stored coding-session prompt row.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub session_id: String,
    pub message_uuid: String,
    pub project_path: String,
    pub timestamp: DateTime<Utc>,
    pub prompt_text: String,
}

/// SQLite database handle. All methods take `&self`; rusqlite statements
/// borrow the connection immutably.
pub struct Database {
    conn: Connection,
}

/// Fixed-width RFC 3339 with microsecond precision, so text ordering
/// matches chronological ordering.
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid stored timestamp: {}", raw))
}

impl Database {
    /// Open (or create) the database file and apply the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open database")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Create an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA)
            .context("Failed to initialize database schema")
    }

    /// Raw connection access for the knowledge store, which keeps its own
    /// SQL alongside the embedding logic.
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    // ========================================================================
    // GitHub commits
    // ========================================================================

    pub fn is_commit_processed(&self, commit_sha: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM github_commits WHERE commit_sha = ?1",
                params![commit_sha],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn insert_commit(
        &self,
        repo_name: &str,
        commit_sha: &str,
        commit_message: &str,
        timestamp: DateTime<Utc>,
        author: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO github_commits (repo_name, commit_sha, commit_message, timestamp, author)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                repo_name,
                commit_sha,
                commit_message,
                format_ts(timestamp),
                author
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn commits_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredCommit>> {
        let mut stmt = self.conn.prepare(
            "SELECT repo_name, commit_sha, commit_message, timestamp, author
             FROM github_commits
             WHERE timestamp >= ?1 AND timestamp < ?2
             ORDER BY timestamp",
        )?;
        let mut rows = stmt.query(params![format_ts(start), format_ts(end)])?;

        let mut commits = Vec::new();
        while let Some(row) = rows.next()? {
            let raw_ts: String = row.get(3)?;
            commits.push(StoredCommit {
                repo_name: row.get(0)?,
                commit_sha: row.get(1)?,
                commit_message: row.get(2)?,
                timestamp: parse_ts(&raw_ts)?,
                author: row.get(4)?,
            });
        }
        Ok(commits)
    }

    // ========================================================================
    // Claude messages
    // ========================================================================

    pub fn is_message_processed(&self, message_uuid: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM claude_messages WHERE message_uuid = ?1",
                params![message_uuid],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn insert_message(
        &self,
        session_id: &str,
        message_uuid: &str,
        project_path: &str,
        timestamp: DateTime<Utc>,
        prompt_text: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO claude_messages (session_id, message_uuid, project_path, timestamp, prompt_text)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session_id,
                message_uuid,
                project_path,
                format_ts(timestamp),
                prompt_text
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn messages_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, message_uuid, project_path, timestamp, prompt_text
             FROM claude_messages
             WHERE timestamp >= ?1 AND timestamp < ?2
             ORDER BY timestamp",
        )?;
        let mut rows = stmt.query(params![format_ts(start), format_ts(end)])?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            let raw_ts: String = row.get(3)?;
            messages.push(StoredMessage {
                session_id: row.get(0)?,
                message_uuid: row.get(1)?,
                project_path: row.get(2)?,
                timestamp: parse_ts(&raw_ts)?,
                prompt_text: row.get(4)?,
            });
        }
        Ok(messages)
    }

    // ========================================================================
    // Generated content
    // ========================================================================

    pub fn insert_generated_content(
        &self,
        content_type: &str,
        source_commits: &[String],
        source_messages: &[String],
        content: &str,
        eval_score: f64,
        eval_feedback: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO generated_content
             (content_type, source_commits, source_messages, content, eval_score, eval_feedback, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                content_type,
                serde_json::to_string(source_commits)?,
                serde_json::to_string(source_messages)?,
                content,
                eval_score,
                eval_feedback,
                format_ts(Utc::now()),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// The one-way publish transition. Gated on `published = 0`, so a
    /// record can never be re-published or un-published.
    pub fn mark_published(&self, content_id: i64, url: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE generated_content SET published = 1, published_url = ?1
             WHERE id = ?2 AND published = 0",
            params![url, content_id],
        )?;
        Ok(())
    }

    /// Eligible queue for retry: unpublished records at or above the score
    /// floor, oldest first.
    pub fn get_unpublished_content(
        &self,
        content_type: &str,
        min_score: f64,
    ) -> Result<Vec<GeneratedContentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, content_type, source_commits, source_messages, content,
                    eval_score, eval_feedback, published, published_url, created_at
             FROM generated_content
             WHERE content_type = ?1 AND published = 0 AND eval_score >= ?2
             ORDER BY created_at, id",
        )?;
        let mut rows = stmt.query(params![content_type, min_score])?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(Self::row_to_content(row)?);
        }
        Ok(records)
    }

    /// Published records of one type, oldest first. Feeds knowledge
    /// ingestion, which re-reads the account's own published posts.
    pub fn get_published_content(&self, content_type: &str) -> Result<Vec<GeneratedContentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, content_type, source_commits, source_messages, content,
                    eval_score, eval_feedback, published, published_url, created_at
             FROM generated_content
             WHERE content_type = ?1 AND published = 1
             ORDER BY created_at, id",
        )?;
        let mut rows = stmt.query(params![content_type])?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(Self::row_to_content(row)?);
        }
        Ok(records)
    }

    pub fn get_content(&self, content_id: i64) -> Result<Option<GeneratedContentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, content_type, source_commits, source_messages, content,
                    eval_score, eval_feedback, published, published_url, created_at
             FROM generated_content WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![content_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_content(row)?)),
            None => Ok(None),
        }
    }

    fn row_to_content(row: &rusqlite::Row) -> Result<GeneratedContentRecord> {
        let source_commits: String = row.get(2)?;
        let source_messages: String = row.get(3)?;
        let published: i64 = row.get(7)?;
        let raw_ts: String = row.get(9)?;

        Ok(GeneratedContentRecord {
            id: row.get(0)?,
            content_type: row.get(1)?,
            source_commits: serde_json::from_str(&source_commits)
                .context("invalid source_commits JSON")?,
            source_messages: serde_json::from_str(&source_messages)
                .context("invalid source_messages JSON")?,
            content: row.get(4)?,
            eval_score: row.get(5)?,
            eval_feedback: row.get(6)?,
            published: published != 0,
            published_url: row.get(8)?,
            created_at: parse_ts(&raw_ts)?,
        })
    }

    // ========================================================================
    // Poll state
    // ========================================================================

    /// The last completed poll time; `None` means never polled (the caller
    /// must fall back to a lookback window).
    pub fn last_poll_time(&self) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT last_poll_time FROM poll_state WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(Some(parse_ts(&raw)?)),
            None => Ok(None),
        }
    }

    /// Overwrite the single poll-state row atomically.
    pub fn set_last_poll_time(&self, ts: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO poll_state (id, last_poll_time) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET last_poll_time = excluded.last_poll_time",
            params![format_ts(ts)],
        )?;
        Ok(())
    }
}
