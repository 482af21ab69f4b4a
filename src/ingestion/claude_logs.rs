//! Coding-session log ingestion.
//!
//! Reads the assistant's `history.jsonl` (one JSON object per line) and
//! per-session files. Malformed lines are skipped silently — log files
//! are written by another process and occasionally torn.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;

/// One user prompt from a coding session.
#[derive(Debug, Clone)]
pub struct ClaudeMessage {
    pub session_id: String,
    pub message_uuid: String,
    pub project_path: String,
    pub timestamp: DateTime<Utc>,
    pub prompt_text: String,
}

/// Global history entry: `display`, millisecond `timestamp`, `project`,
/// `sessionId`.
#[derive(Debug, Deserialize)]
struct HistoryEntry {
    display: Option<String>,
    timestamp: Option<i64>,
    #[serde(default)]
    project: String,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Session-file entry: typed records with a nested message body.
#[derive(Debug, Deserialize)]
struct SessionEntry {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<SessionMessage>,
    uuid: Option<String>,
    timestamp: Option<String>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    #[serde(default)]
    cwd: String,
}

#[derive(Debug, Deserialize)]
struct SessionMessage {
    content: Option<serde_json::Value>,
}

/// Parser over a coding-assistant log directory (default `~/.claude`).
pub struct ClaudeLogParser {
    claude_dir: PathBuf,
}

impl ClaudeLogParser {
    pub fn new(claude_dir: &str) -> Self {
        let expanded = if let Some(rest) = claude_dir.strip_prefix("~/") {
            dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| PathBuf::from(claude_dir))
        } else {
            PathBuf::from(claude_dir)
        };
        Self {
            claude_dir: expanded,
        }
    }

    /// Parse the global `history.jsonl` for quick access to all prompts.
    /// A missing file is an empty history, not an error.
    pub fn parse_global_history(&self) -> Result<Vec<ClaudeMessage>> {
        let history_file = self.claude_dir.join("history.jsonl");
        if !history_file.exists() {
            return Ok(vec![]);
        }

        let raw = std::fs::read_to_string(&history_file)?;
        let mut messages = Vec::new();

        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(entry) = serde_json::from_str::<HistoryEntry>(line) else {
                continue;
            };
            let (Some(display), Some(ts_millis)) = (entry.display, entry.timestamp) else {
                continue;
            };
            if display.is_empty() {
                continue;
            }
            let Some(timestamp) = Utc.timestamp_millis_opt(ts_millis).single() else {
                continue;
            };

            let session_id = entry.session_id.unwrap_or_else(|| "unknown".to_string());
            messages.push(ClaudeMessage {
                message_uuid: format!("{}_{}", session_id, ts_millis),
                session_id,
                project_path: entry.project,
                timestamp,
                prompt_text: display,
            });
        }

        Ok(messages)
    }

    /// Parse a session JSONL file for full conversation detail. Only
    /// user messages with plain-string content are yielded.
    pub fn parse_session_file(&self, session_path: &Path) -> Result<Vec<ClaudeMessage>> {
        if !session_path.exists() {
            return Ok(vec![]);
        }

        let raw = std::fs::read_to_string(session_path)?;
        let mut messages = Vec::new();

        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(entry) = serde_json::from_str::<SessionEntry>(line) else {
                continue;
            };
            if entry.kind.as_deref() != Some("user") {
                continue;
            }
            let Some(content) = entry
                .message
                .and_then(|m| m.content)
                .and_then(|c| c.as_str().map(String::from))
            else {
                continue;
            };
            if content.is_empty() {
                continue;
            }
            let Some(timestamp) = entry
                .timestamp
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc))
            else {
                continue;
            };

            messages.push(ClaudeMessage {
                session_id: entry.session_id.unwrap_or_else(|| "unknown".to_string()),
                message_uuid: entry.uuid.unwrap_or_else(|| "unknown".to_string()),
                project_path: entry.cwd,
                timestamp,
                prompt_text: content,
            });
        }

        Ok(messages)
    }

    /// All user messages at or after `since`.
    pub fn messages_since(&self, since: DateTime<Utc>) -> Result<Vec<ClaudeMessage>> {
        Ok(self
            .parse_global_history()?
            .into_iter()
            .filter(|m| m.timestamp >= since)
            .collect())
    }

    /// Prompts within `window_minutes` either side of a timestamp —
    /// used to find the prompts that accompanied a commit.
    pub fn prompts_around(
        &self,
        timestamp: DateTime<Utc>,
        window_minutes: i64,
    ) -> Result<Vec<ClaudeMessage>> {
        let start = timestamp - Duration::minutes(window_minutes);
        let end = timestamp + Duration::minutes(window_minutes);
        Ok(self
            .parse_global_history()?
            .into_iter()
            .filter(|m| m.timestamp >= start && m.timestamp <= end)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_history(dir: &Path, lines: &[&str]) {
        let mut file = std::fs::File::create(dir.join("history.jsonl")).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
    }

    fn parser_for(dir: &Path) -> ClaudeLogParser {
        ClaudeLogParser::new(dir.to_str().unwrap())
    }

    #[test]
    fn test_missing_history_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let parser = parser_for(dir.path());
        assert!(parser.parse_global_history().unwrap().is_empty());
    }

    #[test]
    fn test_parse_global_history_skips_malformed() {
        let dir = tempfile::tempdir().unwrap();
        write_history(
            dir.path(),
            &[
                r#"{"display":"help me debug this deadlock","timestamp":1748779200000,"project":"/p","sessionId":"s1"}"#,
                "not json at all",
                r#"{"display":"","timestamp":1748779201000,"sessionId":"s1"}"#,
                r#"{"timestamp":1748779202000,"sessionId":"s1"}"#,
            ],
        );

        let parser = parser_for(dir.path());
        let messages = parser.parse_global_history().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].prompt_text, "help me debug this deadlock");
        assert_eq!(messages[0].session_id, "s1");
        assert_eq!(messages[0].message_uuid, "s1_1748779200000");
        assert_eq!(messages[0].project_path, "/p");
    }

    #[test]
    fn test_messages_since_filters() {
        let dir = tempfile::tempdir().unwrap();
        write_history(
            dir.path(),
            &[
                r#"{"display":"old prompt here","timestamp":1748779200000,"sessionId":"s1"}"#,
                r#"{"display":"new prompt here","timestamp":1748782800000,"sessionId":"s1"}"#,
            ],
        );

        let parser = parser_for(dir.path());
        let cutoff = Utc.timestamp_millis_opt(1748781000000).single().unwrap();
        let messages = parser.messages_since(cutoff).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].prompt_text, "new prompt here");
    }

    #[test]
    fn test_prompts_around_window() {
        let dir = tempfile::tempdir().unwrap();
        // 12:00, 12:20, and 14:00 UTC
        write_history(
            dir.path(),
            &[
                r#"{"display":"at noon","timestamp":1748779200000,"sessionId":"s1"}"#,
                r#"{"display":"twenty past","timestamp":1748780400000,"sessionId":"s1"}"#,
                r#"{"display":"afternoon","timestamp":1748786400000,"sessionId":"s1"}"#,
            ],
        );

        let parser = parser_for(dir.path());
        let commit_time = Utc.timestamp_millis_opt(1748779800000).single().unwrap();
        let prompts = parser.prompts_around(commit_time, 30).unwrap();
        let texts: Vec<&str> = prompts.iter().map(|m| m.prompt_text.as_str()).collect();
        assert_eq!(texts, vec!["at noon", "twenty past"]);
    }

    #[test]
    fn test_parse_session_file() {
        let dir = tempfile::tempdir().unwrap();
        let session = dir.path().join("session.jsonl");
        let mut file = std::fs::File::create(&session).unwrap();
        writeln!(
            file,
            r#"{{"type":"user","message":{{"content":"fix the flaky test"}},"uuid":"u1","timestamp":"2025-06-01T12:00:00Z","sessionId":"s1","cwd":"/proj"}}"#
        )
        .unwrap();
        writeln!(
            file,
            r#"{{"type":"assistant","message":{{"content":"done"}},"uuid":"u2","timestamp":"2025-06-01T12:01:00Z","sessionId":"s1"}}"#
        )
        .unwrap();
        writeln!(
            file,
            r#"{{"type":"user","message":{{"content":[{{"type":"tool_result"}}]}},"uuid":"u3","timestamp":"2025-06-01T12:02:00Z","sessionId":"s1"}}"#
        )
        .unwrap();

        let parser = parser_for(dir.path());
        let messages = parser.parse_session_file(&session).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_uuid, "u1");
        assert_eq!(messages[0].prompt_text, "fix the flaky test");
        assert_eq!(messages[0].project_path, "/proj");
    }
}
