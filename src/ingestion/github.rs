//! GitHub commit polling.
//!
//! Paginated reads over the user's repositories. Repos we cannot access
//! (403/404) and empty repos (409) are skipped, not fatal — losing one
//! repo must not abort a poll cycle.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use thiserror::Error;

const GITHUB_API_URL: &str = "https://api.github.com";
const PER_PAGE: u32 = 100;

/// Failure listing commits for one repository. The status-carrying
/// variant lets callers classify skippable repos structurally instead
/// of matching on error text.
#[derive(Debug, Error)]
pub enum CommitsError {
    #[error("GitHub commits for {repo} returned {status}")]
    Status { repo: String, status: u16 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One commit authored by the configured user.
#[derive(Debug, Clone)]
pub struct Commit {
    pub repo_name: String,
    pub sha: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct RepoItem {
    name: String,
    #[serde(default)]
    fork: bool,
}

#[derive(Debug, Deserialize)]
struct CommitItem {
    sha: String,
    html_url: String,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    message: String,
    author: CommitAuthor,
}

#[derive(Debug, Deserialize)]
struct CommitAuthor {
    name: String,
    date: String,
}

/// Read-only GitHub API client scoped to one user's repositories.
pub struct GitHubClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    username: String,
}

impl GitHubClient {
    pub fn new(token: &str, username: &str) -> Self {
        Self::with_base_url(GITHUB_API_URL, token, username)
    }

    /// Point at an explicit endpoint (used by tests).
    pub fn with_base_url(base_url: &str, token: &str, username: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("presence")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            username: username.to_string(),
        }
    }

    /// All repositories owned by the user (including private), forks
    /// excluded. Pages through `/user/repos` until an empty page.
    pub async fn user_repos(&self) -> Result<Vec<String>> {
        let mut repos = Vec::new();
        let mut page = 1u32;

        loop {
            let response = self
                .client
                .get(format!("{}/user/repos", self.base_url))
                .bearer_auth(&self.token)
                .header("Accept", "application/vnd.github.v3+json")
                .query(&[
                    ("affiliation", "owner".to_string()),
                    ("sort", "pushed".to_string()),
                    ("per_page", PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ])
                .send()
                .await
                .context("Failed to reach GitHub API")?;

            let status = response.status();
            if !status.is_success() {
                anyhow::bail!("GitHub /user/repos returned {}", status.as_u16());
            }

            let items: Vec<RepoItem> = response
                .json()
                .await
                .context("Failed to parse GitHub repos response")?;
            if items.is_empty() {
                break;
            }

            repos.extend(items.into_iter().filter(|r| !r.fork).map(|r| r.name));
            page += 1;
        }

        Ok(repos)
    }

    /// Commits authored by the user in one repository since `since`.
    /// A 409 (empty repository) yields an empty list.
    pub async fn repo_commits(
        &self,
        repo_name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Commit>, CommitsError> {
        let mut query = vec![
            ("author", self.username.clone()),
            ("per_page", PER_PAGE.to_string()),
        ];
        if let Some(since) = since {
            query.push(("since", since.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }

        let response = self
            .client
            .get(format!(
                "{}/repos/{}/{}/commits",
                self.base_url, self.username, repo_name
            ))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github.v3+json")
            .query(&query)
            .send()
            .await
            .context("Failed to reach GitHub API")?;

        let status = response.status();
        if status.as_u16() == 409 {
            return Ok(vec![]);
        }
        if !status.is_success() {
            return Err(CommitsError::Status {
                repo: repo_name.to_string(),
                status: status.as_u16(),
            });
        }

        let items: Vec<CommitItem> = response
            .json()
            .await
            .context("Failed to parse GitHub commits response")?;

        let mut commits = Vec::new();
        for item in items {
            let timestamp = DateTime::parse_from_rfc3339(&item.commit.author.date)
                .with_context(|| format!("invalid commit date: {}", item.commit.author.date))?
                .with_timezone(&Utc);
            commits.push(Commit {
                repo_name: repo_name.to_string(),
                sha: item.sha,
                message: item.commit.message,
                timestamp,
                author: item.commit.author.name,
                url: item.html_url,
            });
        }
        Ok(commits)
    }

    /// Recent commits across all the user's repositories. Repos that
    /// return 403/404 are logged and skipped.
    pub async fn recent_commits(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Commit>> {
        let mut all = Vec::new();
        for repo in self.user_repos().await? {
            match self.repo_commits(&repo, since).await {
                Ok(mut commits) => all.append(&mut commits),
                Err(CommitsError::Status { repo, status }) if status == 403 || status == 404 => {
                    tracing::warn!("Skipping inaccessible repo {} ({})", repo, status);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(all)
    }
}
