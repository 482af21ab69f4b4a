//! X (Twitter) publish target.
//!
//! The pipeline cares about exactly one failure distinction: rate
//! limited or not. That contract is structural — implementations must
//! map their provider's rate-limit signal (HTTP 429 here) to
//! [`PostError::RateLimited`]; the core never inspects error strings.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::OnceCell;

const X_API_URL: &str = "https://api.x.com";

/// Publish failure, classified into exactly two kinds.
#[derive(Debug, Error)]
pub enum PostError {
    /// The provider refused the post due to rate limiting (HTTP 429).
    /// Halts further attempts for the rest of the run.
    #[error("rate limited by publish target (HTTP 429)")]
    RateLimited,

    /// Any other failure. The item stays unpublished and eligible for
    /// the next run; no backoff beyond the next schedule.
    #[error("publish failed: {0}")]
    Failed(String),
}

/// A successful post: the provider's id and the public URL.
#[derive(Debug, Clone)]
pub struct PostOutcome {
    pub id: String,
    pub url: String,
}

/// Capability for posting text to an external target.
#[async_trait]
pub trait PublishTarget: Send + Sync {
    async fn post(&self, text: &str) -> Result<PostOutcome, PostError>;
}

/// X API v2 client (`POST /2/tweets` with a user-context bearer token).
pub struct XClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
    username: OnceCell<String>,
}

#[derive(Debug, Deserialize)]
struct TweetResponse {
    data: TweetData,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    data: MeData,
}

#[derive(Debug, Deserialize)]
struct MeData {
    username: String,
}

impl XClient {
    pub fn new(bearer_token: &str) -> Self {
        Self::with_base_url(X_API_URL, bearer_token)
    }

    /// Point at an explicit endpoint (used by tests).
    pub fn with_base_url(base_url: &str, bearer_token: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: bearer_token.to_string(),
            username: OnceCell::new(),
        }
    }

    /// The authenticated account's handle, fetched once and cached.
    async fn username(&self) -> Result<&str, PostError> {
        let username = self
            .username
            .get_or_try_init(|| async {
                let response = self
                    .client
                    .get(format!("{}/2/users/me", self.base_url))
                    .bearer_auth(&self.bearer_token)
                    .send()
                    .await
                    .map_err(|e| PostError::Failed(e.to_string()))?;

                if response.status().as_u16() == 429 {
                    return Err(PostError::RateLimited);
                }
                if !response.status().is_success() {
                    return Err(PostError::Failed(format!(
                        "users/me returned {}",
                        response.status().as_u16()
                    )));
                }

                let me: MeResponse = response
                    .json()
                    .await
                    .map_err(|e| PostError::Failed(e.to_string()))?;
                Ok(me.data.username)
            })
            .await?;
        Ok(username)
    }
}

#[async_trait]
impl PublishTarget for XClient {
    async fn post(&self, text: &str) -> Result<PostOutcome, PostError> {
        let response = self
            .client
            .post(format!("{}/2/tweets", self.base_url))
            .bearer_auth(&self.bearer_token)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| PostError::Failed(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(PostError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PostError::Failed(format!(
                "tweet create returned {} — {}",
                status.as_u16(),
                body
            )));
        }

        let tweet: TweetResponse = response
            .json()
            .await
            .map_err(|e| PostError::Failed(e.to_string()))?;

        let username = self.username().await?;
        let url = format!("https://x.com/{}/status/{}", username, tweet.data.id);
        Ok(PostOutcome {
            id: tweet.data.id,
            url,
        })
    }
}

/// Split `TWEET n:`-delimited generator output into individual tweets,
/// dropping empties.
pub fn parse_thread_content(content: &str) -> Vec<String> {
    let mut tweets = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    let marker = regex::Regex::new(r"^TWEET \d+:").expect("static pattern");
    for line in content.lines() {
        if marker.is_match(line) {
            if !current.is_empty() {
                tweets.push(current.join("\n").trim().to_string());
            }
            current = Vec::new();
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        tweets.push(current.join("\n").trim().to_string());
    }

    tweets.into_iter().filter(|t| !t.is_empty()).collect()
}

/// Scripted publish target for tests: serves queued outcomes in order
/// and records every text it was asked to post.
#[derive(Default)]
pub struct MockPublishTarget {
    outcomes: Mutex<Vec<Result<PostOutcome, PostError>>>,
    posted: Mutex<Vec<String>>,
}

impl MockPublishTarget {
    pub fn new(outcomes: Vec<Result<PostOutcome, PostError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes),
            posted: Mutex::new(Vec::new()),
        }
    }

    /// A target where every post succeeds with a sequential URL.
    pub fn always_ok() -> Self {
        Self::default()
    }

    /// A target that always reports rate limiting.
    pub fn always_rate_limited() -> Self {
        Self::new(vec![Err(PostError::RateLimited)])
    }

    pub fn posted(&self) -> Vec<String> {
        self.posted.lock().unwrap().clone()
    }

    pub fn post_count(&self) -> usize {
        self.posted.lock().unwrap().len()
    }
}

#[async_trait]
impl PublishTarget for MockPublishTarget {
    async fn post(&self, text: &str) -> Result<PostOutcome, PostError> {
        let mut posted = self.posted.lock().unwrap();
        posted.push(text.to_string());
        let attempt = posted.len();
        drop(posted);

        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            // Unscripted: succeed with a sequential id
            return Ok(PostOutcome {
                id: attempt.to_string(),
                url: format!("https://x.com/mock/status/{}", attempt),
            });
        }

        let next = if outcomes.len() > 1 {
            outcomes.remove(0)
        } else {
            // Repeat the final scripted outcome
            match &outcomes[0] {
                Ok(outcome) => Ok(outcome.clone()),
                Err(PostError::RateLimited) => Err(PostError::RateLimited),
                Err(PostError::Failed(msg)) => Err(PostError::Failed(msg.clone())),
            }
        };
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_post_success_builds_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/tweets"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "data": { "id": "1234", "text": "hello" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/2/users/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "id": "99", "name": "Dev", "username": "dev" }
            })))
            .mount(&server)
            .await;

        let client = XClient::with_base_url(&server.uri(), "token");
        let outcome = client.post("hello").await.unwrap();
        assert_eq!(outcome.id, "1234");
        assert_eq!(outcome.url, "https://x.com/dev/status/1234");
    }

    #[tokio::test]
    async fn test_post_429_maps_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/tweets"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
            .mount(&server)
            .await;

        let client = XClient::with_base_url(&server.uri(), "token");
        let err = client.post("hello").await.unwrap_err();
        assert!(matches!(err, PostError::RateLimited));
    }

    #[tokio::test]
    async fn test_post_other_error_maps_to_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/tweets"))
            .respond_with(ResponseTemplate::new(403).set_body_string("duplicate content"))
            .mount(&server)
            .await;

        let client = XClient::with_base_url(&server.uri(), "token");
        let err = client.post("hello").await.unwrap_err();
        match err {
            PostError::Failed(msg) => assert!(msg.contains("403")),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_thread_content() {
        let content = "TWEET 1:\nFirst tweet body\n\nTWEET 2:\nSecond tweet\nwith two lines\n";
        let tweets = parse_thread_content(content);
        assert_eq!(tweets.len(), 2);
        assert_eq!(tweets[0], "First tweet body");
        assert_eq!(tweets[1], "Second tweet\nwith two lines");
    }

    #[test]
    fn test_parse_thread_drops_empty_segments() {
        let content = "TWEET 1:\n\nTWEET 2:\nOnly real tweet";
        let tweets = parse_thread_content(content);
        assert_eq!(tweets, vec!["Only real tweet"]);
    }

    #[test]
    fn test_parse_thread_without_markers() {
        let tweets = parse_thread_content("just a plain post");
        assert_eq!(tweets, vec!["just a plain post"]);
    }

    #[tokio::test]
    async fn test_mock_target_scripts_outcomes() {
        let target = MockPublishTarget::new(vec![
            Err(PostError::RateLimited),
            Ok(PostOutcome {
                id: "1".to_string(),
                url: "https://x.com/mock/status/1".to_string(),
            }),
        ]);

        assert!(matches!(
            target.post("a").await.unwrap_err(),
            PostError::RateLimited
        ));
        assert!(target.post("b").await.is_ok());
        assert_eq!(target.posted(), vec!["a", "b"]);
    }
}
