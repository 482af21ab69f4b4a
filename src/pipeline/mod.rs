//! Evaluation-gated publication pipeline.
//!
//! Content moves `generated → evaluated → {queued, published, rejected}`,
//! with `queued → published` on a later run. Two flags govern a run:
//! `posted` (the per-cycle post cap is one) and `rate_limited` (once a
//! 429 is seen, nothing else is attempted this run — eligible content is
//! queued instead). Re-attempts are gated solely on `published = 0`, so
//! re-running the pipeline is idempotent.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;

use crate::ingestion::{ClaudeLogParser, GitHubClient};
use crate::knowledge::{KnowledgeStore, SearchParams};
use crate::output::{parse_thread_content, PostError, PublishTarget};
use crate::storage::Database;
use crate::synthesis::generator::CommitRef;
use crate::synthesis::model::ChatModel;
use crate::synthesis::{ContentEvaluator, ContentGenerator, EvalResult};
use crate::PollingConfig;

/// A prompt that accompanied a commit, with its identity for provenance.
#[derive(Debug, Clone)]
pub struct PromptRef {
    pub uuid: String,
    pub text: String,
}

/// What one pipeline run did.
#[derive(Debug, Default)]
pub struct CycleOutcome {
    /// Id of the content record stored this cycle, if any was generated.
    pub content_id: Option<i64>,
    pub eval: Option<EvalResult>,
    /// A post (queued or new) succeeded this cycle.
    pub posted: bool,
    /// A 429 was observed; remaining eligible content was queued.
    pub rate_limited: bool,
}

/// The evaluation-gated publish pipeline over shared storage.
pub struct Pipeline {
    db: Arc<Database>,
    generator: ContentGenerator<Arc<dyn ChatModel>>,
    evaluator: ContentEvaluator<Arc<dyn ChatModel>>,
    publisher: Arc<dyn PublishTarget>,
    /// Publication threshold as a 0-1 fraction; compared against 0-10
    /// scores as `score >= threshold * 10`.
    threshold: f64,
    /// Self-throttle between successive successful posts in one run.
    post_delay: Duration,
    /// Optional knowledge base; when present, retrieved insights feed
    /// generation and provenance links are recorded.
    knowledge: Option<Arc<KnowledgeStore>>,
}

impl Pipeline {
    pub fn new(
        db: Arc<Database>,
        model: Arc<dyn ChatModel>,
        publisher: Arc<dyn PublishTarget>,
        threshold: f64,
        post_delay: Duration,
    ) -> Self {
        Self {
            db,
            generator: ContentGenerator::new(model.clone()),
            evaluator: ContentEvaluator::new(model),
            publisher,
            threshold,
            post_delay,
            knowledge: None,
        }
    }

    /// Attach a knowledge base so generation can echo past insights.
    pub fn with_knowledge(mut self, store: Arc<KnowledgeStore>) -> Self {
        self.knowledge = Some(store);
        self
    }

    fn min_score(&self) -> f64 {
        self.threshold * 10.0
    }

    /// Best-effort retrieval of insights related to the current prompts.
    /// A lookup failure degrades to no insights, never blocks the cycle.
    async fn related_insights(&self, query: &str) -> (Vec<String>, Vec<(i64, f32)>) {
        let Some(store) = &self.knowledge else {
            return (Vec::new(), Vec::new());
        };

        match store.search_similar(query, &SearchParams::default()).await {
            Ok(results) => {
                let mut insights = Vec::new();
                let mut related = Vec::new();
                for (item, score) in results {
                    if let Some(id) = item.id {
                        related.push((id, score));
                    }
                    insights.push(item.insight.unwrap_or(item.content));
                }
                (insights, related)
            }
            Err(err) => {
                tracing::warn!("Knowledge lookup failed, generating without it: {}", err);
                (Vec::new(), Vec::new())
            }
        }
    }

    /// One full cycle: retry the oldest queued item first, then generate,
    /// evaluate, and (conditions permitting) publish new content.
    pub async fn run_cycle(
        &self,
        commits: &[CommitRef],
        prompts: &[PromptRef],
    ) -> Result<CycleOutcome> {
        let mut outcome = CycleOutcome::default();

        // Queued content from previous runs goes first, oldest first.
        let queued = self.db.get_unpublished_content("x_post", self.min_score())?;
        if let Some(item) = queued.first() {
            tracing::info!("Retrying queued post (of {} eligible)", queued.len());
            match self.publisher.post(&item.content).await {
                Ok(post) => {
                    self.db.mark_published(item.id, &post.url)?;
                    tracing::info!("Posted queued content: {}", post.url);
                    outcome.posted = true;
                }
                Err(PostError::RateLimited) => {
                    tracing::warn!("Rate limited on queued post, will retry next cycle");
                    outcome.rate_limited = true;
                }
                Err(PostError::Failed(msg)) => {
                    tracing::warn!("Queued post failed: {}", msg);
                }
            }
        }

        if commits.is_empty() {
            tracing::info!("No new commits");
            return Ok(outcome);
        }
        if prompts.is_empty() {
            tracing::info!("{} commit(s) but no related prompts found", commits.len());
            return Ok(outcome);
        }

        tracing::info!("Synthesizing {} commit(s) into one post", commits.len());
        let prompt_texts: Vec<String> = prompts.iter().map(|p| p.text.clone()).collect();
        let (insights, related) = self.related_insights(&prompt_texts.join("\n")).await;
        let generated = self
            .generator
            .generate_post_batched(&prompt_texts, commits, &insights)
            .await?;

        let eval = self
            .evaluator
            .evaluate(
                &generated.content_type,
                &generated.content,
                &generated.source_prompts,
                &generated.source_commits,
            )
            .await?;
        tracing::info!("Score: {}/10 — {}", eval.overall, eval.feedback);

        let source_commits: Vec<String> = commits.iter().map(|c| c.sha.clone()).collect();
        let source_messages: Vec<String> = prompts.iter().map(|p| p.uuid.clone()).collect();
        let content_id = self.db.insert_generated_content(
            &generated.content_type,
            &source_commits,
            &source_messages,
            &generated.content,
            eval.overall,
            &eval.feedback,
        )?;
        outcome.content_id = Some(content_id);

        if let Some(store) = &self.knowledge {
            for (knowledge_id, score) in &related {
                store.link_to_content(content_id, *knowledge_id, *score)?;
            }
        }

        if !eval.passes_threshold(self.threshold) {
            tracing::info!("Below threshold, not posting");
            outcome.eval = Some(eval);
            return Ok(outcome);
        }

        if outcome.rate_limited {
            tracing::info!("Rate limited earlier this cycle, queued for later");
        } else if outcome.posted {
            tracing::info!("Already posted this cycle, queued for next");
        } else {
            match self.publisher.post(&generated.content).await {
                Ok(post) => {
                    self.db.mark_published(content_id, &post.url)?;
                    tracing::info!("Posted: {}", post.url);
                    outcome.posted = true;
                }
                Err(PostError::RateLimited) => {
                    tracing::warn!("Rate limited, queued for later");
                    outcome.rate_limited = true;
                }
                Err(PostError::Failed(msg)) => {
                    tracing::warn!("Post failed: {}", msg);
                }
            }
        }

        outcome.eval = Some(eval);
        Ok(outcome)
    }

    /// Summarize a window of activity as a thread: generate, evaluate,
    /// store, then post the tweets in order. The record is marked
    /// published only when the whole thread went out; a partial thread
    /// stays queued.
    pub async fn run_digest(
        &self,
        commits: &[CommitRef],
        prompts: &[PromptRef],
    ) -> Result<CycleOutcome> {
        let mut outcome = CycleOutcome::default();
        if commits.is_empty() && prompts.is_empty() {
            tracing::info!("No activity in the digest window");
            return Ok(outcome);
        }

        tracing::info!(
            "Digesting {} commit(s) and {} prompt(s) into a thread",
            commits.len(),
            prompts.len()
        );
        let prompt_texts: Vec<String> = prompts.iter().map(|p| p.text.clone()).collect();
        let generated = self.generator.generate_thread(&prompt_texts, commits).await?;

        let eval = self
            .evaluator
            .evaluate(
                &generated.content_type,
                &generated.content,
                &generated.source_prompts,
                &generated.source_commits,
            )
            .await?;
        tracing::info!("Score: {}/10 — {}", eval.overall, eval.feedback);

        let source_commits: Vec<String> = commits.iter().map(|c| c.sha.clone()).collect();
        let source_messages: Vec<String> = prompts.iter().map(|p| p.uuid.clone()).collect();
        let content_id = self.db.insert_generated_content(
            &generated.content_type,
            &source_commits,
            &source_messages,
            &generated.content,
            eval.overall,
            &eval.feedback,
        )?;
        outcome.content_id = Some(content_id);

        if !eval.passes_threshold(self.threshold) {
            tracing::info!("Below threshold, not posting");
            outcome.eval = Some(eval);
            return Ok(outcome);
        }

        let tweets = parse_thread_content(&generated.content);
        let mut first_url: Option<String> = None;
        let mut posted = 0usize;
        for tweet in &tweets {
            if posted > 0 {
                tokio::time::sleep(self.post_delay).await;
            }
            match self.publisher.post(tweet).await {
                Ok(post) => {
                    first_url.get_or_insert(post.url);
                    posted += 1;
                }
                Err(PostError::RateLimited) => {
                    tracing::warn!(
                        "Rate limited after {} of {} tweet(s), thread stays queued",
                        posted,
                        tweets.len()
                    );
                    outcome.rate_limited = true;
                    break;
                }
                Err(PostError::Failed(msg)) => {
                    tracing::warn!("Tweet {} failed: {}, thread stays queued", posted + 1, msg);
                    break;
                }
            }
        }

        if posted == tweets.len() && !tweets.is_empty() {
            if let Some(url) = &first_url {
                self.db.mark_published(content_id, url)?;
            }
            tracing::info!("Posted thread of {} tweet(s)", posted);
            outcome.posted = true;
        }

        outcome.eval = Some(eval);
        Ok(outcome)
    }

    /// Drain the queue: attempt every eligible record oldest-first,
    /// throttling between successes, stopping the run on the first 429.
    /// Other failures skip to the next record.
    pub async fn retry_unpublished(&self, content_type: &str) -> Result<usize> {
        let eligible = self
            .db
            .get_unpublished_content(content_type, self.min_score())?;
        tracing::info!("Found {} unpublished post(s) to retry", eligible.len());

        let mut posts_made = 0usize;
        for item in eligible {
            if posts_made > 0 {
                tokio::time::sleep(self.post_delay).await;
            }

            match self.publisher.post(&item.content).await {
                Ok(post) => {
                    self.db.mark_published(item.id, &post.url)?;
                    tracing::info!("Posted: {}", post.url);
                    posts_made += 1;
                }
                Err(PostError::RateLimited) => {
                    tracing::warn!("Rate limited, stopping this run");
                    break;
                }
                Err(PostError::Failed(msg)) => {
                    tracing::warn!("Post {} failed: {}", item.id, msg);
                }
            }
        }

        Ok(posts_made)
    }
}

/// One scheduled poll: resolve the cursor, pull new commits and their
/// adjacent prompts, run the cycle, advance the cursor.
pub async fn poll_once(
    db: &Arc<Database>,
    github: &GitHubClient,
    logs: &ClaudeLogParser,
    pipeline: &Pipeline,
    polling: &PollingConfig,
) -> Result<CycleOutcome> {
    let since = match db.last_poll_time()? {
        Some(last) => last,
        // Never polled: fall back to a fixed lookback window
        None => Utc::now() - chrono::Duration::minutes(polling.lookback_minutes),
    };
    let current_poll_time = Utc::now();
    tracing::info!("Polling for commits since {}", since.to_rfc3339());

    let mut new_commits = Vec::new();
    let mut prompts = Vec::new();

    for commit in github.recent_commits(Some(since)).await? {
        if db.is_commit_processed(&commit.sha)? {
            continue;
        }
        tracing::info!(
            "New commit: [{}] {} - {}",
            commit.repo_name,
            &commit.sha[..commit.sha.len().min(8)],
            commit.message.lines().next().unwrap_or_default()
        );
        db.insert_commit(
            &commit.repo_name,
            &commit.sha,
            &commit.message,
            commit.timestamp,
            &commit.author,
        )?;

        let nearby = logs.prompts_around(commit.timestamp, polling.prompt_window_minutes)?;
        // Prefer the last prompt issued before the commit; fall back to
        // the nearest one after it.
        let relevant = nearby
            .iter()
            .filter(|m| m.timestamp <= commit.timestamp)
            .next_back()
            .or_else(|| nearby.first());
        if let Some(message) = relevant {
            if !db.is_message_processed(&message.message_uuid)? {
                db.insert_message(
                    &message.session_id,
                    &message.message_uuid,
                    &message.project_path,
                    message.timestamp,
                    &message.prompt_text,
                )?;
            }
            prompts.push(PromptRef {
                uuid: message.message_uuid.clone(),
                text: message.prompt_text.clone(),
            });
        }

        new_commits.push(CommitRef {
            repo_name: commit.repo_name,
            sha: commit.sha,
            message: commit.message,
        });
    }

    // Advance the cursor even on a partial cycle; processed-commit dedup
    // already prevents rework, and a stuck cursor would replay forever.
    let outcome = pipeline.run_cycle(&new_commits, &prompts).await;
    db.set_last_poll_time(current_poll_time)?;
    outcome
}
