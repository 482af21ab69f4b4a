//! Content generation from commits and coding-session prompts.
//!
//! Pure prompt templating over the [`ChatModel`] capability; the
//! interesting gating logic lives in the evaluator and the pipeline.

use anyhow::Result;

use super::model::ChatModel;

/// Caps on generator context: at most 5 prompts of 500 chars each,
/// 10 commits, and 5 retrieved insights per request.
const MAX_PROMPTS: usize = 5;
const MAX_PROMPT_CHARS: usize = 500;
const MAX_COMMITS: usize = 10;
const MAX_INSIGHTS: usize = 5;

const POST_PROMPT: &str = "\
You ghostwrite short social posts for a developer building AI tooling in public.
Today they landed {commit_count} commit(s). Write ONE post (under 280 characters,
no hashtags, no emoji) that captures the most interesting thing they figured out.
Write in first person, plainly, like someone sharing a real lesson.

What they asked their coding assistant:
{prompts}

What they committed:
{commits}

Insights from their past work (match this voice, don't repeat them):
{insights}

Reply with the post text only.";

const THREAD_PROMPT: &str = "\
You ghostwrite social threads for a developer building AI tooling in public.
Summarize the day's work below as a thread of 3-5 tweets. Format each tweet as:

TWEET 1:
<text>

TWEET 2:
<text>

First person, no hashtags, each tweet under 280 characters.

What they asked their coding assistant:
{prompts}

What they committed:
{commits}";

/// A commit referenced during generation.
#[derive(Debug, Clone)]
pub struct CommitRef {
    pub repo_name: String,
    pub sha: String,
    pub message: String,
}

/// One produced artifact plus the sources that fed it, for provenance.
#[derive(Debug, Clone)]
pub struct GeneratedContent {
    pub content_type: String,
    pub content: String,
    pub source_prompts: Vec<String>,
    pub source_commits: Vec<String>,
}

/// Prompt-templating front end over the chat model.
pub struct ContentGenerator<M: ChatModel> {
    model: M,
}

impl<M: ChatModel> ContentGenerator<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    /// Generate a single post synthesizing a batch of commits, their
    /// adjacent prompts, and any insights retrieved from past work.
    pub async fn generate_post_batched(
        &self,
        prompts: &[String],
        commits: &[CommitRef],
        insights: &[String],
    ) -> Result<GeneratedContent> {
        let prompts_text = prompts
            .iter()
            .take(MAX_PROMPTS)
            .map(|p| format!("- {}", truncate(p, MAX_PROMPT_CHARS)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let commits_text = commits
            .iter()
            .take(MAX_COMMITS)
            .map(|c| format!("- [{}] {}", c.repo_name, c.message))
            .collect::<Vec<_>>()
            .join("\n\n");
        let insights_text = if insights.is_empty() {
            "(none)".to_string()
        } else {
            insights
                .iter()
                .take(MAX_INSIGHTS)
                .map(|i| format!("- {}", i))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let filled = POST_PROMPT
            .replace("{commit_count}", &commits.len().to_string())
            .replace("{prompts}", &prompts_text)
            .replace("{commits}", &commits_text)
            .replace("{insights}", &insights_text);

        let content = self.model.complete(&filled, 500).await?;

        Ok(GeneratedContent {
            content_type: "x_post".to_string(),
            content: content.trim().to_string(),
            source_prompts: prompts.to_vec(),
            source_commits: commits.iter().map(|c| c.message.clone()).collect(),
        })
    }

    /// Generate a thread from a day's prompts and commits (digest use).
    pub async fn generate_thread(
        &self,
        prompts: &[String],
        commits: &[CommitRef],
    ) -> Result<GeneratedContent> {
        let prompts_text = prompts
            .iter()
            .map(|p| format!("- {}", p))
            .collect::<Vec<_>>()
            .join("\n\n");
        let commits_text = commits
            .iter()
            .map(|c| format!("- [{}] {}", c.repo_name, c.message))
            .collect::<Vec<_>>()
            .join("\n\n");

        let filled = THREAD_PROMPT
            .replace("{prompts}", &prompts_text)
            .replace("{commits}", &commits_text);

        let content = self.model.complete(&filled, 2000).await?;

        Ok(GeneratedContent {
            content_type: "x_thread".to_string(),
            content: content.trim().to_string(),
            source_prompts: prompts.to_vec(),
            source_commits: commits.iter().map(|c| c.message.clone()).collect(),
        })
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
