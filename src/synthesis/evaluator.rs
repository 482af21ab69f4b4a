//! LLM-as-judge evaluation of generated content.
//!
//! The judge returns tagged lines (`NAME: <n>/10`) which are parsed
//! field by field. A missing or malformed field degrades to the neutral
//! midpoint 5.0 instead of failing the evaluation — one bad model
//! response must not block the pipeline. Request-level errors still
//! propagate; the pipeline layer decides exposure.

use anyhow::Result;
use regex::Regex;

use super::model::ChatModel;

/// Cap on how many source prompts/commits are quoted to the judge,
/// bounding its context size.
const MAX_PROMPT_PREVIEW: usize = 5;
const MAX_COMMIT_PREVIEW: usize = 10;

const JUDGE_PROMPT: &str = "\
You are reviewing a {content_type} written from a developer's real work session.

CONTENT TO EVALUATE:
{content}

SOURCE PROMPTS (what the developer was working on):
{source_prompts}

SOURCE COMMITS:
{source_commits}

Score each dimension from 0 to 10 and reply with exactly this format:

AUTHENTICITY: <score>/10
INSIGHT_DEPTH: <score>/10
CLARITY: <score>/10
VOICE_MATCH: <score>/10
ACCESSIBILITY: <score>/10
OVERALL: <score>/10
FEEDBACK: <one sentence on the biggest improvement>
";

/// Judge output: five sub-scores plus overall, all on a 0-10 scale.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalResult {
    pub authenticity: f64,
    pub insight_depth: f64,
    pub clarity: f64,
    pub voice_match: f64,
    pub accessibility: f64,
    pub overall: f64,
    pub feedback: String,
}

impl EvalResult {
    /// Publication gate: `threshold` is a 0-1 fraction, scores are 0-10,
    /// so the comparison is `overall >= threshold * 10`.
    pub fn passes_threshold(&self, threshold: f64) -> bool {
        self.overall >= threshold * 10.0
    }
}

/// Scores generated content with a judge model.
pub struct ContentEvaluator<M: ChatModel> {
    model: M,
}

impl<M: ChatModel> ContentEvaluator<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    /// Evaluate one piece of content against its sources.
    pub async fn evaluate(
        &self,
        content_type: &str,
        content: &str,
        source_prompts: &[String],
        source_commits: &[String],
    ) -> Result<EvalResult> {
        let prompts_preview = source_prompts
            .iter()
            .take(MAX_PROMPT_PREVIEW)
            .map(|p| format!("- {}", p))
            .collect::<Vec<_>>()
            .join("\n");
        let commits_preview = source_commits
            .iter()
            .take(MAX_COMMIT_PREVIEW)
            .map(|c| format!("- {}", c))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = JUDGE_PROMPT
            .replace("{content_type}", content_type)
            .replace("{content}", content)
            .replace("{source_prompts}", &prompts_preview)
            .replace("{source_commits}", &commits_preview);

        let response = self.model.complete(&prompt, 500).await?;
        Ok(parse_eval_response(&response))
    }
}

/// Parse the judge's tagged-line response. Any field that fails to parse
/// defaults to the neutral midpoint.
fn parse_eval_response(response: &str) -> EvalResult {
    EvalResult {
        authenticity: extract_score(response, "AUTHENTICITY"),
        insight_depth: extract_score(response, "INSIGHT_DEPTH"),
        clarity: extract_score(response, "CLARITY"),
        voice_match: extract_score(response, "VOICE_MATCH"),
        accessibility: extract_score(response, "ACCESSIBILITY"),
        overall: extract_score(response, "OVERALL"),
        feedback: extract_feedback(response),
    }
}

fn extract_score(response: &str, field: &str) -> f64 {
    let pattern = format!(r"{}:\s*(\d+(?:\.\d+)?)/10", field);
    Regex::new(&pattern)
        .ok()
        .and_then(|re| re.captures(response))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(5.0)
}

fn extract_feedback(response: &str) -> String {
    Regex::new(r"FEEDBACK:\s*(.+)")
        .ok()
        .and_then(|re| re.captures(response))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}
