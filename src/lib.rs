//! Presence
//!
//! Turns a developer's real work into published content:
//! - GitHub commit polling and coding-session log ingestion
//! - Embedding-indexed knowledge store with similarity search
//! - LLM content synthesis with LLM-as-judge evaluation
//! - Evaluation-gated publication to X with rate-limit aware retry

pub mod embeddings;
pub mod ingestion;
pub mod knowledge;
pub mod output;
pub mod pipeline;
pub mod storage;
pub mod synthesis;

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub github: GithubConfig,
    pub x: XConfig,
    pub anthropic: AnthropicConfig,
    pub paths: PathsConfig,
    pub synthesis: SynthesisConfig,
    pub knowledge: KnowledgeConfig,
    pub polling: PollingConfig,
}

/// GitHub polling credentials
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GithubConfig {
    pub username: String,
    /// Personal access token; supports `${VAR}` placeholders
    pub token: String,
}

/// X (Twitter) publishing credentials
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct XConfig {
    pub bearer_token: String,
}

/// Anthropic API credentials
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AnthropicConfig {
    pub api_key: String,
}

/// Filesystem locations
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Coding-assistant log directory (`~/` expands to the home dir)
    pub claude_logs: String,
    pub database: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            claude_logs: "~/.claude".into(),
            database: "presence.db".into(),
        }
    }
}

/// Content synthesis and evaluation settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub model: String,
    /// Publication gate as a 0-1 fraction of the 0-10 judge scale
    pub eval_threshold: f64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".into(),
            eval_threshold: 0.7,
        }
    }
}

/// Embedding provider settings for the knowledge store
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// "voyage" or "openai"
    pub provider: String,
    pub api_key: String,
    /// Provider-specific model name; each provider has a default
    pub model: Option<String>,
    pub dimension: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            provider: "voyage".into(),
            api_key: String::new(),
            model: None,
            dimension: 512,
        }
    }
}

/// Poll scheduling parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// First-run lookback when no poll cursor exists yet
    pub lookback_minutes: i64,
    /// Half-width of the prompt window around each commit
    pub prompt_window_minutes: i64,
    /// Throttle between successive successful posts in one retry run
    pub post_delay_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            lookback_minutes: 90,
            prompt_window_minutes: 30,
            post_delay_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from an optional YAML file.
    ///
    /// If `yaml_path` is None, prefers `config.local.yaml` over
    /// `config.yaml` in the CWD. A missing file yields defaults;
    /// `${VAR}` placeholders are resolved from the environment after
    /// parsing, then the result is validated.
    pub fn load(yaml_path: Option<&Path>) -> Result<Self> {
        let mut config = match yaml_path {
            Some(path) => Self::load_yaml(path),
            None => {
                let local = Path::new("config.local.yaml");
                if local.exists() {
                    Self::load_yaml(local)
                } else {
                    Self::load_yaml(Path::new("config.yaml"))
                }
            }
        };

        config.resolve_env_placeholders();
        config.validate()?;
        Ok(config)
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(path: &Path) -> Config {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Config::default()
                }
            },
            Err(_) => {
                tracing::debug!("No config file at {}, using defaults", path.display());
                Config::default()
            }
        }
    }

    /// Replace `${VAR}` placeholders with environment values. Unset
    /// variables resolve to the empty string with a warning.
    fn resolve_env_placeholders(&mut self) {
        for value in [
            &mut self.github.username,
            &mut self.github.token,
            &mut self.x.bearer_token,
            &mut self.anthropic.api_key,
            &mut self.knowledge.api_key,
        ] {
            *value = resolve_placeholders(value);
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.synthesis.eval_threshold) {
            anyhow::bail!(
                "synthesis.eval_threshold must be between 0 and 1, got {}",
                self.synthesis.eval_threshold
            );
        }
        if self.knowledge.dimension == 0 {
            anyhow::bail!("knowledge.dimension must be positive");
        }
        Ok(())
    }
}

fn resolve_placeholders(value: &str) -> String {
    let pattern = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}");
    let Ok(pattern) = pattern else {
        return value.to_string();
    };

    pattern
        .replace_all(value, |caps: &regex::Captures| {
            let name = &caps[1];
            match std::env::var(name) {
                Ok(resolved) => resolved,
                Err(_) => {
                    tracing::warn!("Environment variable {} is not set", name);
                    String::new()
                }
            }
        })
        .into_owned()
}

// ============================================================================
// Tests
// ============================================================================
