use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;

/// Which wire protocol a role talks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAi,
    Ollama,
    Anthropic,
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "ollama" => Ok(ProviderKind::Ollama),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            other => bail!("unknown provider '{other}' (expected openai, ollama or anthropic)"),
        }
    }
}

/// Connection settings for one role: the scorer answers dataset questions,
/// the optimizer rewrites prompts and distills rules.
///
/// The API key is only checked when a client is built, so a command that never
/// talks to the optimizer does not need optimizer credentials.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: Option<String>,
    pub base_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ProviderConfig {
    /// Reads `{PREFIX}_PROVIDER`, `{PREFIX}_MODEL`, `{PREFIX}_BASE_URL`,
    /// `{PREFIX}_API_KEY`, `{PREFIX}_TEMPERATURE` and `{PREFIX}_MAX_TOKENS`.
    fn from_env(prefix: &str) -> Result<Self> {
        let kind: ProviderKind = optional_env(&format!("{prefix}_PROVIDER"))
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(ProviderKind::OpenAi);

        let fallback_key = match kind {
            ProviderKind::OpenAi => optional_env("OPENAI_API_KEY"),
            ProviderKind::Anthropic => optional_env("ANTHROPIC_API_KEY"),
            ProviderKind::Ollama => None,
        };
        Ok(ProviderConfig {
            kind,
            model: optional_env(&format!("{prefix}_MODEL")),
            base_url: optional_env(&format!("{prefix}_BASE_URL")),
            api_key: optional_env(&format!("{prefix}_API_KEY")).or(fallback_key),
            temperature: parse_env(&format!("{prefix}_TEMPERATURE"), 0.7)?,
            max_tokens: parse_env(&format!("{prefix}_MAX_TOKENS"), 512)?,
        })
    }
}

/// Knobs of the refinement engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineConfig {
    /// Evaluator worker count per dataset item.
    pub concurrency: usize,
    /// Total attempts per provider call.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub call_timeout: Duration,
    /// Rules folded together per merge.
    pub group_size: usize,
    /// Regenerate the prompt pool after every Tier-1 merge.
    pub iterative: bool,
    pub iterative_prompt_count: usize,
    pub max_output_prompts: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            call_timeout: Duration::from_secs(120),
            group_size: 3,
            iterative: false,
            iterative_prompt_count: 5,
            max_output_prompts: 10,
        }
    }
}

impl EngineConfig {
    fn from_env() -> Result<Self> {
        let defaults = EngineConfig::default();
        Ok(EngineConfig {
            concurrency: parse_env("BAKE_CONCURRENCY", defaults.concurrency)?,
            max_retries: parse_env("BAKE_MAX_RETRIES", defaults.max_retries)?,
            retry_delay: Duration::from_millis(parse_env(
                "BAKE_RETRY_DELAY_MS",
                defaults.retry_delay.as_millis() as u64,
            )?),
            call_timeout: Duration::from_secs(parse_env(
                "BAKE_CALL_TIMEOUT_SECS",
                defaults.call_timeout.as_secs(),
            )?),
            group_size: parse_env("BAKE_GROUP_SIZE", defaults.group_size)?,
            iterative: parse_env("BAKE_ITERATIVE", defaults.iterative)?,
            iterative_prompt_count: parse_env(
                "BAKE_ITERATIVE_PROMPT_COUNT",
                defaults.iterative_prompt_count,
            )?,
            max_output_prompts: parse_env("BAKE_MAX_OUTPUT_PROMPTS", defaults.max_output_prompts)?,
        })
    }

    /// Rejects settings the engine cannot make progress with.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.max_retries == 0 {
            bail!("max_retries must be at least 1");
        }
        // A group of one never shrinks the merge queue.
        if self.group_size < 2 {
            bail!("group_size must be at least 2 (got {})", self.group_size);
        }
        if self.iterative && self.iterative_prompt_count == 0 {
            bail!("iterative_prompt_count must be at least 1 when iterative mode is on");
        }
        if self.max_output_prompts == 0 {
            bail!("max_output_prompts must be at least 1");
        }
        Ok(())
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub scorer: ProviderConfig,
    pub optimizer: ProviderConfig,
    pub engine: EngineConfig,
    pub template_dir: Option<PathBuf>,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let config = Config {
            scorer: ProviderConfig::from_env("SCORER").context("Invalid scorer configuration")?,
            optimizer: ProviderConfig::from_env("OPTIMIZER")
                .context("Invalid optimizer configuration")?,
            engine: EngineConfig::from_env()?,
            template_dir: optional_env("BAKE_TEMPLATE_DIR").map(PathBuf::from),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        };
        Ok(config)
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key} has invalid value '{raw}': {e}")),
        None => Ok(default),
    }
}
