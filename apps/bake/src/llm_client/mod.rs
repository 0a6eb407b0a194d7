/// LLM Client: the single point of entry for all completion-provider calls in bake.
///
/// ARCHITECTURAL RULE: engine modules never talk HTTP. They hold an
/// `Arc<dyn CompletionProvider>` and wrap every call in a `RetryPolicy`.
///
/// Clients make exactly one attempt per `chat()`; retrying is a policy decision
/// owned by the caller (see `retry`).
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ProviderConfig, ProviderKind};

pub mod anthropic;
pub mod openai;
pub mod prompts;
pub mod retry;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;
pub use retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("LLM call timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// A text-completion backend: one system message, one user message, one answer.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn chat(&self, system: &str, user: &str) -> Result<String, LlmError>;

    /// Provider name for logs (e.g. "openai", "ollama", "anthropic").
    fn name(&self) -> &str;

    fn model(&self) -> &str;
}

/// Builds the concrete client for one role (scorer or optimizer).
pub fn build_provider(config: &ProviderConfig) -> anyhow::Result<Arc<dyn CompletionProvider>> {
    let provider: Arc<dyn CompletionProvider> = match config.kind {
        ProviderKind::OpenAi | ProviderKind::Ollama => Arc::new(OpenAiClient::new(config)?),
        ProviderKind::Anthropic => Arc::new(AnthropicClient::new(config)?),
    };
    Ok(provider)
}
