// Shared handle for every optimizer-side step (refine, extract, merge,
// synthesize): the optimizer provider, the template store and the retry policy.

use std::sync::Arc;

use tracing::warn;

use crate::llm_client::{CompletionProvider, LlmError, RetryPolicy};
use crate::templates::{fill, TemplateStore};

#[derive(Clone)]
pub struct OptimizerContext {
    provider: Arc<dyn CompletionProvider>,
    templates: Arc<TemplateStore>,
    retry: RetryPolicy,
}

impl OptimizerContext {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        templates: Arc<TemplateStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            templates,
            retry,
        }
    }

    /// Fills template `key`, or hands the raw template and the error to `fallback`.
    pub fn render<F>(&self, key: &str, vars: &[(&str, &str)], fallback: F) -> String
    where
        F: FnOnce(&str) -> String,
    {
        let template = self.templates.get(key);
        match fill(template, vars) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!("Template '{key}' could not be filled ({e}); using fallback");
                fallback(template)
            }
        }
    }

    pub async fn ask(&self, system: &str, user: &str) -> Result<String, LlmError> {
        self.retry.chat(self.provider.as_ref(), system, user).await
    }
}
