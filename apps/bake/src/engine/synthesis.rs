// Prompt Synthesizer: turns a rule into a fresh batch of instruction prompts.

use tracing::warn;

use super::optimizer::OptimizerContext;
use super::parsing::clean_generated_lines;
use crate::templates::PROMPT_GENERATION;

pub struct PromptSynthesizer {
    ctx: OptimizerContext,
}

impl PromptSynthesizer {
    pub fn new(ctx: OptimizerContext) -> Self {
        Self { ctx }
    }

    /// Up to `count` prompts. Empty when the rule is empty or the optimizer is unavailable.
    pub async fn synthesize(&self, rule: &str, count: usize) -> Vec<String> {
        if rule.trim().is_empty() || count == 0 {
            return Vec::new();
        }

        let num = count.to_string();
        let system = self.ctx.render(
            PROMPT_GENERATION,
            &[("rules_block", rule), ("num", num.as_str())],
            |tpl| tpl.replace("{rules_block}", rule).replace("{num}", &num),
        );
        let user = format!("Please generate {count} new prompts based on the above rule now.");

        match self.ctx.ask(&system, &user).await {
            Ok(raw) => clean_generated_lines(&raw, count),
            Err(e) => {
                warn!("Prompt synthesis failed: {e}");
                Vec::new()
            }
        }
    }
}
