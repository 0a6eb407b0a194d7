//! Rule Extractor and Rule Merger.
//!
//! The extractor turns the verified fixes of one item into a single rule. The
//! merger folds a group of rules into one and is the combiner the rule tree
//! runs on. Neither fails: the extractor degrades to an empty rule, the merger
//! to a plain concatenation of its inputs.

use async_trait::async_trait;
use tracing::warn;

use super::optimizer::OptimizerContext;
use super::refiner::RefinementPair;
use super::rule_tree::RuleCombiner;
use crate::templates::{COMBINE_RULES, RULE_SUMMARIZATION};

const MERGE_REQUEST: &str = "Please fill the template based on the rules above.";

pub struct RuleExtractor {
    ctx: OptimizerContext,
}

impl RuleExtractor {
    pub fn new(ctx: OptimizerContext) -> Self {
        Self { ctx }
    }

    /// Returns the empty string when there are no verified pairs or the optimizer is unavailable.
    pub async fn extract(&self, correct: &[String], verified: &[RefinementPair]) -> String {
        if verified.is_empty() {
            return String::new();
        }

        let pairs_block = verified
            .iter()
            .map(|pair| {
                format!(
                    "Original (Wrong): {}\nImproved (Correct): {}",
                    pair.original, pair.candidate
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let system = self.ctx.render(
            RULE_SUMMARIZATION,
            &[("pairs_block", pairs_block.as_str())],
            str::to_string,
        );

        let mut user = String::from("Correct Prompts:\n");
        if correct.is_empty() {
            user.push_str("None");
        }
        for prompt in correct {
            user.push_str(&format!("- {prompt}\n"));
        }

        match self.ctx.ask(&system, user.trim_end()).await {
            Ok(rule) => rule.trim().to_string(),
            Err(e) => {
                warn!("Rule extraction failed: {e}");
                String::new()
            }
        }
    }
}

pub struct RuleMerger {
    ctx: OptimizerContext,
}

impl RuleMerger {
    pub fn new(ctx: OptimizerContext) -> Self {
        Self { ctx }
    }

    pub async fn merge(&self, rules: &[String]) -> String {
        if rules.is_empty() {
            return String::new();
        }

        let block = rules_block(rules);
        let system = self.ctx.render(COMBINE_RULES, &[("rules_block", block.as_str())], |tpl| {
            format!("{tpl}\n\nRules:\n{block}")
        });

        match self.ctx.ask(&system, MERGE_REQUEST).await {
            Ok(merged) if !merged.trim().is_empty() => merged.trim().to_string(),
            Ok(_) => {
                warn!("Merge returned an empty rule; keeping the concatenated inputs");
                block
            }
            Err(e) => {
                warn!("Merge call failed ({e}); keeping the concatenated inputs");
                block
            }
        }
    }
}

#[async_trait]
impl RuleCombiner for RuleMerger {
    async fn combine(&self, rules: &[String]) -> String {
        self.merge(rules).await
    }
}

/// `Rule 1:\n…\n\nRule 2:\n…`
pub fn rules_block(rules: &[String]) -> String {
    rules
        .iter()
        .enumerate()
        .map(|(i, rule)| format!("Rule {}:\n{}", i + 1, rule))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::RetryPolicy;
    use crate::templates::TemplateStore;
    use crate::testing::ScriptedProvider;
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx(provider: Arc<ScriptedProvider>, templates: TemplateStore) -> OptimizerContext {
        OptimizerContext::new(
            provider,
            Arc::new(templates),
            RetryPolicy::constant(1, Duration::ZERO),
        )
    }

    fn pair(original: &str, candidate: &str) -> RefinementPair {
        RefinementPair {
            original: original.to_string(),
            candidate: candidate.to_string(),
        }
    }

    fn rules(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_extract_without_pairs_makes_no_call() {
        let provider = ScriptedProvider::fixed("rule");
        let extractor = RuleExtractor::new(ctx(provider.clone(), TemplateStore::with_defaults()));
        assert_eq!(extractor.extract(&rules(&["p"]), &[]).await, "");
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_extract_sends_pairs_and_trims_rule() {
        let provider = ScriptedProvider::fixed("  Show each step.  \n");
        let extractor = RuleExtractor::new(ctx(provider.clone(), TemplateStore::with_defaults()));

        let rule = extractor
            .extract(&rules(&["Think first."]), &[pair("Answer.", "Work it out.")])
            .await;

        assert_eq!(rule, "Show each step.");
        let (system, user) = provider.requests().remove(0);
        assert!(system.contains("Original (Wrong): Answer.\nImproved (Correct): Work it out."));
        assert_eq!(user, "Correct Prompts:\n- Think first.");
    }

    #[tokio::test]
    async fn test_extract_failure_is_empty_rule() {
        let extractor =
            RuleExtractor::new(ctx(ScriptedProvider::failing(), TemplateStore::with_defaults()));
        assert_eq!(extractor.extract(&[], &[pair("a", "b")]).await, "");
    }

    #[tokio::test]
    async fn test_merge_empty_input_makes_no_call() {
        let provider = ScriptedProvider::fixed("merged");
        let merger = RuleMerger::new(ctx(provider.clone(), TemplateStore::with_defaults()));
        assert_eq!(merger.merge(&[]).await, "");
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_merge_numbers_rules_in_system_message() {
        let provider = ScriptedProvider::fixed("merged");
        let merger = RuleMerger::new(ctx(provider.clone(), TemplateStore::with_defaults()));

        assert_eq!(merger.combine(&rules(&["A", "B"])).await, "merged");
        let (system, user) = provider.requests().remove(0);
        assert!(system.contains("Rule 1:\nA\n\nRule 2:\nB"));
        assert_eq!(user, MERGE_REQUEST);
    }

    #[tokio::test]
    async fn test_merge_falls_back_to_concatenation() {
        let merger =
            RuleMerger::new(ctx(ScriptedProvider::failing(), TemplateStore::with_defaults()));
        assert_eq!(merger.merge(&rules(&["A", "B"])).await, "Rule 1:\nA\n\nRule 2:\nB");

        let merger = RuleMerger::new(ctx(ScriptedProvider::fixed("   "), TemplateStore::with_defaults()));
        assert_eq!(merger.merge(&rules(&["A"])).await, "Rule 1:\nA");
    }

    #[tokio::test]
    async fn test_merge_unfillable_template_appends_rules() {
        let provider = ScriptedProvider::fixed("merged");
        let mut templates = TemplateStore::default();
        templates.insert(COMBINE_RULES, "Combine {these}");
        let merger = RuleMerger::new(ctx(provider.clone(), templates));

        merger.merge(&rules(&["A"])).await;

        let (system, _) = provider.requests().remove(0);
        assert_eq!(system, "Combine {these}\n\nRules:\nRule 1:\nA");
    }
}
