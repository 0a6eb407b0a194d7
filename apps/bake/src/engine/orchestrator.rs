//! Orchestrator: drives one refinement run over a dataset.
//!
//! Items are processed strictly in order. Per item:
//!   evaluate pool → refine wrong prompts → verify candidates → extract rule
//!   → Tier-0 accumulate / Tier-1 merge → recursive merge → iterative feedback.
//! After the last item the rule tree is finalized and the final rule is turned
//! into the output prompts.
//!
//! Nothing here fails: every optimizer step degrades, and the item is recorded
//! with the status it reached.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::evaluator::{Evaluation, Evaluator};
use super::optimizer::OptimizerContext;
use super::refiner::{RefineOutcome, RefinementPair, Refiner};
use super::rule_tree::{MergeStep, RuleTree};
use super::rules::{RuleExtractor, RuleMerger};
use super::synthesis::PromptSynthesizer;
use crate::config::EngineConfig;
use crate::dataset::DatasetItem;
use crate::event_log::{EventLog, EventRecord, ItemStatus, PoolChange, StatusRow};
use crate::llm_client::{CompletionProvider, RetryPolicy};
use crate::templates::TemplateStore;
use crate::validation::AnswerValidator;

const NOTE_ALL_INDETERMINATE: &str = "all evaluations indeterminate";
const NOTE_NO_SUGGESTIONS: &str = "No suggestions from optimizer";
const NOTE_ALL_FAILED: &str = "All candidates failed";

// ────────────────────────────────────────────────────────────────────────────
// Run state and results
// ────────────────────────────────────────────────────────────────────────────

/// Mutable state threaded through the item loop.
#[derive(Debug, Clone)]
pub struct RunState {
    pub pool: Vec<String>,
    pub tree: RuleTree,
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub items: usize,
    pub skipped_all_correct: usize,
    pub failed_refine: usize,
    pub failed_verification: usize,
    pub succeeded: usize,
    pub rules_extracted: usize,
    pub merges: usize,
    pub pool_replacements: usize,
}

impl RunSummary {
    fn record(&mut self, status: ItemStatus) {
        self.items += 1;
        match status {
            ItemStatus::SkippedAllCorrect => self.skipped_all_correct += 1,
            ItemStatus::FailedRefine => self.failed_refine += 1,
            ItemStatus::FailedVerification => self.failed_verification += 1,
            ItemStatus::Success => self.succeeded += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub final_prompts: Vec<String>,
    pub final_rule: String,
    pub summary: RunSummary,
}

// ────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ────────────────────────────────────────────────────────────────────────────

pub struct Orchestrator {
    evaluator: Evaluator,
    refiner: Refiner,
    extractor: RuleExtractor,
    merger: RuleMerger,
    synthesizer: PromptSynthesizer,
    event_log: Arc<dyn EventLog>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        scorer: Arc<dyn CompletionProvider>,
        optimizer: Arc<dyn CompletionProvider>,
        validator: Arc<dyn AnswerValidator>,
        templates: Arc<TemplateStore>,
        event_log: Arc<dyn EventLog>,
        config: EngineConfig,
    ) -> Self {
        let retry = RetryPolicy::constant(config.max_retries, config.retry_delay)
            .with_timeout(config.call_timeout);
        let ctx = OptimizerContext::new(optimizer, templates, retry.clone());

        Self {
            evaluator: Evaluator::new(scorer, validator, retry, config.concurrency),
            refiner: Refiner::new(ctx.clone()),
            extractor: RuleExtractor::new(ctx.clone()),
            merger: RuleMerger::new(ctx.clone()),
            synthesizer: PromptSynthesizer::new(ctx),
            event_log,
            config,
        }
    }

    pub async fn run(&self, dataset: &[DatasetItem], initial_prompts: Vec<String>) -> RunOutcome {
        let mut state = RunState {
            pool: initial_prompts,
            tree: RuleTree::new(self.config.group_size),
        };
        let mut summary = RunSummary::default();

        self.event_log.append_record(&EventRecord::PromptHistory {
            change: PoolChange::InitialLoad,
            sample_idx: 0,
            prompts: state.pool.clone(),
            count: state.pool.len(),
        });
        info!(
            "Starting run: {} item(s), {} prompt(s), group_size={}, iterative={}",
            dataset.len(),
            state.pool.len(),
            self.config.group_size,
            self.config.iterative
        );

        for (idx, item) in dataset.iter().enumerate() {
            info!("Processing {}/{} [{}]", idx + 1, dataset.len(), item.source);
            let status = self.process_item(idx, item, &mut state, &mut summary).await;
            summary.record(status);
        }

        let final_rule = self.finalize(&mut state, &mut summary).await;

        let final_prompts = self
            .synthesizer
            .synthesize(&final_rule, self.config.max_output_prompts)
            .await;
        if final_rule.is_empty() {
            warn!("No rule was learned; no output prompts generated");
        } else if final_prompts.is_empty() {
            warn!("Final rule produced no usable prompts");
        }

        info!(
            "Run complete: {} succeeded, {} skipped, {} failed refine, {} failed verification",
            summary.succeeded,
            summary.skipped_all_correct,
            summary.failed_refine,
            summary.failed_verification
        );

        RunOutcome {
            final_prompts,
            final_rule,
            summary,
        }
    }

    async fn process_item(
        &self,
        idx: usize,
        item: &DatasetItem,
        state: &mut RunState,
        summary: &mut RunSummary,
    ) -> ItemStatus {
        let evaluation = self.evaluator.evaluate(item, &state.pool).await;
        info!(
            "  correct={} wrong={} indeterminate={}",
            evaluation.correct.len(),
            evaluation.wrong.len(),
            evaluation.indeterminate.len()
        );
        self.event_log.append_record(&EventRecord::Evaluation {
            id: idx,
            source: item.source.clone(),
            task_type: item.task_type,
            question: item.question.clone(),
            results: evaluation.verdicts(),
        });

        if evaluation.wrong.is_empty() {
            let note = if evaluation.correct.is_empty() && !evaluation.indeterminate.is_empty() {
                NOTE_ALL_INDETERMINATE
            } else {
                ""
            };
            return self.record_status(idx, item, ItemStatus::SkippedAllCorrect, 0, 0, note);
        }

        let outcome = self
            .refiner
            .refine(
                &evaluation.correct,
                &evaluation.wrong,
                item,
                &evaluation.failure_transcripts,
            )
            .await;
        if let RefineOutcome::ParseFailure { response } = &outcome {
            self.event_log.append_record(&EventRecord::RefineParseFailure {
                id: idx,
                response: response.clone(),
            });
        }
        let pairs = outcome.into_pairs();
        if pairs.is_empty() {
            return self.record_status(
                idx,
                item,
                ItemStatus::FailedRefine,
                evaluation.wrong.len(),
                0,
                NOTE_NO_SUGGESTIONS,
            );
        }

        let verified = self.verify(idx, item, pairs).await;
        if verified.is_empty() {
            return self.record_status(
                idx,
                item,
                ItemStatus::FailedVerification,
                evaluation.wrong.len(),
                0,
                NOTE_ALL_FAILED,
            );
        }
        info!("  {} candidate(s) verified", verified.len());
        self.record_status(
            idx,
            item,
            ItemStatus::Success,
            evaluation.wrong.len(),
            verified.len(),
            "",
        );

        self.learn(idx, item, &evaluation, &verified, state, summary)
            .await;
        ItemStatus::Success
    }

    /// Re-evaluates every candidate on the same item; keeps the pairs whose candidate is correct.
    async fn verify(
        &self,
        idx: usize,
        item: &DatasetItem,
        pairs: Vec<RefinementPair>,
    ) -> Vec<RefinementPair> {
        let candidates: Vec<String> = pairs.iter().map(|p| p.candidate.clone()).collect();
        let verification = self.evaluator.evaluate(item, &candidates).await;

        let mut verified = Vec::new();
        for pair in pairs {
            let passed = verification.is_correct(&pair.candidate);
            let model_output = match verification.failure_transcripts.get(&pair.candidate) {
                Some(output) => output.clone(),
                None if passed => "Correct".to_string(),
                None => "No Output".to_string(),
            };
            self.event_log.append_record(&EventRecord::Trace {
                id: idx,
                source: item.source.clone(),
                original_prompt: pair.original.clone(),
                candidate_prompt: pair.candidate.clone(),
                verified: passed,
                model_output,
            });
            if passed {
                verified.push(pair);
            }
        }
        verified
    }

    /// Extracts a rule from the verified fixes and feeds it into the rule tree.
    async fn learn(
        &self,
        idx: usize,
        item: &DatasetItem,
        evaluation: &Evaluation,
        verified: &[RefinementPair],
        state: &mut RunState,
        summary: &mut RunSummary,
    ) {
        let rule = self.extractor.extract(&evaluation.correct, verified).await;
        if rule.is_empty() {
            warn!("  No rule extracted for item {idx}");
            return;
        }
        summary.rules_extracted += 1;
        self.event_log.append_text(
            &format!("Sample {idx} ({})", item.source),
            &format!("{rule}\n\nFixes:\n{}", format_fixes(verified)),
        );

        let Some(tier1) = state.tree.accumulate(rule, &self.merger).await else {
            return;
        };
        info!("  Tier-0 buffer full; merged into Tier-1");
        self.log_merge(Some(idx), &tier1, summary);

        for step in state.tree.reduce(&self.merger).await {
            info!("  Merge queue folded");
            self.log_merge(Some(idx), &step, summary);
        }

        if self.config.iterative {
            self.refresh_pool(idx, &tier1.rule, state, summary).await;
        }
    }

    /// Regenerates the pool from the newest Tier-1 rule. An empty generation keeps the old pool.
    async fn refresh_pool(
        &self,
        idx: usize,
        rule: &str,
        state: &mut RunState,
        summary: &mut RunSummary,
    ) {
        let prompts = self
            .synthesizer
            .synthesize(rule, self.config.iterative_prompt_count)
            .await;
        if prompts.is_empty() {
            warn!("  Iterative synthesis produced no prompts; keeping the current pool");
            return;
        }

        info!("  Prompt pool replaced ({} prompt(s))", prompts.len());
        state.pool = prompts;
        summary.pool_replacements += 1;
        self.event_log.append_record(&EventRecord::PromptHistory {
            change: PoolChange::IterativeUpdate,
            sample_idx: idx,
            prompts: state.pool.clone(),
            count: state.pool.len(),
        });
    }

    async fn finalize(&self, state: &mut RunState, summary: &mut RunSummary) -> String {
        let (final_rule, steps) = state.tree.finalize(&self.merger).await;
        for step in &steps {
            self.log_merge(None, step, summary);
        }
        self.event_log.append_text("FINAL RULE", &final_rule);
        final_rule
    }

    fn log_merge(&self, sample_idx: Option<usize>, step: &MergeStep, summary: &mut RunSummary) {
        summary.merges += 1;
        self.event_log.append_record(&EventRecord::RuleEvolution {
            sample_idx,
            tier: step.tier,
            rule_content: step.rule.clone(),
        });
        self.event_log.append_text(step.tier.title(), &step.rule);
    }

    fn record_status(
        &self,
        idx: usize,
        item: &DatasetItem,
        status: ItemStatus,
        initial_wrong: usize,
        verified_success: usize,
        note: &str,
    ) -> ItemStatus {
        info!("  -> {status}");
        self.event_log.append_record(&EventRecord::Status(StatusRow {
            id: idx,
            source: item.source.clone(),
            status,
            initial_wrong,
            verified_success,
            note: note.to_string(),
        }));
        status
    }
}

fn format_fixes(pairs: &[RefinementPair]) -> String {
    pairs
        .iter()
        .map(|p| format!("- Original: {}\n  Fixed: {}", p.original, p.candidate))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::TaskType;
    use crate::engine::rule_tree::MergeTier;
    use crate::llm_client::LlmError;
    use crate::testing::{MemoryEventLog, ScriptedProvider};
    use crate::validation::TaskAwareValidator;
    use std::time::Duration;

    fn item(question: &str, answer: &str) -> DatasetItem {
        DatasetItem {
            question: question.to_string(),
            ground_truth: answer.to_string(),
            task_type: TaskType::Math,
            source: "unit".to_string(),
        }
    }

    fn config(group_size: usize, iterative: bool) -> EngineConfig {
        EngineConfig {
            concurrency: 2,
            max_retries: 1,
            retry_delay: Duration::ZERO,
            call_timeout: Duration::from_secs(5),
            group_size,
            iterative,
            iterative_prompt_count: 2,
            max_output_prompts: 3,
        }
    }

    fn orchestrator(
        scorer: Arc<ScriptedProvider>,
        optimizer: Arc<ScriptedProvider>,
        log: Arc<MemoryEventLog>,
        config: EngineConfig,
    ) -> Orchestrator {
        Orchestrator::new(
            scorer,
            optimizer,
            Arc::new(TaskAwareValidator),
            Arc::new(TemplateStore::with_defaults()),
            log,
            config,
        )
    }

    /// Answers correctly for prompts mentioning "step", wrongly otherwise.
    fn step_scorer() -> Arc<ScriptedProvider> {
        ScriptedProvider::new(|_, user| {
            if user.contains("step") {
                Ok("The answer is 42".to_string())
            } else {
                Ok("Probably 7".to_string())
            }
        })
    }

    /// Recognizes each optimizer request by its system message.
    fn scripted_optimizer() -> Arc<ScriptedProvider> {
        ScriptedProvider::new(|system, user| {
            if system.contains("<REWRITE_BEGIN>") {
                Ok("<REWRITE_BEGIN>Think step by step.</REWRITE_END>".to_string())
            } else if system.contains("Distill") {
                Ok("Ask for explicit steps.".to_string())
            } else if system.contains("Merge the following") {
                Ok(format!("merged[{}]", system.matches("Rule ").count()))
            } else if user.starts_with("Please generate") {
                Ok("Work through the problem step by step.\nShow every step before answering."
                    .to_string())
            } else {
                Err(LlmError::Api { status: 503, message: "unexpected request".to_string() })
            }
        })
    }

    #[tokio::test]
    async fn test_all_correct_items_never_call_optimizer() {
        let scorer = ScriptedProvider::fixed("42");
        let optimizer = ScriptedProvider::fixed("unused");
        let log = Arc::new(MemoryEventLog::default());
        let orch = orchestrator(scorer, optimizer.clone(), log.clone(), config(2, false));

        let outcome = orch
            .run(&[item("6*7?", "42"), item("40+2?", "42")], vec!["Answer.".to_string()])
            .await;

        assert_eq!(optimizer.call_count(), 0);
        assert_eq!(outcome.final_rule, "");
        assert!(outcome.final_prompts.is_empty());
        assert_eq!(
            log.statuses(),
            vec![ItemStatus::SkippedAllCorrect, ItemStatus::SkippedAllCorrect]
        );
        assert_eq!(outcome.summary.skipped_all_correct, 2);
        assert_eq!(log.texts(), vec![("FINAL RULE".to_string(), String::new())]);
    }

    #[tokio::test]
    async fn test_three_successes_build_final_rule() {
        let log = Arc::new(MemoryEventLog::default());
        let optimizer = scripted_optimizer();
        let orch = orchestrator(step_scorer(), optimizer, log.clone(), config(2, false));
        let dataset = vec![item("q1", "42"), item("q2", "42"), item("q3", "42")];

        let outcome = orch.run(&dataset, vec!["Just answer.".to_string()]).await;

        assert_eq!(log.statuses(), vec![ItemStatus::Success; 3]);
        let rows = log.status_rows();
        assert!(rows.iter().all(|r| r.initial_wrong == 1 && r.verified_success == 1));

        let tiers: Vec<_> = log
            .records()
            .into_iter()
            .filter_map(|r| match r {
                EventRecord::RuleEvolution { sample_idx, tier, .. } => Some((sample_idx, tier)),
                _ => None,
            })
            .collect();
        assert_eq!(
            tiers,
            vec![
                (Some(1), MergeTier::Tier1),
                (None, MergeTier::CleanupTier0),
                (None, MergeTier::Convergence),
            ]
        );

        assert_eq!(outcome.final_rule, "merged[2]");
        assert_eq!(outcome.final_prompts.len(), 2);
        assert_eq!(
            outcome.summary,
            RunSummary {
                items: 3,
                succeeded: 3,
                rules_extracted: 3,
                merges: 3,
                ..RunSummary::default()
            }
        );

        let titles: Vec<String> = log.texts().into_iter().map(|(t, _)| t).collect();
        assert_eq!(titles.first().map(String::as_str), Some("Sample 0 (unit)"));
        assert_eq!(titles.last().map(String::as_str), Some("FINAL RULE"));
    }

    #[tokio::test]
    async fn test_untagged_refine_reply_fails_refine_step() {
        let log = Arc::new(MemoryEventLog::default());
        let optimizer = ScriptedProvider::fixed("no tags here");
        let orch = orchestrator(step_scorer(), optimizer, log.clone(), config(2, false));

        let outcome = orch.run(&[item("q", "42")], vec!["Guess.".to_string()]).await;

        let rows = log.status_rows();
        assert_eq!(rows[0].status, ItemStatus::FailedRefine);
        assert_eq!(rows[0].note, NOTE_NO_SUGGESTIONS);
        assert!(log
            .records()
            .iter()
            .any(|r| matches!(r, EventRecord::RefineParseFailure { id: 0, .. })));
        assert_eq!(outcome.summary.failed_refine, 1);
    }

    #[tokio::test]
    async fn test_candidate_that_stays_wrong_fails_verification() {
        let log = Arc::new(MemoryEventLog::default());
        let optimizer = ScriptedProvider::fixed("<REWRITE_BEGIN>Try harder.</REWRITE_END>");
        let orch = orchestrator(step_scorer(), optimizer, log.clone(), config(2, false));

        orch.run(&[item("q", "42")], vec!["Guess.".to_string()]).await;

        let rows = log.status_rows();
        assert_eq!(rows[0].status, ItemStatus::FailedVerification);
        assert_eq!(rows[0].note, NOTE_ALL_FAILED);
        let trace = log
            .records()
            .into_iter()
            .find_map(|r| match r {
                EventRecord::Trace {
                    verified,
                    model_output,
                    ..
                } => Some((verified, model_output)),
                _ => None,
            })
            .unwrap();
        assert_eq!(trace, (false, "Probably 7".to_string()));
    }

    #[tokio::test]
    async fn test_unreachable_scorer_skips_with_note() {
        let log = Arc::new(MemoryEventLog::default());
        let optimizer = ScriptedProvider::fixed("unused");
        let orch = orchestrator(
            ScriptedProvider::failing(),
            optimizer.clone(),
            log.clone(),
            config(2, false),
        );

        orch.run(&[item("q", "42")], vec!["p1".to_string(), "p2".to_string()])
            .await;

        let rows = log.status_rows();
        assert_eq!(rows[0].status, ItemStatus::SkippedAllCorrect);
        assert_eq!(rows[0].note, NOTE_ALL_INDETERMINATE);
        assert_eq!(optimizer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_iterative_mode_replaces_pool_after_tier1_merge() {
        let log = Arc::new(MemoryEventLog::default());
        let orch = orchestrator(
            step_scorer(),
            scripted_optimizer(),
            log.clone(),
            config(2, true),
        );
        let dataset = vec![item("q1", "42"), item("q2", "42"), item("q3", "42")];

        let outcome = orch.run(&dataset, vec!["Just answer.".to_string()]).await;

        let history: Vec<_> = log
            .records()
            .into_iter()
            .filter_map(|r| match r {
                EventRecord::PromptHistory {
                    change,
                    sample_idx,
                    count,
                    ..
                } => Some((change, sample_idx, count)),
                _ => None,
            })
            .collect();
        assert_eq!(
            history,
            vec![
                (PoolChange::InitialLoad, 0, 1),
                (PoolChange::IterativeUpdate, 1, 2),
            ]
        );
        // The regenerated pool already mentions "step", so the third item is all correct.
        assert_eq!(
            log.statuses(),
            vec![
                ItemStatus::Success,
                ItemStatus::Success,
                ItemStatus::SkippedAllCorrect
            ]
        );
        assert_eq!(outcome.summary.pool_replacements, 1);
    }

    #[tokio::test]
    async fn test_iterative_empty_generation_keeps_pool() {
        let log = Arc::new(MemoryEventLog::default());
        let optimizer = ScriptedProvider::new(|system, user| {
            if system.contains("<REWRITE_BEGIN>") {
                Ok("<REWRITE_BEGIN>Think step by step.</REWRITE_END>".to_string())
            } else if user.starts_with("Please generate") {
                Ok("ok".to_string())
            } else {
                Ok("A rule.".to_string())
            }
        });
        let orch = orchestrator(step_scorer(), optimizer, log.clone(), config(2, true));

        let outcome = orch
            .run(&[item("q1", "42"), item("q2", "42")], vec!["Guess.".to_string()])
            .await;

        assert_eq!(outcome.summary.pool_replacements, 0);
        assert_eq!(log.statuses(), vec![ItemStatus::Success; 2]);
    }
}
