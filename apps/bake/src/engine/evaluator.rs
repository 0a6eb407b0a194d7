//! Concurrent Evaluator: scores every prompt in a pool against one item.
//!
//! Each prompt gets one scorer call (under the retry policy), at most
//! `concurrency` in flight. A call that never succeeds makes the prompt
//! Indeterminate: it is neither correct nor wrong and is never refined.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::warn;

use crate::dataset::DatasetItem;
use crate::event_log::{PromptVerdict, Verdict};
use crate::llm_client::prompts::{evaluation_request, EVAL_SYSTEM};
use crate::llm_client::{CompletionProvider, RetryPolicy};
use crate::validation::AnswerValidator;

/// What happened to one prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Correct,
    Wrong { output: String },
    Indeterminate,
}

impl Outcome {
    pub fn verdict(&self) -> Verdict {
        match self {
            Outcome::Correct => Verdict::Correct,
            Outcome::Wrong { .. } => Verdict::Wrong,
            Outcome::Indeterminate => Verdict::Indeterminate,
        }
    }
}

/// Result of evaluating one pool on one item. `correct`, `wrong` and
/// `indeterminate` partition the pool and keep its order.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub correct: Vec<String>,
    pub wrong: Vec<String>,
    pub indeterminate: Vec<String>,
    /// One entry per pool position.
    pub outcomes: Vec<(String, Outcome)>,
    /// Raw scorer output for every wrong prompt.
    pub failure_transcripts: HashMap<String, String>,
}

impl Evaluation {
    fn from_outcomes(outcomes: Vec<(String, Outcome)>) -> Self {
        let mut evaluation = Evaluation::default();
        for (prompt, outcome) in &outcomes {
            match outcome {
                Outcome::Correct => evaluation.correct.push(prompt.clone()),
                Outcome::Wrong { output } => {
                    evaluation.wrong.push(prompt.clone());
                    evaluation
                        .failure_transcripts
                        .insert(prompt.clone(), output.clone());
                }
                Outcome::Indeterminate => evaluation.indeterminate.push(prompt.clone()),
            }
        }
        evaluation.outcomes = outcomes;
        evaluation
    }

    pub fn is_correct(&self, prompt: &str) -> bool {
        self.correct.iter().any(|p| p == prompt)
    }

    pub fn verdicts(&self) -> Vec<PromptVerdict> {
        self.outcomes
            .iter()
            .map(|(prompt, outcome)| PromptVerdict {
                prompt: prompt.clone(),
                verdict: outcome.verdict(),
            })
            .collect()
    }
}

pub struct Evaluator {
    scorer: Arc<dyn CompletionProvider>,
    validator: Arc<dyn AnswerValidator>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl Evaluator {
    pub fn new(
        scorer: Arc<dyn CompletionProvider>,
        validator: Arc<dyn AnswerValidator>,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            scorer,
            validator,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn evaluate(&self, item: &DatasetItem, prompts: &[String]) -> Evaluation {
        let semaphore = Semaphore::new(self.concurrency);
        let mut pending = FuturesUnordered::new();

        for (index, prompt) in prompts.iter().enumerate() {
            let semaphore = &semaphore;
            pending.push(async move {
                let _permit = semaphore.acquire().await.ok();
                (index, self.evaluate_one(item, prompt).await)
            });
        }

        let mut slots: Vec<Option<Outcome>> = vec![None; prompts.len()];
        while let Some((index, outcome)) = pending.next().await {
            slots[index] = Some(outcome);
        }

        let outcomes = prompts
            .iter()
            .cloned()
            .zip(slots)
            .map(|(prompt, outcome)| (prompt, outcome.unwrap_or(Outcome::Indeterminate)))
            .collect();

        Evaluation::from_outcomes(outcomes)
    }

    async fn evaluate_one(&self, item: &DatasetItem, prompt: &str) -> Outcome {
        let request = evaluation_request(prompt, &item.question);
        match self.retry.chat(self.scorer.as_ref(), EVAL_SYSTEM, &request).await {
            Ok(output) => {
                if self
                    .validator
                    .validate(&output, &item.ground_truth, item.task_type)
                {
                    Outcome::Correct
                } else {
                    Outcome::Wrong { output }
                }
            }
            Err(e) => {
                warn!(
                    "Scorer {} gave no answer after {} attempt(s): {e}",
                    self.scorer.model(),
                    self.retry.max_attempts()
                );
                Outcome::Indeterminate
            }
        }
    }
}
