// Per-prompt accuracy of a fixed pool over a dataset, without any refinement.

use serde::Serialize;
use tracing::info;

use super::evaluator::{Evaluator, Outcome};
use crate::dataset::DatasetItem;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptScore {
    pub prompt: String,
    pub correct: usize,
    pub wrong: usize,
    pub indeterminate: usize,
    /// correct / (correct + wrong); indeterminate items are not counted.
    pub accuracy: f64,
}

/// Scores in pool order.
pub async fn score_prompts(
    evaluator: &Evaluator,
    dataset: &[DatasetItem],
    prompts: &[String],
) -> Vec<PromptScore> {
    let mut tally = vec![(0usize, 0usize, 0usize); prompts.len()];

    for (idx, item) in dataset.iter().enumerate() {
        let evaluation = evaluator.evaluate(item, prompts).await;
        for (slot, (_, outcome)) in tally.iter_mut().zip(&evaluation.outcomes) {
            match outcome {
                Outcome::Correct => slot.0 += 1,
                Outcome::Wrong { .. } => slot.1 += 1,
                Outcome::Indeterminate => slot.2 += 1,
            }
        }
        info!(
            "Evaluated {}/{}: {} of {} prompt(s) correct",
            idx + 1,
            dataset.len(),
            evaluation.correct.len(),
            prompts.len()
        );
    }

    prompts
        .iter()
        .zip(tally)
        .map(|(prompt, (correct, wrong, indeterminate))| {
            let answered = correct + wrong;
            PromptScore {
                prompt: prompt.clone(),
                correct,
                wrong,
                indeterminate,
                accuracy: if answered == 0 {
                    0.0
                } else {
                    correct as f64 / answered as f64
                },
            }
        })
        .collect()
}
