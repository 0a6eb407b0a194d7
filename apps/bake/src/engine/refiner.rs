//! Refiner: asks the optimizer to rewrite every wrong prompt in one call.
//!
//! Rewrites come back inside `<REWRITE_BEGIN>…</REWRITE_END>` tags and are
//! paired with the wrong prompts by position. The optimizer is asked for them
//! in order, but nothing enforces it: a skipped or reordered rewrite pairs with
//! the wrong original.

use std::collections::HashMap;

use tracing::{info, warn};

use super::optimizer::OptimizerContext;
use super::parsing::extract_tags;
use crate::dataset::DatasetItem;
use crate::templates::ANALYZE_AND_REWRITE;

/// Longest model-output snippet shown to the optimizer per failed prompt.
const OUTPUT_SNIPPET_CHARS: usize = 300;
const REWRITE_TAG: &str = "REWRITE";

#[derive(Debug, Clone, PartialEq)]
pub struct RefinementPair {
    pub original: String,
    pub candidate: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefineOutcome {
    /// No wrong prompts: the optimizer was not called.
    NothingToRefine,
    Candidates(Vec<RefinementPair>),
    /// The optimizer answered but no rewrite tags were found.
    ParseFailure { response: String },
    /// Every attempt at the optimizer call failed.
    OptimizerUnavailable,
}

impl RefineOutcome {
    pub fn into_pairs(self) -> Vec<RefinementPair> {
        match self {
            RefineOutcome::Candidates(pairs) => pairs,
            _ => Vec::new(),
        }
    }
}

pub struct Refiner {
    ctx: OptimizerContext,
}

impl Refiner {
    pub fn new(ctx: OptimizerContext) -> Self {
        Self { ctx }
    }

    pub async fn refine(
        &self,
        correct: &[String],
        wrong: &[String],
        item: &DatasetItem,
        transcripts: &HashMap<String, String>,
    ) -> RefineOutcome {
        if wrong.is_empty() {
            return RefineOutcome::NothingToRefine;
        }

        let num = wrong.len().to_string();
        let system = self
            .ctx
            .render(ANALYZE_AND_REWRITE, &[("num", num.as_str())], str::to_string);
        let user = build_refine_request(correct, wrong, item, transcripts);

        let response = match self.ctx.ask(&system, &user).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Refine call failed: {e}");
                return RefineOutcome::OptimizerUnavailable;
            }
        };

        let rewrites = extract_tags(&response, REWRITE_TAG);
        if rewrites.is_empty() {
            warn!("Optimizer response contained no rewrite tags");
            return RefineOutcome::ParseFailure { response };
        }
        if rewrites.len() != wrong.len() {
            info!(
                "Optimizer returned {} rewrite(s) for {} wrong prompt(s); pairing by position",
                rewrites.len(),
                wrong.len()
            );
        }

        RefineOutcome::Candidates(pair_by_position(wrong, rewrites))
    }
}

/// Pairs the i-th wrong prompt with the i-th rewrite; extras on either side are dropped.
pub fn pair_by_position(wrong: &[String], rewrites: Vec<String>) -> Vec<RefinementPair> {
    wrong
        .iter()
        .zip(rewrites)
        .map(|(original, candidate)| RefinementPair {
            original: original.clone(),
            candidate,
        })
        .collect()
}

fn build_refine_request(
    correct: &[String],
    wrong: &[String],
    item: &DatasetItem,
    transcripts: &HashMap<String, String>,
) -> String {
    let mut out = String::new();
    out.push_str("[TASK CONTEXT]\n");
    out.push_str(&format!("Question: {}\n", item.question));
    out.push_str(&format!("Ground Truth: {}\n\n", item.ground_truth));

    out.push_str("[FAILED PROMPTS & OUTPUTS]\n");
    for (i, prompt) in wrong.iter().enumerate() {
        let output = transcripts.get(prompt).map(String::as_str).unwrap_or("");
        out.push_str(&format!(
            "<CASE_{n}>\nOriginal Prompt: {prompt}\nModel Output: {snippet}\n</CASE_{n}>\n",
            n = i + 1,
            snippet = snippet(output)
        ));
    }

    out.push_str("\n[SUCCESSFUL PROMPTS (REFERENCE)]\n");
    if correct.is_empty() {
        out.push_str("None\n");
    } else {
        for prompt in correct {
            out.push_str(&format!("- {prompt}\n"));
        }
    }
    out
}

fn snippet(output: &str) -> String {
    if output.chars().count() <= OUTPUT_SNIPPET_CHARS {
        return output.to_string();
    }
    let head: String = output.chars().take(OUTPUT_SNIPPET_CHARS).collect();
    format!("{head}...")
}
