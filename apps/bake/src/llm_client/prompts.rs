// Shared prompt constants.
// Optimizer-facing templates live in engine::prompts; this file holds the
// fragments used when talking to the scorer.

/// System message for every scorer evaluation call. The candidate prompt is
/// sent in the user turn together with the question.
pub const EVAL_SYSTEM: &str = "You are a helpful assistant.";

/// Builds the single user message for one (prompt, question) evaluation.
pub fn evaluation_request(prompt: &str, question: &str) -> String {
    format!("{prompt}\n\n{question}")
}
