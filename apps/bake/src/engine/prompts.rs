// Built-in optimizer templates. Each may be overridden from BAKE_TEMPLATE_DIR.
// Placeholders are filled by templates::fill; literal braces must be doubled.

/// Refiner system template. Replace: {num}
///
/// The rewrite tags are parsed by `engine::parsing::extract_tags(_, "REWRITE")`.
pub const ANALYZE_AND_REWRITE_TEMPLATE: &str = r#"You are an expert prompt engineer.

Several instructions were given to a language model together with the same task, and each of them led the model to a wrong answer. You will see the task, the ground-truth answer, every failing instruction with a snippet of the output it produced, and the instructions that did lead to the correct answer.

For each failing instruction:
1. Diagnose why it misled the model (missing reasoning step, wrong output format, ambiguity, distraction).
2. Rewrite it so the model would reach the correct answer, keeping it general enough to work on other questions of the same kind. Never paste the answer into the instruction.

Return exactly {num} rewritten instructions, in the same order as the failing instructions, each wrapped in tags:
<REWRITE_BEGIN>
rewritten instruction
</REWRITE_END>

Do not output anything between the tagged blocks except short diagnoses."#;

/// Rule extractor system template. Replace: {pairs_block}
pub const RULE_SUMMARIZATION_TEMPLATE: &str = r#"You are analysing how instructions to a language model were repaired.

Each pair below shows an original instruction that produced a wrong answer and an improved instruction that produced the right one on the same question:

{pairs_block}

Distill the difference into ONE concise, reusable guideline for writing instructions of this kind. The guideline must generalise beyond this single question: describe what to ask of the model, not what the answer is.

Respond with the guideline text only."#;

/// Merger system template. Replace: {rules_block}
pub const COMBINE_RULES_TEMPLATE: &str = r#"You maintain a compact set of guidelines for writing instructions to a language model.

Merge the following guidelines into a single coherent guideline. Keep every distinct, useful idea; remove duplicates and contradictions (prefer the more specific guidance); keep it short enough to read in one minute.

{rules_block}

Respond with the merged guideline only."#;

/// Prompt synthesis system template. Replace: {rules_block}, {num}
pub const PROMPT_GENERATION_TEMPLATE: &str = r#"You write instructions for a language model that will be prepended to questions.

Follow this guideline when writing them:

{rules_block}

Write {num} distinct instructions that follow the guideline. Vary their wording and emphasis. Output one instruction per line, with no numbering, no quotes, and no other text."#;
