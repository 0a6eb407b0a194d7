//! Answer Validator: decides whether a scorer output matches the ground truth.
//!
//! Pure and stateless. Extraction failures are `false`, never errors.
//!
//! Multiple-choice extraction is tiered, most explicit first:
//! 1. `Answer: (B)` / `the answer is b` / `Option C`
//! 2. a parenthesised letter `(D)` or `(e)`
//! 3. a standalone capital `A`-`D`
//! 4. a bare short reply such as `b`
//!
//! The first two tiers ignore case and accept any option letter. The third
//! stays uppercase `A`-`D` so the article "a" and the pronoun "I" never count.
//! The last match within the first tier that matches wins.

use std::sync::OnceLock;

use regex::Regex;

use crate::dataset::TaskType;

/// Two numbers closer than this are the same answer.
const MATH_TOLERANCE: f64 = 1e-6;

/// The validator seam. `TaskAwareValidator` is the default; tests may swap in
/// anything deterministic.
pub trait AnswerValidator: Send + Sync {
    fn validate(&self, prediction: &str, ground_truth: &str, task_type: TaskType) -> bool;
}

pub struct TaskAwareValidator;

impl AnswerValidator for TaskAwareValidator {
    fn validate(&self, prediction: &str, ground_truth: &str, task_type: TaskType) -> bool {
        validate_answer(prediction, ground_truth, task_type)
    }
}

pub fn validate_answer(prediction: &str, ground_truth: &str, task_type: TaskType) -> bool {
    match task_type {
        TaskType::Math => match (last_number(prediction), last_number(ground_truth)) {
            (Some(p), Some(g)) => (p - g).abs() < MATH_TOLERANCE,
            _ => false,
        },
        TaskType::MultipleChoice => match extract_choice(prediction) {
            Some(choice) => choice.to_string() == ground_truth.trim().to_ascii_uppercase(),
            None => false,
        },
        TaskType::General => prediction.trim() == ground_truth.trim(),
    }
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+\.?\d*").expect("number pattern is valid"))
}

fn choice_res() -> &'static [Regex; 3] {
    static RES: OnceLock<[Regex; 3]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(r"(?i)(?:answer|option|choice)\s*(?:is)?\s*[:\-]?\s*\(?([A-Z])\b")
                .expect("labelled choice pattern is valid"),
            Regex::new(r"(?i)\(([A-Z])\)").expect("parenthesised choice pattern is valid"),
            Regex::new(r"\b([A-D])\b").expect("bare choice pattern is valid"),
        ]
    })
}

/// Last numeric literal in `s`, thousands separators removed.
pub fn last_number(s: &str) -> Option<f64> {
    let cleaned = s.replace(',', "");
    number_re()
        .find_iter(&cleaned)
        .last()
        .and_then(|m| m.as_str().trim_end_matches('.').parse().ok())
}

/// The option letter a free-text reply commits to, if any.
pub fn extract_choice(s: &str) -> Option<char> {
    for re in choice_res() {
        if let Some(caps) = re.captures_iter(s).last() {
            return caps[1].chars().next().map(|c| c.to_ascii_uppercase());
        }
    }

    let trimmed = s.trim().trim_end_matches(['.', ')']).trim_start_matches('(');
    if trimmed.chars().count() == 1 {
        let c = trimmed.chars().next()?.to_ascii_uppercase();
        if c.is_ascii_uppercase() {
            return Some(c);
        }
    }
    None
}
