//! Dataset Source: labeled items read from JSON Lines, plus the seed prompt file.
//!
//! Records with a `choices` list are rendered as lettered multiple-choice
//! questions; an integer answer is mapped to its option letter.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::AppError;

const OPTION_LETTERS: [&str; 26] = [
    "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R",
    "S", "T", "U", "V", "W", "X", "Y", "Z",
];

/// How a prediction is compared with the ground truth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum TaskType {
    Math,
    MultipleChoice,
    #[default]
    General,
}

impl From<String> for TaskType {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "math" => TaskType::Math,
            "multiple_choice" => TaskType::MultipleChoice,
            _ => TaskType::General,
        }
    }
}

/// One labeled example. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetItem {
    pub question: String,
    pub ground_truth: String,
    pub task_type: TaskType,
    pub source: String,
}

/// On-disk shape of one JSONL line.
#[derive(Debug, Deserialize)]
struct DatasetRecord {
    question: String,
    #[serde(alias = "ground_truth")]
    answer: serde_json::Value,
    #[serde(default, rename = "type", alias = "task_type")]
    task_type: TaskType,
    #[serde(default = "default_source")]
    source: String,
    #[serde(default)]
    choices: Vec<String>,
}

fn default_source() -> String {
    "unknown".to_string()
}

impl DatasetRecord {
    fn into_item(self) -> Result<DatasetItem, String> {
        let question = if self.choices.is_empty() {
            self.question
        } else {
            format_choice_question(&self.question, &self.choices)
        };

        let ground_truth = match &self.answer {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) if !self.choices.is_empty() => {
                let index = n
                    .as_u64()
                    .ok_or_else(|| format!("answer index {n} is not a non-negative integer"))?
                    as usize;
                if index >= self.choices.len() || index >= OPTION_LETTERS.len() {
                    return Err(format!(
                        "answer index {index} out of range for {} choices",
                        self.choices.len()
                    ));
                }
                OPTION_LETTERS[index].to_string()
            }
            serde_json::Value::Number(n) => n.to_string(),
            other => return Err(format!("unsupported answer value: {other}")),
        };

        Ok(DatasetItem {
            question,
            ground_truth,
            task_type: self.task_type,
            source: self.source,
        })
    }
}

/// Renders a question with lettered options, ending in `Answer:`.
pub fn format_choice_question(question: &str, choices: &[String]) -> String {
    let mut formatted = format!("{question}\n");
    for (letter, choice) in OPTION_LETTERS.iter().zip(choices) {
        formatted.push_str(&format!("({letter}) {choice}\n"));
    }
    formatted.push_str("Answer:");
    formatted
}

/// Parses JSONL text. Blank lines are skipped; `limit == 0` keeps everything after `offset`.
pub fn parse_dataset(text: &str, offset: usize, limit: usize) -> Result<Vec<DatasetItem>, AppError> {
    let mut items = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: DatasetRecord = serde_json::from_str(line)
            .map_err(|e| AppError::Dataset(format!("line {}: {e}", line_no + 1)))?;
        let item = record
            .into_item()
            .map_err(|e| AppError::Dataset(format!("line {}: {e}", line_no + 1)))?;
        items.push(item);
    }

    let selected = items.into_iter().skip(offset);
    Ok(if limit > 0 {
        selected.take(limit).collect()
    } else {
        selected.collect()
    })
}

pub fn load_dataset(path: &Path, offset: usize, limit: usize) -> Result<Vec<DatasetItem>, AppError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AppError::Dataset(format!("cannot read {}: {e}", path.display())))?;
    let items = parse_dataset(&text, offset, limit)?;
    info!("Loaded {} dataset items from {}", items.len(), path.display());
    Ok(items)
}

/// One prompt per non-empty line.
pub fn load_prompts(path: &Path) -> Result<Vec<String>, AppError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AppError::Prompts(format!("cannot read {}: {e}", path.display())))?;
    let prompts: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    if prompts.is_empty() {
        return Err(AppError::Prompts(format!(
            "{} contains no prompts",
            path.display()
        )));
    }
    Ok(prompts)
}
