//! Append-only Event Log: audit trail of a run. Never read back by the engine.
//!
//! Each record kind has its own file under the output directory. Appends are
//! serialized through one mutex so concurrent writers never interleave
//! partial lines; ordering is preserved per call site only.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::dataset::TaskType;
use crate::engine::rule_tree::MergeTier;
use crate::errors::AppError;

pub const DETAILED_LOG: &str = "detailed_results.jsonl";
pub const STATUS_LOG: &str = "optimization_status.csv";
pub const TRACE_LOG: &str = "refinement_trace.jsonl";
pub const PROMPT_HISTORY_LOG: &str = "prompt_history.jsonl";
pub const RULE_EVOLUTION_LOG: &str = "rule_evolution.jsonl";
pub const OPTIMIZER_DEBUG_LOG: &str = "optimizer_debug.jsonl";
pub const RULES_LOG: &str = "rules.log";

const STATUS_HEADER: [&str; 6] = [
    "id",
    "source",
    "status",
    "initial_wrong",
    "verified_success",
    "note",
];

/// Terminal status of one dataset item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ItemStatus {
    #[serde(rename = "Skipped (All Correct)")]
    SkippedAllCorrect,
    #[serde(rename = "Failed (Refine Step)")]
    FailedRefine,
    #[serde(rename = "Failed (Verification)")]
    FailedVerification,
    #[serde(rename = "Success")]
    Success,
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemStatus::SkippedAllCorrect => "Skipped (All Correct)",
            ItemStatus::FailedRefine => "Failed (Refine Step)",
            ItemStatus::FailedVerification => "Failed (Verification)",
            ItemStatus::Success => "Success",
        };
        f.write_str(s)
    }
}

/// One row of `optimization_status.csv`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusRow {
    pub id: usize,
    pub source: String,
    pub status: ItemStatus,
    pub initial_wrong: usize,
    pub verified_success: usize,
    pub note: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Correct,
    Wrong,
    Indeterminate,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptVerdict {
    pub prompt: String,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolChange {
    InitialLoad,
    IterativeUpdate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventRecord {
    /// First-pass evaluation of the pool on one item.
    Evaluation {
        id: usize,
        source: String,
        task_type: TaskType,
        question: String,
        results: Vec<PromptVerdict>,
    },
    Status(StatusRow),
    /// One refinement pair and whether its candidate survived verification.
    Trace {
        id: usize,
        source: String,
        original_prompt: String,
        candidate_prompt: String,
        verified: bool,
        model_output: String,
    },
    PromptHistory {
        change: PoolChange,
        sample_idx: usize,
        prompts: Vec<String>,
        count: usize,
    },
    /// `sample_idx` is `None` for merges made during finalization.
    RuleEvolution {
        sample_idx: Option<usize>,
        tier: MergeTier,
        rule_content: String,
    },
    /// Optimizer answer in which no rewrite tags were found.
    RefineParseFailure { id: usize, response: String },
}

/// Fire-and-forget sink. Implementations swallow their own I/O failures.
pub trait EventLog: Send + Sync {
    fn append_record(&self, record: &EventRecord);

    /// Human-readable block, e.g. a rule and the fixes it came from.
    fn append_text(&self, title: &str, body: &str);
}

#[derive(Serialize)]
struct Stamped<'a> {
    at: DateTime<Utc>,
    #[serde(flatten)]
    record: &'a EventRecord,
}

struct Sinks {
    detailed: File,
    status: csv::Writer<File>,
    trace: File,
    prompt_history: File,
    rule_evolution: File,
    optimizer_debug: File,
    rules: File,
}

pub struct FileEventLog {
    sinks: Mutex<Sinks>,
}

impl FileEventLog {
    /// Creates `dir` if needed and truncates every log file in it.
    pub fn create(dir: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(dir)?;

        let mut status = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(File::create(dir.join(STATUS_LOG))?);
        status.write_record(STATUS_HEADER)?;
        status.flush()?;

        let sinks = Sinks {
            detailed: File::create(dir.join(DETAILED_LOG))?,
            status,
            trace: File::create(dir.join(TRACE_LOG))?,
            prompt_history: File::create(dir.join(PROMPT_HISTORY_LOG))?,
            rule_evolution: File::create(dir.join(RULE_EVOLUTION_LOG))?,
            optimizer_debug: File::create(dir.join(OPTIMIZER_DEBUG_LOG))?,
            rules: File::create(dir.join(RULES_LOG))?,
        };

        Ok(Self {
            sinks: Mutex::new(sinks),
        })
    }

    fn write_record(sinks: &mut Sinks, record: &EventRecord) -> Result<(), AppError> {
        let target = match record {
            EventRecord::Status(row) => {
                sinks.status.serialize(row)?;
                sinks.status.flush()?;
                return Ok(());
            }
            EventRecord::Evaluation { .. } => &mut sinks.detailed,
            EventRecord::Trace { .. } => &mut sinks.trace,
            EventRecord::PromptHistory { .. } => &mut sinks.prompt_history,
            EventRecord::RuleEvolution { .. } => &mut sinks.rule_evolution,
            EventRecord::RefineParseFailure { .. } => &mut sinks.optimizer_debug,
        };

        let mut line = serde_json::to_string(&Stamped {
            at: Utc::now(),
            record,
        })?;
        line.push('\n');
        target.write_all(line.as_bytes())?;
        Ok(())
    }
}

// Appends are blocking writes under a std mutex, made from the runtime thread.
// Fine while one task logs at a time; move them onto `spawn_blocking` before
// evaluator workers log directly.
impl EventLog for FileEventLog {
    fn append_record(&self, record: &EventRecord) {
        let mut sinks = self.sinks.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = Self::write_record(&mut sinks, record) {
            warn!("Event log append failed: {e}");
        }
    }

    fn append_text(&self, title: &str, body: &str) {
        let mut sinks = self.sinks.lock().unwrap_or_else(|e| e.into_inner());
        let block = format!("\n{bar} {title} {bar}\n{body}\n", bar = "=".repeat(10));
        if let Err(e) = sinks.rules.write_all(block.as_bytes()) {
            warn!("Rules log append failed: {e}");
        }
    }
}
