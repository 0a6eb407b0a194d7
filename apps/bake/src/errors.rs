use thiserror::Error;

/// Application-level error type.
///
/// Only setup and output failures surface here. Nothing that happens while the
/// engine walks the dataset is fatal: provider, parse and template failures are
/// degraded inside the step that hit them and logged.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Prompt file error: {0}")]
    Prompts(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
