mod config;
mod dataset;
mod engine;
mod errors;
mod event_log;
mod llm_client;
mod templates;
mod validation;

#[cfg(test)]
mod testing;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::Config;
use crate::dataset::{load_dataset, load_prompts};
use crate::engine::benchmark::score_prompts;
use crate::engine::evaluator::Evaluator;
use crate::engine::Orchestrator;
use crate::event_log::FileEventLog;
use crate::llm_client::{build_provider, RetryPolicy};
use crate::templates::TemplateStore;
use crate::validation::TaskAwareValidator;

const CONFIG_SNAPSHOT: &str = "experiment_config.json";
const OPTIMIZED_PROMPTS: &str = "optimized_prompts.txt";
const FINAL_RULE: &str = "final_rule.txt";
const EVALUATION_REPORT: &str = "evaluation_report.json";

#[derive(Debug, Parser)]
#[command(name = "bake", version, about = "Learns a reusable prompt-writing rule from a labeled dataset")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Refine prompts over a dataset and distill a final rule.
    Run(RunArgs),
    /// Score a fixed prompt pool over a dataset.
    Evaluate(EvaluateArgs),
}

#[derive(Debug, Args)]
struct DataArgs {
    /// JSONL dataset, one item per line.
    #[arg(long)]
    dataset: PathBuf,
    /// Initial prompts, one per line.
    #[arg(long)]
    prompts: PathBuf,
    #[arg(long)]
    output_dir: PathBuf,
    /// Items to use; 0 means all.
    #[arg(long, default_value_t = 0)]
    limit: usize,
    #[arg(long, default_value_t = 0)]
    offset: usize,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    data: DataArgs,
    /// Regenerate the prompt pool after every Tier-1 merge.
    #[arg(long)]
    iterative: bool,
    #[arg(long)]
    iterative_count: Option<usize>,
    #[arg(long)]
    group_size: Option<usize>,
    #[arg(long)]
    concurrency: Option<usize>,
    #[arg(long)]
    scorer_model: Option<String>,
    #[arg(long)]
    optimizer_model: Option<String>,
    /// Directory of `<template>.txt` overrides.
    #[arg(long)]
    template_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct EvaluateArgs {
    #[command(flatten)]
    data: DataArgs,
    #[arg(long)]
    concurrency: Option<usize>,
    #[arg(long)]
    scorer_model: Option<String>,
}

/// Written next to the run outputs so the run can be reproduced.
#[derive(Serialize)]
struct ConfigSnapshot<'a> {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    command: &'static str,
    dataset: &'a Path,
    prompts: &'a Path,
    offset: usize,
    limit: usize,
    config: &'a Config,
}

#[derive(Serialize)]
struct EvaluationReport<'a> {
    run_id: Uuid,
    items: usize,
    scores: &'a [engine::benchmark::PromptScore],
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (fails on malformed env vars)
    let mut config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting bake v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run(args) => run(&mut config, args).await,
        Command::Evaluate(args) => evaluate(&mut config, args).await,
    }
}

async fn run(config: &mut Config, args: RunArgs) -> Result<()> {
    if args.iterative {
        config.engine.iterative = true;
    }
    if let Some(count) = args.iterative_count {
        config.engine.iterative_prompt_count = count;
    }
    if let Some(size) = args.group_size {
        config.engine.group_size = size;
    }
    if let Some(concurrency) = args.concurrency {
        config.engine.concurrency = concurrency;
    }
    if let Some(model) = args.scorer_model {
        config.scorer.model = Some(model);
    }
    if let Some(model) = args.optimizer_model {
        config.optimizer.model = Some(model);
    }
    if let Some(dir) = args.template_dir {
        config.template_dir = Some(dir);
    }
    config.engine.validate()?;

    let data = &args.data;
    let run_id = write_snapshot(config, data, "run")?;

    let dataset = load_dataset(&data.dataset, data.offset, data.limit)?;
    let prompts = load_prompts(&data.prompts)?;
    info!(
        "Run {run_id}: {} item(s) from {}, {} initial prompt(s)",
        dataset.len(),
        data.dataset.display(),
        prompts.len()
    );

    let mut templates = TemplateStore::with_defaults();
    if let Some(dir) = &config.template_dir {
        templates
            .load_overrides(dir)
            .with_context(|| format!("Failed to read templates from {}", dir.display()))?;
    }

    let scorer = build_provider(&config.scorer).context("Failed to build scorer client")?;
    let optimizer =
        build_provider(&config.optimizer).context("Failed to build optimizer client")?;
    info!(
        "Scorer: {} ({}), optimizer: {} ({})",
        scorer.name(),
        scorer.model(),
        optimizer.name(),
        optimizer.model()
    );

    let event_log = Arc::new(FileEventLog::create(&data.output_dir)?);
    let orchestrator = Orchestrator::new(
        scorer,
        optimizer,
        Arc::new(TaskAwareValidator),
        Arc::new(templates),
        event_log,
        config.engine.clone(),
    );

    let outcome = orchestrator.run(&dataset, prompts).await;

    let mut prompts_file = outcome.final_prompts.join("\n");
    if !prompts_file.is_empty() {
        prompts_file.push('\n');
    }
    std::fs::write(data.output_dir.join(OPTIMIZED_PROMPTS), prompts_file)?;
    std::fs::write(data.output_dir.join(FINAL_RULE), &outcome.final_rule)?;

    info!(
        "Wrote {} prompt(s) to {}",
        outcome.final_prompts.len(),
        data.output_dir.join(OPTIMIZED_PROMPTS).display()
    );
    info!("Summary: {}", serde_json::to_string(&outcome.summary)?);
    Ok(())
}

async fn evaluate(config: &mut Config, args: EvaluateArgs) -> Result<()> {
    if let Some(concurrency) = args.concurrency {
        config.engine.concurrency = concurrency;
    }
    if let Some(model) = args.scorer_model {
        config.scorer.model = Some(model);
    }
    config.engine.validate()?;

    let data = &args.data;
    let run_id = write_snapshot(config, data, "evaluate")?;

    let dataset = load_dataset(&data.dataset, data.offset, data.limit)?;
    let prompts = load_prompts(&data.prompts)?;
    let scorer = build_provider(&config.scorer).context("Failed to build scorer client")?;
    info!(
        "Evaluating {} prompt(s) on {} item(s) with {} ({})",
        prompts.len(),
        dataset.len(),
        scorer.name(),
        scorer.model()
    );

    let retry = RetryPolicy::constant(config.engine.max_retries, config.engine.retry_delay)
        .with_timeout(config.engine.call_timeout);
    let evaluator = Evaluator::new(
        scorer,
        Arc::new(TaskAwareValidator),
        retry,
        config.engine.concurrency,
    );
    let scores = score_prompts(&evaluator, &dataset, &prompts).await;

    for score in &scores {
        info!(
            "{:>6.1}%  ({} correct, {} wrong, {} indeterminate)  {}",
            score.accuracy * 100.0,
            score.correct,
            score.wrong,
            score.indeterminate,
            score.prompt
        );
    }

    let report = EvaluationReport {
        run_id,
        items: dataset.len(),
        scores: &scores,
    };
    let path = data.output_dir.join(EVALUATION_REPORT);
    std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
    info!("Wrote {}", path.display());
    Ok(())
}

/// Creates the output directory and records the effective configuration.
fn write_snapshot(config: &Config, data: &DataArgs, command: &'static str) -> Result<Uuid> {
    std::fs::create_dir_all(&data.output_dir).with_context(|| {
        format!("Failed to create output dir {}", data.output_dir.display())
    })?;

    let run_id = Uuid::new_v4();
    let snapshot = ConfigSnapshot {
        run_id,
        started_at: Utc::now(),
        command,
        dataset: &data.dataset,
        prompts: &data.prompts,
        offset: data.offset,
        limit: data.limit,
        config,
    };
    std::fs::write(
        data.output_dir.join(CONFIG_SNAPSHOT),
        serde_json::to_string_pretty(&snapshot)?,
    )?;
    Ok(run_id)
}
