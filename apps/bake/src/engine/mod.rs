//! Refinement engine: evaluation, optimizer steps, rule accumulation and the
//! orchestrator that sequences them.

pub mod benchmark;
pub mod evaluator;
pub mod optimizer;
pub mod orchestrator;
pub mod parsing;
pub mod prompts;
pub mod refiner;
pub mod rule_tree;
pub mod rules;
pub mod synthesis;

pub use orchestrator::Orchestrator;
