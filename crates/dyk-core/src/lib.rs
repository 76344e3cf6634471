//! dyk-core - Core library for DYK insights
//!
//! This crate holds everything behind the `dyk` CLI:
//!
//! - **client**: Remote text-service client with rate limiting, retries and response repair
//! - **orchestrator**: Bounded concurrent execution with cancellation
//! - **validator**: Schema, source, numeric and quality checks
//! - **dedup**: Near-duplicate detection
//! - **scorer**: Structural engagement scoring
//! - **rewriter**: Creative variations of surviving insights
//! - **evaluator**: Model-graded evaluation of final insights
//! - **evidence**: PubMed search used to ground prompts
//! - **pipeline**: Run driver tying the stages together

pub mod client;
pub mod config;
pub mod dedup;
pub mod error;
pub mod evaluator;
pub mod evidence;
pub mod orchestrator;
pub mod pipeline;
pub mod prompt;
pub mod rate_limit;
pub mod rewriter;
pub mod scorer;
pub mod types;
pub mod validator;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use error::{CallError, Error, ParseError, Result, ServiceError};
pub use orchestrator::CancelToken;
pub use pipeline::{Pipeline, PipelineRun, QualityGate, RunStats};
pub use types::{Cohort, FinalInsight, InsightTemplate, RawInsight};
