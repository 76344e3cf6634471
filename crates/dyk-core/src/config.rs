//! Pipeline Configuration
//!
//! Defines the tunable knobs of a run. Every struct has a `Default` matching
//! production values so a partial config file only needs the overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::ModelParams;

/// Top-level pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Client used to generate insights
    pub generation: ClientConfig,

    /// Client used for the optional evaluation pass
    pub evaluation: ClientConfig,

    /// Client used for the optional rewriting pass
    pub rewriting: ClientConfig,

    /// Worker pool limits and batch deadline
    pub orchestrator: OrchestratorConfig,

    /// Validation rules and penalties
    pub validator: ValidatorConfig,

    /// Near-duplicate detection
    pub dedup: DedupConfig,

    /// Engagement scoring and final filter
    pub scoring: ScoringConfig,

    /// Literature search used to ground prompts
    pub evidence: EvidenceConfig,

    /// Insights requested per generation unit (default: 3)
    pub insights_per_unit: usize,

    /// Run the evaluator over final insights (default: false)
    pub evaluate: bool,

    /// Rewrite surviving insights into variations (default: false)
    pub rewrite: bool,

    /// Variations requested per rewritten insight (default: 3)
    pub variations_per_insight: usize,

    /// Region the insights are localized for, e.g. "Singapore"
    pub region: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            generation: ClientConfig::default(),
            evaluation: ClientConfig {
                params: ModelParams {
                    temperature: 0.2,
                    max_tokens: 2000,
                    ..ModelParams::default()
                },
                ..ClientConfig::default()
            },
            rewriting: ClientConfig {
                params: ModelParams {
                    temperature: 0.8,
                    max_tokens: 4000,
                    ..ModelParams::default()
                },
                ..ClientConfig::default()
            },
            orchestrator: OrchestratorConfig::default(),
            validator: ValidatorConfig::default(),
            dedup: DedupConfig::default(),
            scoring: ScoringConfig::default(),
            evidence: EvidenceConfig::default(),
            insights_per_unit: 3,
            evaluate: false,
            rewrite: false,
            variations_per_insight: 3,
            region: None,
        }
    }
}

/// Configuration for one remote text-service client instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,

    /// Per-call timeout in seconds (default: 60)
    pub timeout_secs: u64,

    pub params: ModelParams,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            timeout_secs: 60,
            params: ModelParams::default(),
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Default: 10
    pub requests_per_second: u32,
    /// Default: 60
    pub requests_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            requests_per_minute: 60,
        }
    }
}

/// Retry policy for transient remote failures
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first (default: 3)
    pub max_attempts: u32,
    /// Backoff before the first retry, doubled each attempt (default: 1000)
    pub base_delay_ms: u64,
    /// Upper bound on a single backoff (default: 30000)
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (0-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Generation units in flight at once (default: 10)
    pub max_concurrent: usize,

    /// Validations in flight at once (default: 50)
    pub max_concurrent_validations: usize,

    /// Evaluations in flight at once (default: 10)
    pub max_concurrent_evaluations: usize,

    /// Rewrites in flight at once (default: 15)
    pub max_concurrent_rewrites: usize,

    /// Batch deadline in seconds; admission stops once it passes
    pub deadline_secs: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_concurrent_validations: 50,
            max_concurrent_evaluations: 10,
            max_concurrent_rewrites: 15,
            deadline_secs: None,
        }
    }
}

/// Score deductions applied by the validator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Penalties {
    pub missing_field: i64,
    pub hook_too_long: i64,
    pub explanation_out_of_range: i64,
    pub explanation_below_optimal: i64,
    pub action_too_long: i64,
    pub missing_source_name: i64,
    pub invalid_source_url: i64,
    pub generic_source: i64,
    pub domain_not_allowed: i64,
    pub unreachable_source: i64,
    pub implausible_percent: i64,
    pub implausible_multiplier: i64,
}

impl Default for Penalties {
    fn default() -> Self {
        Self {
            missing_field: 20,
            hook_too_long: 15,
            explanation_out_of_range: 15,
            explanation_below_optimal: 5,
            action_too_long: 10,
            missing_source_name: 20,
            invalid_source_url: 60,
            generic_source: 30,
            domain_not_allowed: 20,
            unreachable_source: 30,
            implausible_percent: 40,
            implausible_multiplier: 40,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Fields that must be present and non-empty
    pub required_fields: Vec<String>,

    pub hook_max_words: usize,
    pub explanation_min_words: usize,
    pub explanation_max_words: usize,
    pub explanation_optimal_min_words: usize,
    pub explanation_optimal_max_words: usize,
    pub action_min_words: usize,
    pub action_max_words: usize,

    /// Largest plausible percentage (default: 100)
    pub max_percent: f64,
    /// Largest plausible multiplier (default: 20)
    pub max_multiplier: f64,

    /// Accepted hook openings, matched case-insensitively
    pub lead_in_phrases: Vec<String>,
    pub actionable_verbs: Vec<String>,
    /// Terms that must not appear (whole word, case-insensitive)
    pub denylist: Vec<String>,

    /// Source citation used when no specific source exists
    pub generic_source_sentinel: String,
    /// Hosts whose sources are trusted; empty disables the check
    pub allowed_domains: Vec<String>,

    /// Issue a HEAD request against each source URL (default: false)
    pub probe_urls: bool,
    pub probe_timeout_secs: u64,
    pub probe_concurrency: usize,

    /// Aggregate score needed to be validated (default: 60)
    pub pass_threshold: f64,

    pub penalties: Penalties,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            required_fields: ["hook", "explanation", "action", "source_name", "source_url"]
                .into_iter()
                .map(String::from)
                .collect(),
            hook_max_words: 20,
            explanation_min_words: 30,
            explanation_max_words: 60,
            explanation_optimal_min_words: 40,
            explanation_optimal_max_words: 60,
            action_min_words: 5,
            action_max_words: 30,
            max_percent: 100.0,
            max_multiplier: 20.0,
            lead_in_phrases: vec!["Did you know".into()],
            actionable_verbs: [
                "ask", "talk", "speak", "schedule", "book", "start", "try", "add", "swap",
                "replace", "walk", "eat", "drink", "limit", "reduce", "avoid", "check", "get",
                "take", "set", "track", "choose", "aim", "plan", "visit", "join", "practice",
                "stretch", "sleep", "call",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            denylist: ["cure", "cures", "guaranteed", "miracle", "instantly", "detox"]
                .into_iter()
                .map(String::from)
                .collect(),
            generic_source_sentinel: "general medical knowledge".into(),
            allowed_domains: Vec::new(),
            probe_urls: false,
            probe_timeout_secs: 5,
            probe_concurrency: 10,
            pass_threshold: 60.0,
            penalties: Penalties::default(),
        }
    }
}

impl ValidatorConfig {
    pub fn with_allowed_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_probe(mut self, enabled: bool) -> Self {
        self.probe_urls = enabled;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DedupConfig {
    /// Similarity ratio at or above which a later insight is a duplicate
    /// (default: 0.85)
    pub threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { threshold: 0.85 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    /// Minimum engagement score for a final insight (default: 50)
    pub min_quality_score: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_quality_score: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    /// Search for supporting articles before generation (default: false)
    pub enabled: bool,
    pub base_url: String,
    pub max_results: usize,
    /// Contact email sent to the search service
    pub email: Option<String>,
    pub api_key: Option<String>,
    pub rate_limit: RateLimitConfig,
    pub timeout_secs: u64,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".into(),
            max_results: 5,
            email: None,
            api_key: None,
            // Unauthenticated E-utilities allow 3 requests per second
            rate_limit: RateLimitConfig {
                requests_per_second: 3,
                requests_per_minute: 180,
            },
            timeout_secs: 30,
        }
    }
}

impl PipelineConfig {
    /// Set the generation client configuration
    pub fn with_generation(mut self, generation: ClientConfig) -> Self {
        self.generation = generation;
        self
    }

    /// Set the evaluation client configuration
    pub fn with_evaluation(mut self, evaluation: ClientConfig) -> Self {
        self.evaluation = evaluation;
        self
    }

    /// Set the validator configuration
    pub fn with_validator(mut self, validator: ValidatorConfig) -> Self {
        self.validator = validator;
        self
    }

    /// Set the orchestrator configuration
    pub fn with_orchestrator(mut self, orchestrator: OrchestratorConfig) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    /// Enable or disable the evaluation pass
    pub fn with_evaluate(mut self, evaluate: bool) -> Self {
        self.evaluate = evaluate;
        self
    }

    /// Set the rewriting client configuration
    pub fn with_rewriting(mut self, rewriting: ClientConfig) -> Self {
        self.rewriting = rewriting;
        self
    }

    /// Enable rewriting with `variations` per surviving insight
    pub fn with_rewrite(mut self, variations: usize) -> Self {
        self.rewrite = true;
        self.variations_per_insight = variations;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        for (name, client) in [
            ("generation", &self.generation),
            ("evaluation", &self.evaluation),
            ("rewriting", &self.rewriting),
        ] {
            if client.rate_limit.requests_per_second == 0 || client.rate_limit.requests_per_minute == 0 {
                return Err(ConfigValidationError::invalid(
                    format!("{name}.rate_limit"),
                    "rates must be greater than 0",
                ));
            }
            if client.retry.max_attempts == 0 {
                return Err(ConfigValidationError::invalid(
                    format!("{name}.retry.max_attempts"),
                    "must be at least 1",
                ));
            }
            if client.timeout_secs == 0 {
                return Err(ConfigValidationError::invalid(
                    format!("{name}.timeout_secs"),
                    "must be greater than 0",
                ));
            }
            if client.params.model.trim().is_empty() {
                return Err(ConfigValidationError::invalid(
                    format!("{name}.params.model"),
                    "must not be empty",
                ));
            }
        }

        if self.orchestrator.max_concurrent == 0
            || self.orchestrator.max_concurrent_validations == 0
            || self.orchestrator.max_concurrent_evaluations == 0
            || self.orchestrator.max_concurrent_rewrites == 0
        {
            return Err(ConfigValidationError::invalid(
                "orchestrator",
                "concurrency limits must be greater than 0",
            ));
        }

        let v = &self.validator;
        if v.explanation_min_words > v.explanation_max_words {
            return Err(ConfigValidationError::invalid(
                "validator.explanation_min_words",
                "must not exceed explanation_max_words",
            ));
        }
        if v.action_min_words > v.action_max_words {
            return Err(ConfigValidationError::invalid(
                "validator.action_min_words",
                "must not exceed action_max_words",
            ));
        }
        if !(0.0..=100.0).contains(&v.pass_threshold) {
            return Err(ConfigValidationError::invalid(
                "validator.pass_threshold",
                "must be between 0 and 100",
            ));
        }
        if v.probe_urls && v.probe_concurrency == 0 {
            return Err(ConfigValidationError::invalid(
                "validator.probe_concurrency",
                "must be greater than 0 when probing",
            ));
        }

        if !(0.0..=1.0).contains(&self.dedup.threshold) {
            return Err(ConfigValidationError::invalid(
                "dedup.threshold",
                "must be between 0 and 1",
            ));
        }

        if self.scoring.min_quality_score > 100 {
            return Err(ConfigValidationError::invalid(
                "scoring.min_quality_score",
                "must be at most 100",
            ));
        }

        if self.insights_per_unit == 0 {
            return Err(ConfigValidationError::invalid(
                "insights_per_unit",
                "must be greater than 0",
            ));
        }

        if self.rewrite && self.variations_per_insight == 0 {
            return Err(ConfigValidationError::invalid(
                "variations_per_insight",
                "must be greater than 0 when rewriting",
            ));
        }

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigValidationError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}
