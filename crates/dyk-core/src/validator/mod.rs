//! Multi-dimensional insight validation.
//!
//! Four independent checks each produce a 0-100 [`DimensionOutcome`]:
//!
//! | Dimension | Checks |
//! |-----------|--------|
//! | schema    | required fields, word limits |
//! | source    | source name, URL shape, allow-list, optional liveness probe |
//! | numeric   | percentages and multipliers within plausible bounds |
//! | quality   | lead-in phrase, actionable verb, denylisted wording |
//!
//! The aggregate is their mean; an insight is validated when the aggregate
//! reaches the configured threshold. Validation never errors: probe failures
//! and malformed fields are reported as issues or warnings.

pub mod content;
pub mod numeric;
pub mod schema;
pub mod source;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::ValidatorConfig;
use crate::error::{Error, Result};
use crate::orchestrator::{CancelToken, Outcome, TaskOrchestrator};
use crate::types::{DimensionOutcome, RawInsight, ValidationResult};

pub use content::{ContentCheck, WordList};
pub use source::ProbeOutcome;

/// Checks whether a source URL resolves.
#[async_trait]
pub trait UrlProbe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeOutcome;
}

/// HEAD-request probe over `reqwest`.
#[derive(Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UrlProbe for HttpProbe {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        match self.client.head(url).send().await {
            Ok(resp) => ProbeOutcome::Status(resp.status().as_u16()),
            Err(e) if e.is_timeout() => ProbeOutcome::Unreachable("timed out".into()),
            Err(e) => ProbeOutcome::Unreachable(e.to_string()),
        }
    }
}

/// Validator over a fixed configuration. Cheap to clone and safe to share.
#[derive(Clone)]
pub struct Validator {
    config: Arc<ValidatorConfig>,
    content: ContentCheck,
    probe: Option<Arc<dyn UrlProbe>>,
    probe_permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Result<Self> {
        let content = ContentCheck::new(&config)
            .map_err(|e| Error::Other(format!("invalid validator word list: {}", e)))?;
        let probe_permits = Arc::new(Semaphore::new(config.probe_concurrency.max(1)));
        Ok(Self {
            config: Arc::new(config),
            content,
            probe: None,
            probe_permits,
            max_concurrent: 50,
        })
    }

    /// Attach a liveness probe. Used only when `probe_urls` is enabled.
    pub fn with_probe(mut self, probe: Arc<dyn UrlProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Bound on concurrent validations in [`Validator::validate_all`].
    pub fn with_concurrency(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn content(&self) -> &ContentCheck {
        &self.content
    }

    async fn probe_source(&self, insight: &RawInsight) -> Option<ProbeOutcome> {
        if !self.config.probe_urls {
            return None;
        }
        let probe = self.probe.as_ref()?;
        let url = source::probe_target(insight, &self.config)?;
        let _permit = self.probe_permits.acquire().await.ok()?;
        let outcome = probe.probe(url.as_str()).await;
        debug!(url = %url, ?outcome, "probed source URL");
        Some(outcome)
    }

    /// Validate one insight.
    pub async fn validate(&self, insight: &RawInsight) -> ValidationResult {
        let probe = self.probe_source(insight).await;

        let schema = schema::check(insight, &self.config);
        let source = source::check(insight, &self.config, probe.as_ref());
        let numeric = numeric::check(insight, &self.config);
        let quality = self.content.check(insight, &self.config);

        let aggregate = f64::from(schema.score + source.score + numeric.score + quality.score) / 4.0;
        let validated = aggregate >= self.config.pass_threshold;

        debug!(
            insight_id = %insight.id,
            schema = schema.score,
            source = source.score,
            numeric = numeric.score,
            quality = quality.score,
            aggregate,
            validated,
            "validated insight"
        );

        ValidationResult {
            insight_id: insight.id.clone(),
            schema,
            source,
            numeric,
            quality,
            aggregate,
            validated,
        }
    }

    /// Validate a batch with bounded concurrency. Results are positional.
    pub async fn validate_all(&self, insights: &[RawInsight]) -> Vec<ValidationResult> {
        let orchestrator = TaskOrchestrator::new(self.max_concurrent);
        let outcomes = orchestrator
            .run_all(
                insights.iter().collect(),
                |insight| async move { Ok::<_, Infallible>(self.validate(insight).await) },
                &CancelToken::new(),
            )
            .await;

        outcomes
            .into_iter()
            .zip(insights)
            .map(|(outcome, insight)| match outcome {
                Outcome::Success(result) => result,
                Outcome::Failed(never) => match never {},
                Outcome::Panicked(message) => failed_result(insight, &format!("validation panicked: {message}")),
                Outcome::Cancelled => failed_result(insight, "validation cancelled"),
            })
            .collect()
    }
}

fn failed_result(insight: &RawInsight, reason: &str) -> ValidationResult {
    let failed = || DimensionOutcome::from_parts(0, vec![reason.to_string()], Vec::new());
    ValidationResult {
        insight_id: insight.id.clone(),
        schema: failed(),
        source: failed(),
        numeric: failed(),
        quality: failed(),
        aggregate: 0.0,
        validated: false,
    }
}
