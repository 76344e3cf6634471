//! Creative rewriting of surviving insights.
//!
//! Each insight is rephrased into a fixed number of variations that keep its
//! facts, source and origin. Variations are new [`RawInsight`]s linked back
//! through `variant_of`, so they pass through validation and deduplication
//! like any generated insight.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, info};

use crate::client::{CompletionRequest, TextServiceClient};
use crate::config::ValidatorConfig;
use crate::error::{CallError, ParseError};
use crate::orchestrator::{CancelToken, Outcome, OutcomeCounts, TaskOrchestrator};
use crate::prompt::{REWRITING_SYSTEM, rewriting_prompt};
use crate::types::{Cohort, ModelParams, RawInsight, Variation};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RewritePayload {
    Wrapped { variations: Vec<Variation> },
    Bare(Vec<Variation>),
}

impl RewritePayload {
    fn into_variations(self) -> Vec<Variation> {
        match self {
            Self::Wrapped { variations } | Self::Bare(variations) => variations,
        }
    }
}

#[derive(Clone)]
pub struct Rewriter {
    client: TextServiceClient,
    params: ModelParams,
    variations: usize,
    limits: ValidatorConfig,
    max_concurrent: usize,
    region: Option<String>,
}

impl Rewriter {
    pub fn new(client: TextServiceClient, params: ModelParams, variations: usize, limits: ValidatorConfig) -> Self {
        Self {
            client,
            params,
            variations: variations.max(1),
            limits,
            max_concurrent: 15,
            region: None,
        }
    }

    pub fn with_concurrency(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    /// Up to `variations` rewrites of one insight.
    pub async fn rewrite(&self, insight: &RawInsight, cohort: Option<&Cohort>) -> Result<Vec<RawInsight>, CallError> {
        let prompt = rewriting_prompt(insight, cohort, self.region.as_deref(), self.variations, &self.limits);
        let request = CompletionRequest::new(prompt, self.params.clone()).with_system(REWRITING_SYSTEM);
        let payload: RewritePayload = self.client.call(&request).await?;

        let mut variations = payload.into_variations();
        if variations.is_empty() {
            return Err(ParseError::no_content("response contained no variations").into());
        }
        variations.truncate(self.variations);

        debug!(insight_id = %insight.id, variations = variations.len(), "rewrote insight");
        Ok(variations
            .into_iter()
            .enumerate()
            .map(|(ordinal, variation)| insight.variant(variation, ordinal))
            .collect())
    }

    /// Rewrite a batch with bounded concurrency. Outcomes are positional.
    pub async fn rewrite_all(
        &self,
        insights: &[&RawInsight],
        cohorts: &HashMap<String, Cohort>,
        cancel: &CancelToken,
    ) -> Vec<Outcome<Vec<RawInsight>, CallError>> {
        let orchestrator = TaskOrchestrator::new(self.max_concurrent);
        let outcomes = orchestrator
            .run_all(
                insights.to_vec(),
                |insight| async move { self.rewrite(insight, cohorts.get(&insight.origin.cohort_id)).await },
                cancel,
            )
            .await;

        let counts = OutcomeCounts::from_outcomes(&outcomes);
        info!(
            rewritten = counts.succeeded,
            failed = counts.failed + counts.panicked,
            cancelled = counts.cancelled,
            "rewriting complete"
        );
        outcomes
    }
}
