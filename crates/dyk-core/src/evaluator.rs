//! Model-graded evaluation of final insights.
//!
//! Runs on its own [`TextServiceClient`] so it never competes with
//! generation for rate budget. Evaluations are attached to final insights
//! as a sibling record; they never filter.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::client::{CompletionRequest, TextServiceClient};
use crate::error::CallError;
use crate::orchestrator::{CancelToken, Outcome, OutcomeCounts, TaskOrchestrator};
use crate::prompt::{EVALUATION_SYSTEM, evaluation_prompt};
use crate::types::{Cohort, Evaluation, ModelParams, RawInsight};

#[derive(Clone)]
pub struct Evaluator {
    client: TextServiceClient,
    params: ModelParams,
    max_concurrent: usize,
    region: Option<String>,
}

impl Evaluator {
    pub fn new(client: TextServiceClient, params: ModelParams) -> Self {
        Self {
            client,
            params,
            max_concurrent: 10,
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

    /// Grade one insight.
    pub async fn evaluate(&self, insight: &RawInsight, cohort: Option<&Cohort>) -> Result<Evaluation, CallError> {
        let prompt = evaluation_prompt(insight, cohort, self.region.as_deref());
        let request = CompletionRequest::new(prompt, self.params.clone()).with_system(EVALUATION_SYSTEM);
        let evaluation: Evaluation = self.client.call(&request).await?;
        let evaluation = clamp_scores(evaluation);
        debug!(
            insight_id = %insight.id,
            overall = evaluation.overall_score,
            pass = evaluation.pass,
            "evaluated insight"
        );
        Ok(evaluation)
    }

    /// Grade a batch with bounded concurrency. Outcomes are positional.
    pub async fn evaluate_all(
        &self,
        insights: &[&RawInsight],
        cohorts: &HashMap<String, Cohort>,
        cancel: &CancelToken,
    ) -> Vec<Outcome<Evaluation, CallError>> {
        let orchestrator = TaskOrchestrator::new(self.max_concurrent);
        let outcomes = orchestrator
            .run_all(
                insights.to_vec(),
                |insight| async move { self.evaluate(insight, cohorts.get(&insight.origin.cohort_id)).await },
                cancel,
            )
            .await;

        let counts = OutcomeCounts::from_outcomes(&outcomes);
        info!(
            evaluated = counts.succeeded,
            failed = counts.failed + counts.panicked,
            cancelled = counts.cancelled,
            "evaluation complete"
        );
        outcomes
    }
}

fn clamp_scores(mut evaluation: Evaluation) -> Evaluation {
    evaluation.overall_score = evaluation.overall_score.clamp(0.0, 100.0);
    for criterion in evaluation.criteria.values_mut() {
        criterion.score = criterion.score.clamp(0.0, 100.0);
    }
    evaluation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fakes::{FnService, Reply, ScriptedService, fast_config};
    use crate::error::ServiceError;
    use crate::validator::tests::insight;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    const GRADED: &str = r#"```json
{
  "criteria": {
    "factual_accuracy": {"score": 92, "reasoning": "matches CDC data"},
    "safety": {"score": 140, "reasoning": "fine"},
  },
  "overall_score": 88,
  "pass": true,
  "strengths": ["clear action"]
}
```"#;

    fn evaluator(service: Arc<dyn crate::client::TextService>) -> Evaluator {
        let client = TextServiceClient::new(service, &fast_config());
        Evaluator::new(client, ModelParams::default()).with_concurrency(2)
    }

    #[tokio::test(start_paused = true)]
    async fn test_evaluate_parses_and_clamps() {
        let service = Arc::new(ScriptedService::new(vec![Reply::Text(GRADED.into())]));
        let evaluation = assert_ok!(evaluator(service).evaluate(&insight(), None).await);

        assert_eq!(evaluation.overall_score, 88.0);
        assert!(evaluation.pass);
        assert_eq!(evaluation.criteria["factual_accuracy"].score, 92.0);
        assert_eq!(evaluation.criteria["safety"].score, 100.0);
        assert_eq!(evaluation.strengths, vec!["clear action".to_string()]);
        assert!(evaluation.critical_issues.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_evaluate_failure_is_typed() {
        let service = Arc::new(ScriptedService::new(vec![Reply::Error(ServiceError::status(400, "bad"))]));
        let err = assert_err!(evaluator(service).evaluate(&insight(), None).await);
        assert_eq!(err.category(), "rejected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_evaluate_all_is_positional() {
        let service = Arc::new(FnService::new(|request: &CompletionRequest| {
            if request.prompt.contains("Hook: broken") {
                Ok("no json here".to_string())
            } else {
                Ok(r#"{"overall_score": 70, "pass": true}"#.to_string())
            }
        }));
        let good = insight();
        let bad = RawInsight {
            hook: "broken".into(),
            ..insight()
        };
        let outcomes = evaluator(service)
            .evaluate_all(&[&good, &bad, &good], &HashMap::new(), &CancelToken::new())
            .await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_success());
        assert!(matches!(outcomes[1], Outcome::Failed(CallError::Parse(_))));
        assert!(outcomes[2].is_success());
    }
}
