//! Pipeline driver.
//!
//! Sequences one run: generation over every unit through the
//! [`TaskOrchestrator`], then the [`QualityGate`] (validation, deduplication,
//! scoring, final filter), then optional rewriting and evaluation of the
//! survivors. Rewritten variants are validated and passed through the gate
//! again alongside the originals. Every intermediate collection is kept in
//! the returned [`PipelineRun`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::{CompletionRequest, TextService, TextServiceClient};
use crate::config::PipelineConfig;
use crate::dedup::{DedupAnalytics, Deduplicator};
use crate::error::{CallError, ParseError, Result};
use crate::evaluator::Evaluator;
use crate::evidence::{EvidenceRetriever, EvidenceService};
use crate::orchestrator::{CancelToken, Outcome, TaskOrchestrator};
use crate::prompt::{GENERATION_SYSTEM, generation_prompt};
use crate::rewriter::Rewriter;
use crate::scorer::QualityScorer;
use crate::types::{
    Cohort, DuplicateMarking, FinalInsight, GenerationUnit, InsightDraft, InsightTemplate, ModelParams,
    QualityScore, RawInsight, UnitRef, ValidationResult,
};
use crate::validator::{UrlProbe, Validator};

/// Generation responses arrive either wrapped or as a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GenerationPayload {
    Wrapped { insights: Vec<InsightDraft> },
    Bare(Vec<InsightDraft>),
}

impl GenerationPayload {
    fn into_drafts(self) -> Vec<InsightDraft> {
        match self {
            Self::Wrapped { insights } | Self::Bare(insights) => insights,
        }
    }
}

/// Cross cohorts (most important first) with templates.
pub fn build_units(
    cohorts: &[Cohort],
    templates: &[InsightTemplate],
    count: usize,
    params: &ModelParams,
) -> Vec<GenerationUnit> {
    let mut ordered: Vec<&Cohort> = cohorts.iter().collect();
    ordered.sort_by_key(|c| c.priority);

    ordered
        .into_iter()
        .flat_map(|cohort| templates.iter().map(move |template| (cohort, template)))
        .enumerate()
        .map(|(index, (cohort, template))| GenerationUnit {
            index,
            cohort: cohort.clone(),
            template: template.clone(),
            count,
            params: params.clone(),
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Run records
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Succeeded,
    Failed,
    Panicked,
    Cancelled,
}

/// What happened to one generation unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitReport {
    pub unit: UnitRef,
    pub status: UnitStatus,
    /// Failure category, see [`CallError::category`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub insights: usize,
    pub evidence: usize,
}

/// Wall-clock time per stage, in milliseconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageTimings {
    pub generation_ms: u64,
    pub validation_ms: u64,
    pub dedup_ms: u64,
    pub scoring_ms: u64,
    pub rewriting_ms: u64,
    pub evaluation_ms: u64,
    pub total_ms: u64,
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub units_total: usize,
    pub units_succeeded: usize,
    pub units_failed: usize,
    /// Unit failures by category, including `panicked` and `cancelled`
    pub failures: BTreeMap<String, usize>,
    pub insights_generated: usize,
    pub insights_validated: usize,
    pub duplicates_removed: usize,
    pub final_count: usize,
    pub rewrites_succeeded: usize,
    pub rewrites_failed: usize,
    /// Variants produced by rewriting, before validation and dedup
    pub variants_created: usize,
    pub evaluations_succeeded: usize,
    pub evaluations_failed: usize,
    pub dedup: DedupAnalytics,
    pub timings: StageTimings,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub units: Vec<UnitReport>,
    /// Generated insights followed by any rewritten variants
    pub raw: Vec<RawInsight>,
    pub validations: Vec<ValidationResult>,
    pub duplicates: Vec<DuplicateMarking>,
    pub scores: Vec<QualityScore>,
    pub final_insights: Vec<FinalInsight>,
    pub stats: RunStats,
}

// ─────────────────────────────────────────────────────────────────────────────
// Quality gate
// ─────────────────────────────────────────────────────────────────────────────

/// Output of the quality gate over one batch. Collections are positional
/// with the input batch except `final_insights`.
#[derive(Debug, Clone)]
pub struct GateReport {
    pub validations: Vec<ValidationResult>,
    pub duplicates: Vec<DuplicateMarking>,
    pub dedup: DedupAnalytics,
    pub scores: Vec<QualityScore>,
    pub final_insights: Vec<FinalInsight>,
    pub timings: StageTimings,
}

/// Validation, deduplication, scoring and the final filter, with no
/// remote calls other than optional URL probes.
#[derive(Clone)]
pub struct QualityGate {
    validator: Validator,
    dedup: Deduplicator,
    scorer: QualityScorer,
    min_quality_score: u32,
}

impl QualityGate {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let validator = Validator::new(config.validator.clone())?
            .with_concurrency(config.orchestrator.max_concurrent_validations);
        Ok(Self {
            validator,
            dedup: Deduplicator::new(config.dedup.threshold),
            scorer: QualityScorer::new(config.validator.clone())?,
            min_quality_score: config.scoring.min_quality_score,
        })
    }

    pub fn with_probe(mut self, probe: Arc<dyn UrlProbe>) -> Self {
        self.validator = self.validator.with_probe(probe);
        self
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Run every stage over `raw`, which must be in priority order.
    pub async fn apply(&self, raw: &[RawInsight], cohorts: &HashMap<String, Cohort>) -> GateReport {
        let started = Instant::now();
        let validations = self.validator.validate_all(raw).await;
        let validation_ms = millis(started.elapsed());

        let mut report = self.finish(raw, validations, cohorts);
        report.timings.validation_ms = validation_ms;
        report
    }

    /// Deduplication, scoring and the final filter over `raw` with
    /// `validations` already computed. Both must be positional.
    pub fn finish(
        &self,
        raw: &[RawInsight],
        validations: Vec<ValidationResult>,
        cohorts: &HashMap<String, Cohort>,
    ) -> GateReport {
        let mut timings = StageTimings::default();

        let started = Instant::now();
        let report = self.dedup.analyze(raw);
        timings.dedup_ms = millis(started.elapsed());

        let started = Instant::now();
        let scores: Vec<QualityScore> = raw
            .iter()
            .map(|insight| self.scorer.score(insight, cohorts.get(&insight.origin.cohort_id)))
            .collect();
        timings.scoring_ms = millis(started.elapsed());

        let final_insights: Vec<FinalInsight> = raw
            .iter()
            .zip(&validations)
            .zip(&report.markings)
            .zip(&scores)
            .filter(|(((_, validation), marking), score)| {
                validation.validated && !marking.is_duplicate && score.total >= self.min_quality_score
            })
            .map(|(((insight, validation), marking), score)| FinalInsight {
                insight: insight.clone(),
                validation: validation.clone(),
                duplicate: marking.clone(),
                quality: *score,
                evaluation: None,
            })
            .collect();

        info!(
            insights = raw.len(),
            validated = validations.iter().filter(|v| v.validated).count(),
            duplicates = report.analytics.marked_duplicates,
            kept = final_insights.len(),
            "quality gate complete"
        );

        GateReport {
            validations,
            duplicates: report.markings,
            dedup: report.analytics,
            scores,
            final_insights,
            timings,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Insights and evidence from one successful unit.
#[derive(Debug, Clone)]
pub struct UnitYield {
    pub insights: Vec<RawInsight>,
    pub evidence: usize,
}

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    generator: TextServiceClient,
    orchestrator: TaskOrchestrator,
    gate: QualityGate,
    rewriter: Option<Rewriter>,
    evaluator: Option<Evaluator>,
    evidence: Option<EvidenceRetriever>,
}

impl Pipeline {
    /// Validates `config` and builds the generation client over `service`.
    pub fn new(config: PipelineConfig, service: Arc<dyn TextService>) -> Result<Self> {
        config.validate()?;
        let generator = TextServiceClient::new(service, &config.generation);
        let orchestrator = TaskOrchestrator::new(config.orchestrator.max_concurrent);
        let gate = QualityGate::new(&config)?;
        Ok(Self {
            config: Arc::new(config),
            generator,
            orchestrator,
            gate,
            rewriter: None,
            evaluator: None,
            evidence: None,
        })
    }

    /// Backend for the evaluation pass. Used only when `evaluate` is set.
    pub fn with_evaluation(mut self, service: Arc<dyn TextService>) -> Self {
        let client = TextServiceClient::new(service, &self.config.evaluation);
        let evaluator = Evaluator::new(client, self.config.evaluation.params.clone())
            .with_concurrency(self.config.orchestrator.max_concurrent_evaluations)
            .with_region(self.config.region.clone());
        self.evaluator = Some(evaluator);
        self
    }

    /// Backend for the rewriting pass. Used only when `rewrite` is set.
    pub fn with_rewriting(mut self, service: Arc<dyn TextService>) -> Self {
        let client = TextServiceClient::new(service, &self.config.rewriting);
        let rewriter = Rewriter::new(
            client,
            self.config.rewriting.params.clone(),
            self.config.variations_per_insight,
            self.config.validator.clone(),
        )
        .with_concurrency(self.config.orchestrator.max_concurrent_rewrites)
        .with_region(self.config.region.clone());
        self.rewriter = Some(rewriter);
        self
    }

    pub fn with_evidence(mut self, service: Arc<dyn EvidenceService>) -> Self {
        self.evidence = Some(EvidenceRetriever::new(service, self.config.evidence.max_results));
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn UrlProbe>) -> Self {
        self.gate = self.gate.with_probe(probe);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Units for `cohorts` × `templates` using the configured count and
    /// generation parameters.
    pub fn build_units(&self, cohorts: &[Cohort], templates: &[InsightTemplate]) -> Vec<GenerationUnit> {
        build_units(
            cohorts,
            templates,
            self.config.insights_per_unit,
            &self.config.generation.params,
        )
    }

    /// One logical generation call for a unit, retries included.
    pub async fn generate_unit(&self, unit: &GenerationUnit) -> std::result::Result<UnitYield, CallError> {
        let evidence = match &self.evidence {
            Some(retriever) => retriever.retrieve(unit).await,
            None => Vec::new(),
        };

        let prompt = generation_prompt(unit, &evidence, &self.config.validator);
        let request = CompletionRequest::new(prompt, unit.params.clone()).with_system(GENERATION_SYSTEM);
        let payload: GenerationPayload = self.generator.call(&request).await?;

        let mut drafts = payload.into_drafts();
        if drafts.is_empty() {
            return Err(ParseError::no_content("response contained no insights").into());
        }
        drafts.truncate(unit.count);

        let origin = unit.unit_ref();
        let insights = drafts
            .into_iter()
            .enumerate()
            .map(|(ordinal, draft)| RawInsight::from_draft(draft, origin.clone(), ordinal))
            .collect();
        Ok(UnitYield {
            insights,
            evidence: evidence.len(),
        })
    }

    /// Execute a full run over `units`.
    pub async fn run(&self, units: Vec<GenerationUnit>, cancel: &CancelToken) -> PipelineRun {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let run_started = Instant::now();
        let mut stats = RunStats {
            units_total: units.len(),
            ..RunStats::default()
        };

        info!(%run_id, units = units.len(), max_concurrent = self.orchestrator.max_concurrent(), "starting run");

        let cohorts: HashMap<String, Cohort> = units
            .iter()
            .map(|u| (u.cohort.id.clone(), u.cohort.clone()))
            .collect();

        // Generation
        let started = Instant::now();
        let outcomes = self
            .orchestrator
            .run_all(units.iter().collect(), |unit| self.generate_unit(unit), cancel)
            .await;
        stats.timings.generation_ms = millis(started.elapsed());

        let mut reports = Vec::with_capacity(units.len());
        let mut raw = Vec::new();
        for (unit, outcome) in units.iter().zip(outcomes) {
            let mut report = UnitReport {
                unit: unit.unit_ref(),
                status: UnitStatus::Succeeded,
                category: None,
                error: None,
                insights: 0,
                evidence: 0,
            };
            match outcome {
                Outcome::Success(yielded) => {
                    stats.units_succeeded += 1;
                    report.insights = yielded.insights.len();
                    report.evidence = yielded.evidence;
                    raw.extend(yielded.insights);
                }
                Outcome::Failed(e) => {
                    warn!(unit = unit.index, cohort = %unit.cohort.id, template = %unit.template.id, error = %e, "unit failed");
                    report.status = UnitStatus::Failed;
                    report.category = Some(e.category().to_string());
                    report.error = Some(e.to_string());
                }
                Outcome::Panicked(message) => {
                    warn!(unit = unit.index, %message, "unit panicked");
                    report.status = UnitStatus::Panicked;
                    report.category = Some("panicked".to_string());
                    report.error = Some(message);
                }
                Outcome::Cancelled => {
                    report.status = UnitStatus::Cancelled;
                    report.category = Some("cancelled".to_string());
                }
            }
            if let Some(category) = &report.category {
                stats.units_failed += 1;
                *stats.failures.entry(category.clone()).or_default() += 1;
            }
            reports.push(report);
        }
        stats.insights_generated = raw.len();

        // Quality gate
        let mut gate = self.gate.apply(&raw, &cohorts).await;
        stats.timings.validation_ms = gate.timings.validation_ms;

        // Rewriting
        if self.config.rewrite {
            match &self.rewriter {
                Some(rewriter) => {
                    let started = Instant::now();
                    let targets: Vec<&RawInsight> = gate.final_insights.iter().map(|f| &f.insight).collect();
                    let outcomes = rewriter.rewrite_all(&targets, &cohorts, cancel).await;
                    let mut variants = Vec::new();
                    for outcome in outcomes {
                        match outcome {
                            Outcome::Success(batch) => {
                                stats.rewrites_succeeded += 1;
                                variants.extend(batch);
                            }
                            _ => stats.rewrites_failed += 1,
                        }
                    }
                    stats.variants_created = variants.len();
                    stats.timings.rewriting_ms = millis(started.elapsed());

                    if !variants.is_empty() {
                        let started = Instant::now();
                        let mut validations = gate.validations;
                        validations.extend(self.gate.validator().validate_all(&variants).await);
                        stats.timings.validation_ms += millis(started.elapsed());

                        raw.extend(variants);
                        gate = self.gate.finish(&raw, validations, &cohorts);
                    }
                }
                None => warn!("rewriting enabled but no rewriting backend configured"),
            }
        }

        stats.insights_validated = gate.validations.iter().filter(|v| v.validated).count();
        stats.duplicates_removed = gate.dedup.marked_duplicates;
        stats.final_count = gate.final_insights.len();
        stats.dedup = gate.dedup;
        stats.timings.dedup_ms = gate.timings.dedup_ms;
        stats.timings.scoring_ms = gate.timings.scoring_ms;

        // Evaluation
        let mut final_insights = gate.final_insights;
        if self.config.evaluate {
            match &self.evaluator {
                Some(evaluator) => {
                    let started = Instant::now();
                    let targets: Vec<&RawInsight> = final_insights.iter().map(|f| &f.insight).collect();
                    let outcomes = evaluator.evaluate_all(&targets, &cohorts, cancel).await;
                    for (item, outcome) in final_insights.iter_mut().zip(outcomes) {
                        match outcome {
                            Outcome::Success(evaluation) => {
                                stats.evaluations_succeeded += 1;
                                item.evaluation = Some(evaluation);
                            }
                            _ => stats.evaluations_failed += 1,
                        }
                    }
                    stats.timings.evaluation_ms = millis(started.elapsed());
                }
                None => warn!("evaluation enabled but no evaluation backend configured"),
            }
        }

        stats.timings.total_ms = millis(run_started.elapsed());
        info!(
            %run_id,
            succeeded = stats.units_succeeded,
            failed = stats.units_failed,
            generated = stats.insights_generated,
            validated = stats.insights_validated,
            duplicates = stats.duplicates_removed,
            variants = stats.variants_created,
            kept = stats.final_count,
            total_ms = stats.timings.total_ms,
            "run complete"
        );

        PipelineRun {
            run_id,
            started_at,
            finished_at: Utc::now(),
            units: reports,
            raw,
            validations: gate.validations,
            duplicates: gate.duplicates,
            scores: gate.scores,
            final_insights,
            stats,
        }
    }
}
