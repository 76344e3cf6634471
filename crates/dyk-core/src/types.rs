//! Shared types for dyk-core.
//!
//! Records flowing through the pipeline. Everything is `Serialize` so the
//! CLI can export every intermediate collection of a run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ─────────────────────────────────────────────────────────────────────────────
// Inputs
// ─────────────────────────────────────────────────────────────────────────────

/// A target audience segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cohort {
    pub id: String,
    pub name: String,
    /// Dimension name to the category values this cohort covers,
    /// e.g. `"age_group" -> ["65+"]`.
    #[serde(default)]
    pub dimensions: BTreeMap<String, Vec<String>>,
    /// Lower is more important.
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub description: String,
}

impl Cohort {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            dimensions: BTreeMap::new(),
            priority: 0,
            description: String::new(),
        }
    }

    pub fn with_dimension(mut self, dimension: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions
            .entry(dimension.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// All category values across every dimension.
    pub fn category_values(&self) -> impl Iterator<Item = &str> {
        self.dimensions.values().flatten().map(String::as_str)
    }
}

/// A kind of insight the generator is asked for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsightTemplate {
    pub id: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub example: String,
}

fn default_weight() -> f64 {
    1.0
}

impl InsightTemplate {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            weight: default_weight(),
            description: description.into(),
            example: String::new(),
        }
    }
}

/// Generation parameters for one remote call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-3.5-sonnet".into(),
            temperature: 0.7,
            max_tokens: 4000,
        }
    }
}

/// One (cohort, template) work item for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationUnit {
    /// Position in the work queue.
    pub index: usize,
    pub cohort: Cohort,
    pub template: InsightTemplate,
    /// Number of insights requested from this unit.
    pub count: usize,
    pub params: ModelParams,
}

impl GenerationUnit {
    pub fn unit_ref(&self) -> UnitRef {
        UnitRef {
            unit_index: self.index,
            cohort_id: self.cohort.id.clone(),
            template_id: self.template.id.clone(),
            model: self.params.model.clone(),
        }
    }
}

/// Back-reference from an insight to the unit that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitRef {
    pub unit_index: usize,
    pub cohort_id: String,
    pub template_id: String,
    pub model: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Generated insights
// ─────────────────────────────────────────────────────────────────────────────

/// An insight as the generator returned it, before it is tied to a unit.
///
/// Every field defaults so that a response missing keys still parses and the
/// gap is reported by the schema check instead of a parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InsightDraft {
    #[serde(default)]
    pub hook: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub numeric_claim: Option<String>,
}

/// A rewritten hook, explanation and action for an existing insight.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Variation {
    #[serde(default)]
    pub hook: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub narrative_angle: Option<String>,
}

/// An insight tied to its originating unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawInsight {
    /// Content fingerprint.
    pub id: String,
    pub hook: String,
    pub explanation: String,
    pub action: String,
    pub source_name: String,
    pub source_url: String,
    pub numeric_claim: Option<String>,
    pub origin: UnitRef,
    /// Id of the insight this one rewrites.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_of: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative_angle: Option<String>,
}

impl RawInsight {
    /// Bind a draft to its unit. `ordinal` is the draft's position within
    /// the unit's response and keeps ids distinct for repeated text.
    pub fn from_draft(draft: InsightDraft, origin: UnitRef, ordinal: usize) -> Self {
        let id = fingerprint(&[
            &origin.unit_index.to_string(),
            &ordinal.to_string(),
            &draft.hook,
            &draft.explanation,
            &draft.action,
        ]);
        Self {
            id,
            hook: draft.hook,
            explanation: draft.explanation,
            action: draft.action,
            source_name: draft.source_name,
            source_url: draft.source_url,
            numeric_claim: draft.numeric_claim,
            origin,
            variant_of: None,
            narrative_angle: None,
        }
    }

    /// A rewrite of this insight. Source, claim and origin carry over.
    pub fn variant(&self, variation: Variation, ordinal: usize) -> Self {
        let id = fingerprint(&[
            &self.id,
            &ordinal.to_string(),
            &variation.hook,
            &variation.explanation,
            &variation.action,
        ]);
        Self {
            id,
            hook: variation.hook,
            explanation: variation.explanation,
            action: variation.action,
            source_name: self.source_name.clone(),
            source_url: self.source_url.clone(),
            numeric_claim: self.numeric_claim.clone(),
            origin: self.origin.clone(),
            variant_of: Some(self.id.clone()),
            narrative_angle: variation.narrative_angle.filter(|a| !a.trim().is_empty()),
        }
    }

    /// Text compared by the deduplicator.
    pub fn comparison_text(&self) -> String {
        format!("{} {}", self.hook, self.explanation)
    }

    /// Every free-text field joined, used by the content checks.
    pub fn full_text(&self) -> String {
        format!("{} {} {}", self.hook, self.explanation, self.action)
    }
}

/// SHA-256 over the parts joined by a unit separator, first 16 hex chars.
pub fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(16);
    digest
}

// ─────────────────────────────────────────────────────────────────────────────
// Quality records
// ─────────────────────────────────────────────────────────────────────────────

/// Result of one validation dimension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DimensionOutcome {
    pub passed: bool,
    /// 0 to 100.
    pub score: u32,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

impl DimensionOutcome {
    /// Build from a signed running score; clamps to 0..=100 and derives
    /// `passed` from the absence of issues.
    pub fn from_parts(score: i64, issues: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            passed: issues.is_empty(),
            score: score.clamp(0, 100) as u32,
            issues,
            warnings,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub insight_id: String,
    pub schema: DimensionOutcome,
    pub source: DimensionOutcome,
    pub numeric: DimensionOutcome,
    pub quality: DimensionOutcome,
    /// Mean of the four dimension scores.
    pub aggregate: f64,
    pub validated: bool,
}

impl ValidationResult {
    pub fn dimensions(&self) -> [(&'static str, &DimensionOutcome); 4] {
        [
            ("schema", &self.schema),
            ("source", &self.source),
            ("numeric", &self.numeric),
            ("quality", &self.quality),
        ]
    }

    /// All issues, prefixed with their dimension name.
    pub fn all_issues(&self) -> Vec<String> {
        self.dimensions()
            .iter()
            .flat_map(|(name, d)| d.issues.iter().map(move |i| format!("{name}: {i}")))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DuplicateMarking {
    pub is_duplicate: bool,
    /// Index of the earlier insight this one duplicates.
    pub duplicate_of: Option<usize>,
    /// Ratio against `duplicate_of`; 0 when unique.
    pub similarity: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QualityScore {
    pub total: u32,
    pub hook: u32,
    pub explanation: u32,
    pub action: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriterionScore {
    pub score: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Model-graded assessment of a final insight.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    #[serde(default)]
    pub criteria: BTreeMap<String, CriterionScore>,
    #[serde(default)]
    pub overall_score: f64,
    #[serde(default)]
    pub pass: bool,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub critical_issues: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// A literature search hit used to ground a generation prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EvidenceArticle {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub year: Option<u32>,
    #[serde(default)]
    pub journal: Option<String>,
}

impl EvidenceArticle {
    pub fn url(&self) -> String {
        format!("https://pubmed.ncbi.nlm.nih.gov/{}/", self.id)
    }
}

/// An insight that survived every gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalInsight {
    #[serde(flatten)]
    pub insight: RawInsight,
    pub validation: ValidationResult,
    pub duplicate: DuplicateMarking,
    pub quality: QualityScore,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
}
