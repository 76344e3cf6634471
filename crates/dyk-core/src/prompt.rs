//! Prompt construction for generation, rewriting and evaluation calls.

use crate::config::ValidatorConfig;
use crate::evidence::format_evidence_context;
use crate::types::{Cohort, EvidenceArticle, GenerationUnit, InsightTemplate, RawInsight};

/// Criteria the evaluator is asked to grade, in output order.
pub const EVALUATION_CRITERIA: &[&str] = &[
    "factual_accuracy",
    "safety",
    "faithfulness",
    "cohort_relevance",
    "actionability",
    "localization",
];

pub const GENERATION_SYSTEM: &str =
    "You are a medical and public health expert writing short, evidence-based health insights. \
     Respond with JSON only.";

pub const REWRITING_SYSTEM: &str =
    "You are a health copywriter. You rephrase insights for variety without changing a single fact. \
     Respond with JSON only.";

pub const EVALUATION_SYSTEM: &str =
    "You are a medical fact-checker grading health insights. Respond with JSON only.";

fn describe_cohort(cohort: &Cohort) -> String {
    let mut out = format!("{} ({})\n", cohort.name, cohort.id);
    if !cohort.description.is_empty() {
        out.push_str(&cohort.description);
        out.push('\n');
    }
    for (dimension, values) in &cohort.dimensions {
        out.push_str(&format!("- {}: {}\n", dimension, values.join(", ")));
    }
    out
}

fn describe_template(template: &InsightTemplate) -> String {
    let mut out = format!("- Type: {}\n", template.id);
    if !template.description.is_empty() {
        out.push_str(&format!("- Description: {}\n", template.description));
    }
    if !template.example.is_empty() {
        out.push_str(&format!("- Example: \"{}\"\n", template.example));
    }
    out
}

/// Generation prompt for one unit, optionally grounded in evidence.
pub fn generation_prompt(unit: &GenerationUnit, evidence: &[EvidenceArticle], limits: &ValidatorConfig) -> String {
    let lead_in = limits
        .lead_in_phrases
        .first()
        .map(String::as_str)
        .unwrap_or("Did you know");

    let evidence_block = if evidence.is_empty() {
        String::new()
    } else {
        format!(
            "EVIDENCE (cite these where relevant, use the PubMed URL as source_url):\n{}\n",
            format_evidence_context(evidence)
        )
    };

    format!(
        r#"TARGET COHORT:
{cohort}
INSIGHT TEMPLATE:
{template}
{evidence_block}TASK:
Write {count} distinct "{lead_in}" health insights for this cohort.

REQUIREMENTS:
- hook: opens with "{lead_in}", at most {hook_max} words
- explanation: {exp_min}-{exp_max} words on why this matters for the cohort
- action: one specific step, {act_min}-{act_max} words
- source_name: an authoritative organisation or journal
- source_url: a URL, or "{sentinel}"
- numeric_claim: the key statistic quoted, or an empty string
- no diagnosis or treatment claims, no made-up statistics

OUTPUT FORMAT:
{{"insights": [{{"hook": "", "explanation": "", "action": "", "source_name": "", "source_url": "", "numeric_claim": ""}}]}}
"#,
        cohort = describe_cohort(&unit.cohort),
        template = describe_template(&unit.template),
        count = unit.count,
        hook_max = limits.hook_max_words,
        exp_min = limits.explanation_optimal_min_words,
        exp_max = limits.explanation_optimal_max_words,
        act_min = limits.action_min_words,
        act_max = limits.action_max_words,
        sentinel = limits.generic_source_sentinel,
    )
}

/// Rewriting prompt asking for `variations` fresh phrasings of one insight.
pub fn rewriting_prompt(
    insight: &RawInsight,
    cohort: Option<&Cohort>,
    region: Option<&str>,
    variations: usize,
    limits: &ValidatorConfig,
) -> String {
    let cohort = cohort.map(describe_cohort).unwrap_or_else(|| insight.origin.cohort_id.clone());
    let lead_in = limits
        .lead_in_phrases
        .first()
        .map(String::as_str)
        .unwrap_or("Did you know");

    format!(
        r#"ORIGINAL INSIGHT:
Hook: {hook}
Explanation: {explanation}
Action: {action}
Source: {source_name} ({source_url})

TARGET COHORT:
{cohort}
REGION: {region}

TASK:
Write {variations} variations of this insight, each from a different narrative angle
(for example a personal scenario, a surprising contrast, a question, a practical tip).

RULES:
- keep every fact, number and the source exactly as in the original
- hook: opens with "{lead_in}", at most {hook_max} words
- explanation: {exp_min}-{exp_max} words
- action: one specific step, {act_min}-{act_max} words
- each variation must read differently from the original and from each other

OUTPUT FORMAT:
{{"variations": [{{"hook": "", "explanation": "", "action": "", "narrative_angle": ""}}]}}
"#,
        hook = insight.hook,
        explanation = insight.explanation,
        action = insight.action,
        source_name = insight.source_name,
        source_url = insight.source_url,
        region = region.unwrap_or("unspecified"),
        hook_max = limits.hook_max_words,
        exp_min = limits.explanation_optimal_min_words,
        exp_max = limits.explanation_optimal_max_words,
        act_min = limits.action_min_words,
        act_max = limits.action_max_words,
    )
}

/// Evaluation prompt for one final insight.
pub fn evaluation_prompt(insight: &RawInsight, cohort: Option<&Cohort>, region: Option<&str>) -> String {
    let cohort = cohort.map(describe_cohort).unwrap_or_else(|| insight.origin.cohort_id.clone());
    let criteria = EVALUATION_CRITERIA
        .iter()
        .map(|c| format!("\"{c}\": {{\"score\": 0-100, \"reasoning\": \"\"}}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"INSIGHT:
Hook: {hook}
Explanation: {explanation}
Action: {action}
Source: {source_name} ({source_url})

TARGET COHORT:
{cohort}
REGION: {region}

Grade the insight 0-100 on each criterion: {names}.
Set "pass" to true only if it is accurate, safe and relevant.

OUTPUT FORMAT:
{{"criteria": {{{criteria}}}, "overall_score": 0-100, "pass": true, "strengths": [], "critical_issues": [], "recommendations": []}}
"#,
        hook = insight.hook,
        explanation = insight.explanation,
        action = insight.action,
        source_name = insight.source_name,
        source_url = insight.source_url,
        region = region.unwrap_or("unspecified"),
        names = EVALUATION_CRITERIA.join(", "),
    )
}
