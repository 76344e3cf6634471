//! Structural engagement scoring.
//!
//! Independent of validation: scores how well an insight is built to be
//! read and acted on, out of 100.
//!
//! | Part        | Points | Criteria |
//! |-------------|--------|----------|
//! | hook        | 30     | lead-in (10), contains a number (10), within word limit (10) |
//! | explanation | 40     | optimal length (15), speaks to the cohort (15), numeric claim (10) |
//! | action      | 30     | actionable verb (15), length within bounds (15) |

use regex::Regex;

use crate::config::ValidatorConfig;
use crate::error::{Error, Result};
use crate::types::{Cohort, QualityScore, RawInsight};
use crate::validator::content::{WordList, starts_with_lead_in};
use crate::validator::numeric::has_numeric_signal;
use crate::validator::schema::word_count;

#[derive(Debug, Clone)]
pub struct QualityScorer {
    config: ValidatorConfig,
    verbs: WordList,
}

impl QualityScorer {
    pub fn new(config: ValidatorConfig) -> Result<Self> {
        let verbs = WordList::new(config.actionable_verbs.as_slice())
            .map_err(|e| Error::Other(format!("invalid actionable verb list: {}", e)))?;
        Ok(Self { config, verbs })
    }

    pub fn score(&self, insight: &RawInsight, cohort: Option<&Cohort>) -> QualityScore {
        let hook = self.score_hook(&insight.hook);
        let explanation = self.score_explanation(&insight.explanation, cohort);
        let action = self.score_action(&insight.action);
        QualityScore {
            total: hook + explanation + action,
            hook,
            explanation,
            action,
        }
    }

    fn score_hook(&self, hook: &str) -> u32 {
        let mut points = 0;
        if starts_with_lead_in(hook, &self.config.lead_in_phrases) {
            points += 10;
        }
        if hook.chars().any(|c| c.is_ascii_digit()) {
            points += 10;
        }
        let words = word_count(hook);
        if words > 0 && words <= self.config.hook_max_words {
            points += 10;
        }
        points
    }

    fn score_explanation(&self, explanation: &str, cohort: Option<&Cohort>) -> u32 {
        let mut points = 0;
        let words = word_count(explanation);
        if (self.config.explanation_optimal_min_words..=self.config.explanation_optimal_max_words).contains(&words) {
            points += 15;
        }
        if cohort.is_some_and(|c| mentions_cohort(explanation, c)) {
            points += 15;
        }
        if has_numeric_signal(explanation) {
            points += 10;
        }
        points
    }

    fn score_action(&self, action: &str) -> u32 {
        let mut points = 0;
        if self.verbs.is_match(action) {
            points += 15;
        }
        let words = word_count(action);
        if (self.config.action_min_words..=self.config.action_max_words).contains(&words) {
            points += 15;
        }
        points
    }
}

/// Whether `text` names the cohort or any of its category values as whole
/// words, case-insensitively.
pub fn mentions_cohort(text: &str, cohort: &Cohort) -> bool {
    std::iter::once(cohort.name.as_str())
        .chain(cohort.category_values())
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .any(|term| mentions_term(text, term))
}

fn mentions_term(text: &str, term: &str) -> bool {
    // Boundaries are non-word characters rather than `\b` so terms that end
    // in punctuation, like "65+", still match.
    let pattern = format!(r"(?i)(?:^|\W){}(?:\W|$)", regex::escape(term));
    Regex::new(&pattern).is_ok_and(|re| re.is_match(text))
}
