//! Editorial quality: lead-in, call to action, banned wording.

use regex::Regex;

use crate::config::ValidatorConfig;
use crate::types::{DimensionOutcome, RawInsight};

const LEAD_IN_POINTS: i64 = 40;
const ACTION_VERB_POINTS: i64 = 30;
const CLEAN_WORDING_POINTS: i64 = 30;

/// Whole-word, case-insensitive matcher over a configured word list.
#[derive(Debug, Clone)]
pub struct WordList {
    pattern: Option<Regex>,
}

impl WordList {
    pub fn new<S: AsRef<str>>(words: &[S]) -> Result<Self, regex::Error> {
        let alternatives: Vec<String> = words
            .iter()
            .map(|w| w.as_ref().trim())
            .filter(|w| !w.is_empty())
            .map(regex::escape)
            .collect();
        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }
        let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.as_ref().is_some_and(|p| p.is_match(text))
    }

    /// Distinct matches, lowercased, in order of first appearance.
    pub fn matches(&self, text: &str) -> Vec<String> {
        let Some(pattern) = &self.pattern else {
            return Vec::new();
        };
        let mut found: Vec<String> = Vec::new();
        for m in pattern.find_iter(text) {
            let term = m.as_str().to_lowercase();
            if !found.contains(&term) {
                found.push(term);
            }
        }
        found
    }
}

pub fn starts_with_lead_in(hook: &str, phrases: &[String]) -> bool {
    let hook = hook.trim_start().to_lowercase();
    phrases
        .iter()
        .any(|p| !p.trim().is_empty() && hook.starts_with(&p.trim().to_lowercase()))
}

/// Content checker with its word lists compiled once.
#[derive(Debug, Clone)]
pub struct ContentCheck {
    verbs: WordList,
    denylist: WordList,
}

impl ContentCheck {
    pub fn new(config: &ValidatorConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            verbs: WordList::new(config.actionable_verbs.as_slice())?,
            denylist: WordList::new(config.denylist.as_slice())?,
        })
    }

    pub fn verbs(&self) -> &WordList {
        &self.verbs
    }

    pub fn check(&self, insight: &RawInsight, config: &ValidatorConfig) -> DimensionOutcome {
        let mut score = 0;
        let mut issues = Vec::new();

        if starts_with_lead_in(&insight.hook, &config.lead_in_phrases) {
            score += LEAD_IN_POINTS;
        } else {
            issues.push("hook does not open with a lead-in phrase".to_string());
        }

        let text = insight.full_text();
        if self.verbs.is_match(&text) {
            score += ACTION_VERB_POINTS;
        } else {
            issues.push("no actionable verb".to_string());
        }

        let banned = self.denylist.matches(&text);
        if banned.is_empty() {
            score += CLEAN_WORDING_POINTS;
        } else {
            issues.extend(banned.into_iter().map(|t| format!("denylisted term: {t}")));
        }

        DimensionOutcome::from_parts(score, issues, Vec::new())
    }
}
