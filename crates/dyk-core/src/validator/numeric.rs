//! Plausibility of percentage and multiplier claims.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::ValidatorConfig;
use crate::types::{DimensionOutcome, RawInsight};

static PERCENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d[\d,]*(?:\.\d+)?)\s*(?:%|\bper\s?cent\b)").expect("valid percent regex")
});

/// Group 2 captures a trailing frequency ("30 times a week"), which makes
/// the match a count rather than a multiplier.
static MULTIPLIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(\d[\d,]*(?:\.\d+)?)\s*(?:x\b|×|\btimes\b|-?\bfold\b)(\s+(?:(?:a|an|per|each|every)\s+(?:day|night|week|month|year|hour)|daily|nightly|weekly|monthly|yearly)\b)?",
    )
    .expect("valid multiplier regex")
});

static MULTIPLIER_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(doubl|tripl|quadrupl)(?:e|es|ed|ing)\b").expect("valid multiplier word regex")
});

/// A quantitative claim found in free text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Claim {
    Percent(f64),
    Multiplier(f64),
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse().ok()
}

/// Every percentage and multiplier claim in `text`, in order of kind.
pub fn extract_claims(text: &str) -> Vec<Claim> {
    let percents = PERCENT
        .captures_iter(text)
        .filter_map(|c| parse_number(&c[1]))
        .map(Claim::Percent);

    let multipliers = MULTIPLIER
        .captures_iter(text)
        .filter(|c| c.get(2).is_none())
        .filter_map(|c| parse_number(&c[1]))
        .map(Claim::Multiplier);

    let words = MULTIPLIER_WORD.captures_iter(text).map(|c| {
        let factor = match c[1].to_lowercase().as_str() {
            "doubl" => 2.0,
            "tripl" => 3.0,
            _ => 4.0,
        };
        Claim::Multiplier(factor)
    });

    percents.chain(multipliers).chain(words).collect()
}

/// Whether `text` carries any numeric signal: a digit or a multiplier word.
pub fn has_numeric_signal(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit()) || MULTIPLIER_WORD.is_match(text)
}

pub fn check(insight: &RawInsight, config: &ValidatorConfig) -> DimensionOutcome {
    let mut text = insight.full_text();
    if let Some(claim) = &insight.numeric_claim {
        text.push(' ');
        text.push_str(claim);
    }

    let mut score = 100;
    let mut issues = Vec::new();

    for claim in extract_claims(&text) {
        match claim {
            Claim::Percent(value) if value > config.max_percent => {
                issues.push(format!(
                    "implausible percentage: {value}% (max {}%)",
                    config.max_percent
                ));
                score -= config.penalties.implausible_percent;
            }
            Claim::Multiplier(value) if value > config.max_multiplier => {
                issues.push(format!(
                    "implausible multiplier: {value}x (max {}x)",
                    config.max_multiplier
                ));
                score -= config.penalties.implausible_multiplier;
            }
            _ => {}
        }
    }

    DimensionOutcome::from_parts(score, issues, Vec::new())
}
