//! Required fields and length limits.

use crate::config::ValidatorConfig;
use crate::types::{DimensionOutcome, RawInsight};

pub(crate) fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Look up a field by its serialized name.
pub(crate) fn field_value<'a>(insight: &'a RawInsight, field: &str) -> Option<&'a str> {
    match field {
        "hook" => Some(&insight.hook),
        "explanation" => Some(&insight.explanation),
        "action" => Some(&insight.action),
        "source_name" => Some(&insight.source_name),
        "source_url" => Some(&insight.source_url),
        "numeric_claim" => Some(insight.numeric_claim.as_deref().unwrap_or("")),
        _ => None,
    }
}

pub fn check(insight: &RawInsight, config: &ValidatorConfig) -> DimensionOutcome {
    let penalties = &config.penalties;
    let mut score = 100;
    let mut issues = Vec::new();
    let mut warnings = Vec::new();

    for field in &config.required_fields {
        match field_value(insight, field) {
            Some(value) if value.trim().is_empty() => {
                issues.push(format!("missing required field: {field}"));
                score -= penalties.missing_field;
            }
            Some(_) => {}
            None => warnings.push(format!("unknown required field: {field}")),
        }
    }

    // Length limits apply only to fields that are present
    let hook_words = word_count(&insight.hook);
    if hook_words > config.hook_max_words {
        issues.push(format!(
            "hook too long: {hook_words} words (max {})",
            config.hook_max_words
        ));
        score -= penalties.hook_too_long;
    }

    let explanation_words = word_count(&insight.explanation);
    if explanation_words > 0 {
        if explanation_words < config.explanation_min_words
            || explanation_words > config.explanation_max_words
        {
            issues.push(format!(
                "explanation length out of range: {explanation_words} words (allowed {}-{})",
                config.explanation_min_words, config.explanation_max_words
            ));
            score -= penalties.explanation_out_of_range;
        } else if explanation_words < config.explanation_optimal_min_words {
            warnings.push(format!(
                "explanation shorter than optimal: {explanation_words} words (target {}-{})",
                config.explanation_optimal_min_words, config.explanation_optimal_max_words
            ));
            score -= penalties.explanation_below_optimal;
        }
    }

    let action_words = word_count(&insight.action);
    if action_words > config.action_max_words {
        issues.push(format!(
            "action too long: {action_words} words (max {})",
            config.action_max_words
        ));
        score -= penalties.action_too_long;
    }

    DimensionOutcome::from_parts(score, issues, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::tests::{insight, words};

    #[test]
    fn test_complete_insight_passes() {
        let outcome = check(&insight(), &ValidatorConfig::default());
        assert!(outcome.passed, "{:?}", outcome.issues);
        assert_eq!(outcome.score, 100);
    }

    #[test]
    fn test_each_missing_field_costs_a_penalty() {
        let config = ValidatorConfig::default();
        let base = check(&insight(), &config).score;

        for field in ["hook", "explanation", "action", "source_name", "source_url"] {
            let mut item = insight();
            match field {
                "hook" => item.hook.clear(),
                "explanation" => item.explanation.clear(),
                "action" => item.action.clear(),
                "source_name" => item.source_name.clear(),
                _ => item.source_url = "   ".into(),
            }
            let outcome = check(&item, &config);
            assert!(outcome.score < base, "{field}");
            assert!(
                outcome.issues.iter().any(|i| i.contains(field)),
                "{field}: {:?}",
                outcome.issues
            );
        }
    }

    #[test]
    fn test_hook_one_word_over_costs_exactly_the_penalty() {
        let config = ValidatorConfig::default();
        let mut item = insight();
        item.hook = format!("Did you know {}", words(config.hook_max_words - 2));
        assert_eq!(word_count(&item.hook), config.hook_max_words + 1);

        let outcome = check(&item, &config);
        assert_eq!(outcome.score, 100 - config.penalties.hook_too_long as u32);
        assert_eq!(outcome.issues.len(), 1);
    }

    #[test]
    fn test_explanation_bands() {
        let config = ValidatorConfig::default();
        let mut item = insight();

        item.explanation = words(35);
        let outcome = check(&item, &config);
        assert!(outcome.passed);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.score, 95);

        item.explanation = words(61);
        let outcome = check(&item, &config);
        assert!(!outcome.passed);
        assert_eq!(outcome.score, 85);

        item.explanation = words(12);
        assert_eq!(check(&item, &config).score, 85);
    }

    #[test]
    fn test_action_too_long() {
        let config = ValidatorConfig::default();
        let mut item = insight();
        item.action = words(31);
        let outcome = check(&item, &config);
        assert_eq!(outcome.score, 90);
        assert!(outcome.issues[0].starts_with("action too long"));
    }

    #[test]
    fn test_score_floors_at_zero() {
        let config = ValidatorConfig::default();
        let mut item = insight();
        item.hook = words(25);
        item.explanation = words(80);
        item.action = words(40);
        item.source_name.clear();
        item.source_url.clear();
        let outcome = check(&item, &config);
        assert_eq!(outcome.score, 20);

        let mut harsh = config.clone();
        harsh.penalties.missing_field = 60;
        assert_eq!(check(&item, &harsh).score, 0);
    }

    #[test]
    fn test_unknown_required_field_is_a_warning() {
        let mut config = ValidatorConfig::default();
        config.required_fields.push("category".into());
        let outcome = check(&insight(), &config);
        assert!(outcome.passed);
        assert_eq!(outcome.warnings.len(), 1);
    }
}
