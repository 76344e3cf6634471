//! Source attribution: name, URL shape, trusted domains and reachability.

use reqwest::Url;

use crate::config::ValidatorConfig;
use crate::types::{DimensionOutcome, RawInsight};

/// Result of a liveness probe against a source URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The server answered with this status.
    Status(u16),
    /// The request failed or timed out.
    Unreachable(String),
}

impl ProbeOutcome {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Self::Status(code) if *code < 400)
    }
}

fn is_sentinel(url: &str, config: &ValidatorConfig) -> bool {
    url.trim()
        .eq_ignore_ascii_case(config.generic_source_sentinel.trim())
}

/// Parse an absolute http(s) URL with a host.
pub fn parse_source_url(url: &str) -> Option<Url> {
    let parsed = Url::parse(url.trim()).ok()?;
    let has_host = parsed.host_str().is_some_and(|h| !h.is_empty());
    (matches!(parsed.scheme(), "http" | "https") && has_host).then_some(parsed)
}

/// Whether `host` equals an allowed domain or is a subdomain of one.
pub fn host_allowed(host: &str, allowed: &[String]) -> bool {
    let host = host.trim_end_matches('.').to_lowercase();
    allowed.iter().any(|domain| {
        let domain = domain.trim().trim_start_matches('.').to_lowercase();
        !domain.is_empty() && (host == domain || host.ends_with(&format!(".{domain}")))
    })
}

/// The URL worth probing, if any: well-formed and not the sentinel.
pub fn probe_target(insight: &RawInsight, config: &ValidatorConfig) -> Option<Url> {
    if is_sentinel(&insight.source_url, config) {
        return None;
    }
    parse_source_url(&insight.source_url)
}

pub fn check(insight: &RawInsight, config: &ValidatorConfig, probe: Option<&ProbeOutcome>) -> DimensionOutcome {
    let penalties = &config.penalties;
    let mut score = 100;
    let mut issues = Vec::new();
    let mut warnings = Vec::new();

    if insight.source_name.trim().is_empty() {
        issues.push("missing source name".to_string());
        score -= penalties.missing_source_name;
    }

    let url = insight.source_url.trim();
    if url.is_empty() {
        issues.push("missing source URL".to_string());
        score -= penalties.invalid_source_url;
    } else if is_sentinel(url, config) {
        warnings.push("no specific source URL provided".to_string());
        score -= penalties.generic_source;
    } else {
        match parse_source_url(url) {
            None => {
                issues.push(format!("invalid source URL: {url}"));
                score -= penalties.invalid_source_url;
            }
            Some(parsed) => {
                let host = parsed.host_str().unwrap_or_default();
                if !config.allowed_domains.is_empty() && !host_allowed(host, &config.allowed_domains) {
                    warnings.push(format!("source domain not in allow-list: {host}"));
                    score -= penalties.domain_not_allowed;
                }
                match probe {
                    Some(ProbeOutcome::Status(code)) if *code >= 400 => {
                        warnings.push(format!("source URL returned status {code}"));
                        score -= penalties.unreachable_source;
                    }
                    Some(ProbeOutcome::Unreachable(reason)) => {
                        warnings.push(format!("source URL unreachable: {reason}"));
                        score -= penalties.unreachable_source;
                    }
                    _ => {}
                }
            }
        }
    }

    DimensionOutcome::from_parts(score, issues, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::tests::insight;

    #[test]
    fn test_valid_source_passes() {
        let config = ValidatorConfig::default().with_allowed_domains(["cdc.gov"]);
        let outcome = check(&insight(), &config, None);
        assert!(outcome.passed);
        assert_eq!(outcome.score, 100);
    }

    #[test]
    fn test_missing_name_and_url() {
        let mut item = insight();
        item.source_name.clear();
        item.source_url.clear();
        let outcome = check(&item, &ValidatorConfig::default(), None);
        assert_eq!(outcome.score, 20);
        assert_eq!(outcome.issues.len(), 2);
    }

    #[test]
    fn test_malformed_urls_are_issues() {
        for url in ["cdc.gov/tobacco", "ftp://cdc.gov/x", "https://", "not a url"] {
            let mut item = insight();
            item.source_url = url.into();
            let outcome = check(&item, &ValidatorConfig::default(), None);
            assert!(!outcome.passed, "{url}");
            assert_eq!(outcome.score, 40, "{url}");
        }
    }

    #[test]
    fn test_sentinel_is_a_warning() {
        let mut item = insight();
        item.source_url = "General Medical Knowledge".into();
        let outcome = check(&item, &ValidatorConfig::default(), None);
        assert!(outcome.passed);
        assert_eq!(outcome.score, 70);
        assert!(probe_target(&item, &ValidatorConfig::default()).is_none());
    }

    #[test]
    fn test_allow_list_accepts_subdomains_only() {
        let allowed = vec!["cdc.gov".to_string()];
        assert!(host_allowed("cdc.gov", &allowed));
        assert!(host_allowed("www.CDC.gov", &allowed));
        assert!(!host_allowed("notcdc.gov", &allowed));
        assert!(!host_allowed("cdc.gov.example.com", &allowed));
    }

    #[test]
    fn test_domain_outside_allow_list_is_a_warning() {
        let config = ValidatorConfig::default().with_allowed_domains(["nih.gov"]);
        let outcome = check(&insight(), &config, None);
        assert!(outcome.passed);
        assert_eq!(outcome.score, 80);
    }

    #[test]
    fn test_probe_failures_are_warnings() {
        let config = ValidatorConfig::default();
        let not_found = check(&insight(), &config, Some(&ProbeOutcome::Status(404)));
        assert!(not_found.passed);
        assert_eq!(not_found.score, 70);

        let down = check(&insight(), &config, Some(&ProbeOutcome::Unreachable("timeout".into())));
        assert!(down.passed);
        assert_eq!(down.score, 70);

        let ok = check(&insight(), &config, Some(&ProbeOutcome::Status(200)));
        assert_eq!(ok.score, 100);
    }
}
