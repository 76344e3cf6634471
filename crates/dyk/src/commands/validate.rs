//! Offline validation, deduplication and scoring of an insight file.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dyk_core::pipeline::GateReport;
use dyk_core::types::{InsightDraft, UnitRef};
use dyk_core::validator::HttpProbe;
use dyk_core::{Cohort, QualityGate, RawInsight};
use serde::Deserialize;
use tracing::info;

use crate::cli::ValidateArgs;
use crate::config::Config;
use crate::output;

/// Accepted input shapes: exported run files, or drafts as a generator
/// would return them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InsightFile {
    Exported(Vec<RawInsight>),
    Drafts(Vec<InsightDraft>),
    Wrapped { insights: Vec<InsightDraft> },
}

impl InsightFile {
    fn into_insights(self) -> Vec<RawInsight> {
        let drafts = match self {
            Self::Exported(insights) => return insights,
            Self::Drafts(drafts) | Self::Wrapped { insights: drafts } => drafts,
        };
        let origin = UnitRef {
            unit_index: 0,
            cohort_id: String::new(),
            template_id: String::new(),
            model: String::new(),
        };
        drafts
            .into_iter()
            .enumerate()
            .map(|(ordinal, draft)| RawInsight::from_draft(draft, origin.clone(), ordinal))
            .collect()
    }
}

pub fn load_insights(path: &Path) -> Result<Vec<RawInsight>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file: InsightFile = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a list of insights", path.display()))?;
    Ok(file.into_insights())
}

pub async fn check(insights: &[RawInsight], config: &Config) -> Result<GateReport> {
    config.pipeline.validate().context("Invalid pipeline configuration")?;
    let mut gate = QualityGate::new(&config.pipeline).context("Invalid validator configuration")?;

    let validator = &config.pipeline.validator;
    if validator.probe_urls {
        let probe = HttpProbe::new(Duration::from_secs(validator.probe_timeout_secs))
            .context("Failed to create URL probe")?;
        gate = gate.with_probe(Arc::new(probe));
        info!(insights = insights.len(), "probing source URLs");
    }

    let cohorts: HashMap<String, Cohort> = config
        .cohorts
        .iter()
        .map(|c| (c.id.clone(), c.clone()))
        .collect();
    Ok(gate.apply(insights, &cohorts).await)
}

pub async fn execute(args: ValidateArgs, config: Config) -> Result<()> {
    let insights = load_insights(&args.input)?;
    let report = check(&insights, &config).await?;

    if let Some(dir) = &args.output_dir {
        output::export_gate(&report, dir)?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report.final_insights)?);
    } else {
        output::print_gate_summary(&report, insights.len());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn draft(hook: &str) -> serde_json::Value {
        json!({
            "hook": hook,
            "explanation": "Decades of smoking damage the lining of blood vessels, raise blood pressure \
                and thicken the blood, which together make clots and blockages far more likely. \
                Among adults over fifty the effect compounds with age, yet quitting at any point \
                steadily lowers that risk within a few years.",
            "action": "Speak to your doctor about cessation programs.",
            "source_name": "Centers for Disease Control and Prevention",
            "source_url": "https://www.cdc.gov/tobacco",
        })
    }

    #[test]
    fn test_load_drafts_and_wrapped() {
        let temp = tempdir().expect("Failed to create temp dir");

        let bare = temp.path().join("bare.json");
        std::fs::write(&bare, json!([draft("a"), draft("b")]).to_string()).unwrap();
        let insights = load_insights(&bare).expect("Failed to load drafts");
        assert_eq!(insights.len(), 2);
        assert_ne!(insights[0].id, insights[1].id);

        let wrapped = temp.path().join("wrapped.json");
        std::fs::write(&wrapped, json!({ "insights": [draft("a")] }).to_string()).unwrap();
        assert_eq!(load_insights(&wrapped).unwrap().len(), 1);
    }

    #[test]
    fn test_load_exported_keeps_ids() {
        let temp = tempdir().expect("Failed to create temp dir");
        let path = temp.path().join("raw_insights.json");
        let mut value = draft("Did you know smoking doubles heart risk?");
        value["id"] = json!("fixed-id");
        value["origin"] = json!({
            "unit_index": 4,
            "cohort_id": "cohort_0001",
            "template_id": "risk_factor",
            "model": "m",
        });
        std::fs::write(&path, json!([value]).to_string()).unwrap();

        let insights = load_insights(&path).unwrap();
        assert_eq!(insights[0].id, "fixed-id");
        assert_eq!(insights[0].origin.unit_index, 4);
    }

    #[test]
    fn test_load_rejects_other_json() {
        let temp = tempdir().expect("Failed to create temp dir");
        let path = temp.path().join("other.json");
        std::fs::write(&path, r#"{"hello": "world"}"#).unwrap();
        assert!(load_insights(&path).is_err());
    }

    #[tokio::test]
    async fn test_check_filters_duplicates() {
        let temp = tempdir().expect("Failed to create temp dir");
        let path = temp.path().join("drafts.json");
        let hook = "Did you know smoking doubles heart risk?";
        std::fs::write(&path, json!([draft(hook), draft(hook)]).to_string()).unwrap();

        let insights = load_insights(&path).unwrap();
        let report = check(&insights, &Config::default()).await.unwrap();

        assert_eq!(report.validations.len(), 2);
        assert!(report.validations.iter().all(|v| v.validated));
        assert!(report.duplicates[1].is_duplicate);
        assert_eq!(report.final_insights.len(), 1);
    }

    #[tokio::test]
    async fn test_check_rejects_invalid_config() {
        let mut config = Config::default();
        config.pipeline.dedup.threshold = 1.5;

        let err = check(&[], &config).await.unwrap_err();
        assert!(err.to_string().contains("Invalid pipeline configuration"));
    }

    /// Loopback server answering every request with 404.
    async fn missing_page_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .await;
            }
        });
        format!("http://{addr}/tobacco")
    }

    fn insight_at(url: &str) -> RawInsight {
        let mut value = draft("Did you know smoking doubles heart risk?");
        value["source_url"] = json!(url);
        let draft: InsightDraft = serde_json::from_value(value).unwrap();
        InsightFile::Drafts(vec![draft]).into_insights().remove(0)
    }

    #[tokio::test]
    async fn test_check_reaches_source_urls_when_enabled() {
        let url = missing_page_server().await;
        let insights = vec![insight_at(&url)];

        let mut config = Config::default();
        config.pipeline.validator.probe_urls = true;
        config.pipeline.validator.probe_timeout_secs = 5;
        let report = check(&insights, &config).await.unwrap();
        let warnings = &report.validations[0].source.warnings;
        assert!(
            warnings.iter().any(|w| w.contains("status 404")),
            "{warnings:?}"
        );

        config.pipeline.validator.probe_urls = false;
        let report = check(&insights, &config).await.unwrap();
        assert!(report.validations[0].source.warnings.is_empty());
    }
}
