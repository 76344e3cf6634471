//! Full generation run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dyk_core::client::OpenRouterBackend;
use dyk_core::evidence::PubMedClient;
use dyk_core::validator::HttpProbe;
use dyk_core::{CancelToken, Pipeline};
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::config::Config;
use crate::output;

/// Fold command-line flags into the loaded configuration.
pub fn apply_overrides(config: &mut Config, args: &RunArgs) {
    if let Some(max) = args.max_cohorts {
        config.cohorts.sort_by_key(|c| c.priority);
        config.cohorts.truncate(max);
    }
    if let Some(dir) = &args.output_dir {
        config.output.dir = dir.clone();
    }
    if let Some(secs) = args.deadline_secs {
        config.pipeline.orchestrator.deadline_secs = Some(secs);
    }
    if args.no_probe {
        config.pipeline.validator.probe_urls = false;
    }
    if args.evaluate {
        config.pipeline.evaluate = true;
    }
    if let Some(variations) = args.rewrite {
        config.pipeline.rewrite = true;
        config.pipeline.variations_per_insight = variations;
    }
}

pub async fn execute(args: RunArgs, mut config: Config) -> Result<()> {
    apply_overrides(&mut config, &args);
    config.validate_run()?;

    let backend = OpenRouterBackend::new(config.api_key()?)
        .context("Failed to create generation backend")?
        .with_base_url(&config.openrouter.base_url);

    let pipeline_config = config.pipeline.clone();
    let generator = backend.clone().with_timeout(pipeline_config.generation.timeout());
    let mut pipeline = Pipeline::new(pipeline_config.clone(), Arc::new(generator))?;
    if pipeline_config.rewrite {
        let writer = backend.clone().with_timeout(pipeline_config.rewriting.timeout());
        pipeline = pipeline.with_rewriting(Arc::new(writer));
    }
    if pipeline_config.evaluate {
        let grader = backend.with_timeout(pipeline_config.evaluation.timeout());
        pipeline = pipeline.with_evaluation(Arc::new(grader));
    }
    if pipeline_config.evidence.enabled {
        let pubmed = PubMedClient::new(&pipeline_config.evidence).context("Failed to create PubMed client")?;
        pipeline = pipeline.with_evidence(Arc::new(pubmed));
    }
    if pipeline_config.validator.probe_urls {
        let probe = HttpProbe::new(Duration::from_secs(pipeline_config.validator.probe_timeout_secs))?;
        pipeline = pipeline.with_probe(Arc::new(probe));
    }

    let mut cancel = CancelToken::new();
    if let Some(secs) = pipeline_config.orchestrator.deadline_secs {
        cancel = cancel.with_timeout(Duration::from_secs(secs));
    }
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, waiting for in-flight units");
            interrupt.cancel();
        }
    });

    let units = pipeline.build_units(&config.cohorts, &config.templates);
    info!(
        cohorts = config.cohorts.len(),
        templates = config.templates.len(),
        units = units.len(),
        "prepared generation units"
    );

    let run = pipeline.run(units, &cancel).await;
    let dir = output::export_run(&run, &config.output.dir)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&run.stats)?);
    } else {
        output::print_run_summary(&run, Some(&dir));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dyk_core::Cohort;
    use std::path::PathBuf;

    fn config() -> Config {
        let mut config = Config::default();
        config.cohorts = vec![
            Cohort::new("c", "Third").with_priority(3),
            Cohort::new("a", "First").with_priority(1),
            Cohort::new("b", "Second").with_priority(2),
        ];
        config.pipeline.validator.probe_urls = true;
        config
    }

    #[test]
    fn test_no_flags_change_nothing() {
        let mut config = config();
        apply_overrides(&mut config, &RunArgs::default());

        assert_eq!(config.cohorts.len(), 3);
        assert_eq!(config.cohorts[0].id, "c");
        assert!(config.pipeline.validator.probe_urls);
        assert!(!config.pipeline.evaluate);
        assert!(!config.pipeline.rewrite);
        assert!(config.pipeline.orchestrator.deadline_secs.is_none());
    }

    #[test]
    fn test_max_cohorts_keeps_most_important() {
        let mut config = config();
        let args = RunArgs {
            max_cohorts: Some(2),
            ..RunArgs::default()
        };
        apply_overrides(&mut config, &args);

        let ids: Vec<&str> = config.cohorts.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = config();
        let args = RunArgs {
            output_dir: Some(PathBuf::from("/tmp/dyk-runs")),
            deadline_secs: Some(30),
            no_probe: true,
            evaluate: true,
            rewrite: Some(2),
            ..RunArgs::default()
        };
        apply_overrides(&mut config, &args);

        assert_eq!(config.output.dir, PathBuf::from("/tmp/dyk-runs"));
        assert_eq!(config.pipeline.orchestrator.deadline_secs, Some(30));
        assert!(!config.pipeline.validator.probe_urls);
        assert!(config.pipeline.evaluate);
        assert!(config.pipeline.rewrite);
        assert_eq!(config.pipeline.variations_per_insight, 2);
    }

    #[tokio::test]
    async fn test_run_without_api_key_fails_early() {
        let mut config = config();
        config.templates = vec![dyk_core::InsightTemplate::new("t", "")];
        config.openrouter.api_key = None;

        let err = execute(RunArgs::default(), config).await.unwrap_err();
        assert!(err.to_string().contains("API key"));
    }
}
