//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// DYK Insights CLI
///
/// Generate, validate and score cohort-targeted health insights.
#[derive(Parser, Debug)]
#[command(name = "dyk")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (defaults to ./dyk.toml)
    #[arg(short, long, global = true, env = "DYK_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate insights for every cohort and template, then filter them
    Run(RunArgs),

    /// Re-run validation, deduplication and scoring over an insight file
    Validate(ValidateArgs),

    /// Print the similarity ratio between two texts
    Similarity(SimilarityArgs),

    /// Show version
    Version,
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Only use the N most important cohorts
    #[arg(long)]
    pub max_cohorts: Option<usize>,

    /// Directory for run output (overrides the config file)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Stop admitting new generation work after this many seconds
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Disable source URL liveness probes
    #[arg(long)]
    pub no_probe: bool,

    /// Run the model-graded evaluation pass over final insights
    #[arg(long)]
    pub evaluate: bool,

    /// Rewrite each final insight into this many creative variations
    #[arg(long, value_name = "N")]
    pub rewrite: Option<usize>,

    /// Print run statistics as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// JSON file of insights (an exported run file or a list of drafts)
    pub input: PathBuf,

    /// Write the report to this directory
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SimilarityArgs {
    pub a: String,
    pub b: String,

    /// Threshold to compare against (defaults to the dedup default)
    #[arg(short, long)]
    pub threshold: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "dyk",
            "run",
            "--config",
            "run.toml",
            "--max-cohorts",
            "5",
            "--deadline-secs",
            "600",
            "--no-probe",
            "--evaluate",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("run.toml")));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.max_cohorts, Some(5));
                assert_eq!(args.deadline_secs, Some(600));
                assert!(args.no_probe);
                assert!(args.evaluate);
                assert!(!args.json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_similarity() {
        let cli = Cli::try_parse_from(["dyk", "similarity", "abc", "abd", "-t", "0.5"]).unwrap();
        match cli.command {
            Commands::Similarity(args) => {
                assert_eq!(args.a, "abc");
                assert_eq!(args.threshold, Some(0.5));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
