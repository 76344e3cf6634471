//! Similarity ratio between two texts, as the deduplicator sees them.

use anyhow::{Result, bail};
use colored::Colorize;
use dyk_core::config::DedupConfig;
use dyk_core::dedup::{normalize, similarity_ratio};

use crate::cli::SimilarityArgs;

pub fn ratio(a: &str, b: &str) -> f64 {
    similarity_ratio(&normalize(a), &normalize(b))
}

pub fn execute(args: SimilarityArgs) -> Result<()> {
    let threshold = args.threshold.unwrap_or(DedupConfig::default().threshold);
    if !(0.0..=1.0).contains(&threshold) {
        bail!("Threshold must be between 0 and 1");
    }

    let r = ratio(&args.a, &args.b);
    let verdict = if r >= threshold {
        "duplicate".red().bold()
    } else {
        "distinct".green().bold()
    };
    println!("{:.4} {} (threshold {:.2})", r, verdict, threshold);
    Ok(())
}
