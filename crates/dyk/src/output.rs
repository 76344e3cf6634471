//! Run export and terminal summaries.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use dyk_core::pipeline::{GateReport, PipelineRun, UnitStatus};
use dyk_core::RunStats;
use serde::Serialize;

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Write every collection of a run to `<base>/<timestamp>_<run id prefix>/`.
pub fn export_run(run: &PipelineRun, base: &Path) -> Result<PathBuf> {
    let id = run.run_id.simple().to_string();
    let dir = base.join(format!("{}_{}", run.started_at.format("%Y%m%d_%H%M%S"), &id[..8]));
    std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    write_json(&dir.join("units.json"), &run.units)?;
    write_json(&dir.join("raw_insights.json"), &run.raw)?;
    write_json(&dir.join("validations.json"), &run.validations)?;
    write_json(&dir.join("duplicates.json"), &run.duplicates)?;
    write_json(&dir.join("scores.json"), &run.scores)?;
    write_json(&dir.join("final_insights.json"), &run.final_insights)?;
    write_json(&dir.join("run_stats.json"), &RunManifest::from(run))?;

    Ok(dir)
}

#[derive(Serialize)]
struct RunManifest<'a> {
    run_id: String,
    started_at: String,
    finished_at: String,
    stats: &'a RunStats,
}

impl<'a> From<&'a PipelineRun> for RunManifest<'a> {
    fn from(run: &'a PipelineRun) -> Self {
        Self {
            run_id: run.run_id.to_string(),
            started_at: run.started_at.to_rfc3339(),
            finished_at: run.finished_at.to_rfc3339(),
            stats: &run.stats,
        }
    }
}

/// Write a quality-gate report to `dir`.
pub fn export_gate(report: &GateReport, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    write_json(&dir.join("validations.json"), &report.validations)?;
    write_json(&dir.join("duplicates.json"), &report.duplicates)?;
    write_json(&dir.join("scores.json"), &report.scores)?;
    write_json(&dir.join("final_insights.json"), &report.final_insights)?;
    Ok(())
}

fn row(label: &str, value: impl std::fmt::Display) {
    println!("  {:<22} {}", label, value);
}

pub fn print_run_summary(run: &PipelineRun, dir: Option<&Path>) {
    let stats = &run.stats;
    println!("{}", "DYK Run Summary".cyan().bold());
    println!("{}", "─".repeat(50));
    row("Run", run.run_id);

    println!();
    println!("{}", "Generation".bold());
    row("Units", stats.units_total);
    row("Succeeded", stats.units_succeeded.to_string().green());
    if stats.units_failed > 0 {
        row("Failed", stats.units_failed.to_string().red());
        for (category, count) in &stats.failures {
            row(&format!("  {}", category), count);
        }
    }
    for report in run.units.iter().filter(|u| u.status == UnitStatus::Failed) {
        println!(
            "    {} {} / {}: {}",
            "✗".red(),
            report.unit.cohort_id,
            report.unit.template_id,
            report.error.as_deref().unwrap_or("unknown error")
        );
    }

    println!();
    println!("{}", "Quality gate".bold());
    row("Generated", stats.insights_generated);
    row("Validated", stats.insights_validated);
    row("Duplicates", stats.duplicates_removed);
    row("Clusters", stats.dedup.clusters);
    row("Final", stats.final_count.to_string().green().bold());

    if stats.rewrites_succeeded + stats.rewrites_failed > 0 {
        println!();
        println!("{}", "Rewriting".bold());
        row("Rewritten", stats.rewrites_succeeded);
        row("Failed", stats.rewrites_failed);
        row("Variants", stats.variants_created);
    }

    if stats.evaluations_succeeded + stats.evaluations_failed > 0 {
        println!();
        println!("{}", "Evaluation".bold());
        row("Evaluated", stats.evaluations_succeeded);
        row("Failed", stats.evaluations_failed);
    }

    println!();
    row("Duration", format!("{:.1}s", stats.timings.total_ms as f64 / 1000.0));
    if let Some(dir) = dir {
        row("Output", dir.display());
    }
}

pub fn print_gate_summary(report: &GateReport, total: usize) {
    println!("{}", "DYK Validation Report".cyan().bold());
    println!("{}", "─".repeat(50));
    row("Insights", total);
    row("Validated", report.validations.iter().filter(|v| v.validated).count());
    row("Duplicates", report.dedup.marked_duplicates);
    row("Final", report.final_insights.len().to_string().green().bold());

    let rejected: Vec<_> = report.validations.iter().filter(|v| !v.validated).collect();
    if !rejected.is_empty() {
        println!();
        println!("{}", "Rejected".bold());
        for result in rejected {
            println!("  {} {} ({:.0})", "✗".red(), result.insight_id, result.aggregate);
            for issue in result.all_issues() {
                println!("      {}", issue.yellow());
            }
        }
    }
}
