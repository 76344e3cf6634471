//! Configuration management for dyk.
//!
//! Configuration is loaded from multiple sources with precedence:
//! 1. Environment variables (secrets: `OPENROUTER_API_KEY`, `PUBMED_EMAIL`, `PUBMED_API_KEY`)
//! 2. Config file (`--config`, `DYK_CONFIG`, or `./dyk.toml`)
//! 3. Default values

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use dyk_core::client::DEFAULT_BASE_URL;
use dyk_core::{Cohort, InsightTemplate, PipelineConfig};
use serde::{Deserialize, Serialize};

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "dyk.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote text-service connection
    pub openrouter: OpenRouterConfig,

    /// Run output settings
    pub output: OutputConfig,

    /// Pipeline tuning
    pub pipeline: PipelineConfig,

    /// Target audience segments
    pub cohorts: Vec<Cohort>,

    /// Insight kinds requested for every cohort
    pub templates: Vec<InsightTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenRouterConfig {
    pub base_url: String,

    /// Prefer `OPENROUTER_API_KEY` over storing the key here
    pub api_key: Option<String>,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Base directory; each run writes into its own subdirectory
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// An explicit path must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Config::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Overlay secrets from the environment. `lookup` is `std::env::var` in
    /// production.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("OPENROUTER_API_KEY") {
            self.openrouter.api_key = Some(key);
        }
        if let Some(email) = non_empty("PUBMED_EMAIL") {
            self.pipeline.evidence.email = Some(email);
        }
        if let Some(key) = non_empty("PUBMED_API_KEY") {
            self.pipeline.evidence.api_key = Some(key);
        }
    }

    /// The generation API key, or an error explaining where to set it.
    pub fn api_key(&self) -> Result<&str> {
        match self.openrouter.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => bail!("No API key configured. Set OPENROUTER_API_KEY or openrouter.api_key"),
        }
    }

    /// Check the file describes a runnable job.
    pub fn validate_run(&self) -> Result<()> {
        self.pipeline.validate().context("Invalid pipeline configuration")?;
        if self.cohorts.is_empty() {
            bail!("No cohorts configured");
        }
        if self.templates.is_empty() {
            bail!("No templates configured");
        }
        Ok(())
    }
}
