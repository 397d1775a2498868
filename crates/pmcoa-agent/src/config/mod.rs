//! Configuration loading for pmcoa.
//! Reads pmcoa.toml from the current directory or the path in the PMCOA_CONFIG env var.

use anyhow::Context;
use pmcoa_db::{DEFAULT_COLLECTION, DEFAULT_COMPACT_EVERY};
use pmcoa_ingestion::{worker_count_for, PipelineConfig, DEFAULT_ESTIMATED_TOTAL, DEFAULT_WORKER_FRACTION};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "PMCOA_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "pmcoa.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Lance,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// LanceDB appends between compactions of the collection.
    #[serde(default = "default_compact_every")]
    pub compact_every: u64,
}

fn default_backend()    -> StoreBackend { StoreBackend::Lance }
fn default_store_path() -> PathBuf      { PathBuf::from("./data/biomedical") }
fn default_collection() -> String       { DEFAULT_COLLECTION.to_string() }
fn default_compact_every() -> u64       { DEFAULT_COMPACT_EVERY }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
            collection: default_collection(),
            compact_every: default_compact_every(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    #[serde(default = "default_archive_pattern")]
    pub archive_pattern: String,
    /// Fixed worker count; derived from `worker_fraction` when unset.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_worker_fraction")]
    pub worker_fraction: f64,
    /// Job channel capacity; equals the worker count when unset.
    #[serde(default)]
    pub job_capacity: Option<usize>,
    #[serde(default = "default_estimated_total")]
    pub estimated_total: u64,
    #[serde(default = "bool_true")]
    pub show_progress: bool,
}

fn default_archive_dir()     -> PathBuf { PathBuf::from("download_scripts") }
fn default_archive_pattern() -> String  { "*tar.gz".to_string() }
fn default_worker_fraction() -> f64     { DEFAULT_WORKER_FRACTION }
fn default_estimated_total() -> u64     { DEFAULT_ESTIMATED_TOTAL }
fn bool_true()               -> bool    { true }

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            archive_dir: default_archive_dir(),
            archive_pattern: default_archive_pattern(),
            workers: None,
            worker_fraction: default_worker_fraction(),
            job_capacity: None,
            estimated_total: default_estimated_total(),
            show_progress: bool_true(),
        }
    }
}

impl IngestionConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| worker_count_for(self.worker_fraction))
    }
}

mod tests;

impl Config {
    /// Load configuration from pmcoa.toml.
    /// Checks PMCOA_CONFIG env var first, then current directory. A missing
    /// file yields the defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!("No config file at {}; using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config in {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let ing = &self.ingestion;
        if ing.workers == Some(0) {
            anyhow::bail!("ingestion.workers must be at least 1");
        }
        if ing.job_capacity == Some(0) {
            anyhow::bail!("ingestion.job_capacity must be at least 1");
        }
        if !(ing.worker_fraction > 0.0 && ing.worker_fraction <= 1.0) {
            anyhow::bail!(
                "ingestion.worker_fraction must be in (0, 1], got {}",
                ing.worker_fraction
            );
        }
        if self.store.compact_every == 0 {
            anyhow::bail!("store.compact_every must be at least 1");
        }
        if self.store.collection.trim().is_empty() {
            anyhow::bail!("store.collection must not be empty");
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let workers = self.ingestion.worker_count();
        PipelineConfig {
            workers,
            job_capacity: self.ingestion.job_capacity.unwrap_or(workers),
            estimated_total: self.ingestion.estimated_total,
            show_progress: self.ingestion.show_progress,
        }
    }
}
