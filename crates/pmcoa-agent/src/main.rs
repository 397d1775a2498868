//! pmcoa: bulk loader for the PubMed Central Open Access subset.
//! Entry point for the ingestion binary.

mod config;

use anyhow::Context;
use config::{Config, StoreBackend};
use pmcoa_db::{DocumentStore, LanceStore, MemoryStore};
use pmcoa_ingestion::{discover_archives, DocumentParser, JatsParser, Pipeline, RunSummary};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Used when RUST_LOG is unset. Per-document events are at debug level.
const DEFAULT_LOG_FILTER: &str = "pmcoa=info,warn";

/// Open the configured store. The LanceDB handle is returned separately for
/// post-run maintenance.
async fn open_store(config: &Config) -> anyhow::Result<(Arc<dyn DocumentStore>, Option<Arc<LanceStore>>)> {
    match config.store.backend {
        StoreBackend::Lance => {
            info!("Opening LanceDB store at {}...", config.store.path.display());
            let store = LanceStore::open(&config.store.path, config.store.collection.clone())
                .await
                .with_context(|| format!("opening store at {}", config.store.path.display()))?
                .with_compaction_interval(config.store.compact_every);
            let store = Arc::new(store);
            let shared: Arc<dyn DocumentStore> = store.clone();
            Ok((shared, Some(store)))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store; nothing will be persisted.");
            let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
            Ok((store, None))
        }
    }
}

async fn compact(lance: &LanceStore) {
    info!("Compacting LanceDB dataset...");
    if let Err(e) = lance.optimize().await {
        warn!("Compaction failed: {}", e);
    }
    match lance.stats().await {
        Ok(stats) => info!("Collection now holds {} articles.", stats.articles),
        Err(e) => warn!("Could not read collection stats: {}", e),
    }
}

/// First Ctrl-C cancels the run; workers and the dispatcher wind down.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, cancelling ingestion...");
                cancel.cancel();
            }
            Err(e) => error!("Could not listen for Ctrl-C: {}", e),
        }
    });
}

fn report(summary: &RunSummary) {
    info!(
        "Archives: {} done, {} failed. Documents: {} dispatched, {} indexed, {} skipped in {} ms.",
        summary.archives_completed,
        summary.archive_failures.len(),
        summary.documents_dispatched,
        summary.indexed,
        summary.skipped,
        summary.duration_ms
    );
    for failure in &summary.archive_failures {
        warn!(archive = %failure.archive.display(), dispatched = failure.dispatched, "Archive failed: {}", failure.error);
    }
    for failure in &summary.worker_failures {
        error!("{}", failure);
    }
    match serde_json::to_string(summary) {
        Ok(json) => tracing::debug!(summary = %json, "Run summary"),
        Err(e) => warn!("Could not serialize run summary: {}", e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    info!("pmcoa starting up...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    let pipeline_config = config.pipeline_config();
    info!(
        "Configuration loaded. Store: {:?} ({}), workers: {}, job capacity: {}",
        config.store.backend,
        config.store.collection,
        pipeline_config.workers,
        pipeline_config.job_capacity
    );

    let archives = discover_archives(&config.ingestion.archive_dir, &config.ingestion.archive_pattern)
        .context("discovering archives")?;
    if archives.is_empty() {
        warn!(
            "No archives matching {} in {}",
            config.ingestion.archive_pattern,
            config.ingestion.archive_dir.display()
        );
    } else {
        info!("Found {} archives in {}", archives.len(), config.ingestion.archive_dir.display());
    }

    let (store, lance) = open_store(&config).await?;
    let parser: Arc<dyn DocumentParser> = Arc::new(JatsParser::new());

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let pipeline = Pipeline::new(pipeline_config, store, parser).with_cancellation(cancel);
    let summary = pipeline.run(&archives).await?;
    report(&summary);

    if let Some(lance) = lance {
        if summary.indexed > 0 {
            compact(&lance).await;
        }
    }

    if summary.cancelled {
        anyhow::bail!("ingestion cancelled after {} documents", summary.progress.completed());
    }
    if !summary.worker_failures.is_empty() {
        anyhow::bail!("{} workers stopped on store errors", summary.worker_failures.len());
    }

    info!("Ingestion finished.");
    Ok(())
}
