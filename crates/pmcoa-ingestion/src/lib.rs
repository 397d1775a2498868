//! pmcoa-ingestion: bulk loader for PubMed Central Open Access archives.
//!
//! Data flow:
//! - Archive discovery and lazy tar extraction (`archive`)
//! - Bounded job channel with backpressure (`queue`)
//! - Pool of store connections shared by workers (`pool`)
//! - JATS paragraph parsing (`parser`) and record assembly (`indexer`)
//! - Worker loop (`worker`) and progress side channel (`progress`)
//! - Dispatcher driving the whole run (`pipeline`)

pub mod archive;
pub mod error;
pub mod indexer;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod queue;
pub mod worker;

pub use archive::{discover_archives, ArchiveReader};
pub use error::{ArchiveError, IndexError, ParseError, PipelineError, QueueError, SkipReason, WorkerError};
pub use indexer::{assemble, canonical_id, clean_text, IndexerResource};
pub use models::{IndexedDocument, ParagraphRecord, RawDocument};
pub use parser::{DocumentParser, JatsParser};
pub use pipeline::{
    default_worker_count, worker_count_for, ArchiveFailure, Pipeline, PipelineConfig, RunSummary,
    DEFAULT_ESTIMATED_TOTAL, DEFAULT_WORKER_FRACTION,
};
pub use pool::{Pooled, ResourcePool};
pub use progress::{ProgressAggregator, ProgressEvent, ProgressSender, ProgressSummary, WorkerExit};
pub use queue::{job_queue, Job, JobReceiver, JobSender};
pub use worker::{Worker, WorkerReport};
