//! Error types for each pipeline stage.

use pmcoa_db::DbError;
use std::path::PathBuf;
use thiserror::Error;

/// Failure while extracting documents from one archive. Aborts that archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("cannot open archive {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read archive {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("entry {entry} in {path} is not valid UTF-8")]
    Decode { path: PathBuf, entry: String },

    #[error("archive {0} has already been read")]
    AlreadyConsumed(PathBuf),

    #[error("invalid archive pattern {pattern}: {message}")]
    Pattern { pattern: String, message: String },
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("channel closed")]
    Closed,
}

/// Document parser failure.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("missing expected field: {0}")]
    MissingField(&'static str),

    #[error("malformed XML: {0}")]
    Xml(String),
}

/// Why a document was dropped without writing anything.
#[derive(Debug, Error)]
pub enum SkipReason {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("parser panicked: {0}")]
    ParserPanicked(String),
}

/// Outcome of a failed `index` call.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Per-document: drop it and carry on.
    #[error("document skipped: {0}")]
    Skip(#[from] SkipReason),

    /// Store write failed; the owning worker stops.
    #[error("store write failed: {0}")]
    Fatal(#[from] DbError),
}

impl From<ParseError> for IndexError {
    fn from(err: ParseError) -> Self {
        IndexError::Skip(SkipReason::Parse(err))
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker {worker} stopped on {entry}: {source}")]
    Fatal {
        worker: usize,
        entry: String,
        #[source]
        source: DbError,
    },

    #[error("worker {worker} panicked: {message}")]
    Panicked { worker: usize, message: String },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {0}")]
    Config(String),

    #[error("failed to open store connection {slot}: {source}")]
    Store {
        slot: usize,
        #[source]
        source: DbError,
    },
}
