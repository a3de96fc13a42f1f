//! Error taxonomy for the sync and split pipelines.
//!
//! Per-file and per-connection failures are captured as [`SyncError`] inside a
//! [`RunResult`](crate::sync_engine::RunResult) and never abort sibling work. The
//! only sync-phase error that reaches the entry point is [`AggregateError`].

use serde::Serialize;
use thiserror::Error;

use crate::sync_engine::RunResult;

/// Boxed failure returned by external collaborators (transport, store, trigger).
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// Connection establishment failed on every attempt.
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[error("all {attempts} connection attempts failed: {message}")]
pub struct ConnectionError {
    pub attempts: u32,
    /// Message of the last underlying failure.
    pub message: String,
}

/// A caller-supplied deadline passed while an operation was in flight.
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[error("deadline exceeded during {operation}")]
pub struct TimeoutError {
    pub operation: String,
}

/// Failure of a list/get/put/delete step against a remote endpoint or the store.
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[error("{operation} failed for '{path}': {message}")]
pub struct TransferError {
    pub operation: TransferOp,
    pub path: String,
    pub message: String,
}

impl TransferError {
    pub fn new(operation: TransferOp, path: impl Into<String>, source: impl ToString) -> Self {
        Self {
            operation,
            path: path.into(),
            message: source.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferOp {
    List,
    Download,
    Upload,
    Read,
    Write,
    Delete,
    MakeDir,
    Cleanup,
}

impl std::fmt::Display for TransferOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransferOp::List => "list",
            TransferOp::Download => "download",
            TransferOp::Upload => "upload",
            TransferOp::Read => "read",
            TransferOp::Write => "write",
            TransferOp::Delete => "delete",
            TransferOp::MakeDir => "mkdir",
            TransferOp::Cleanup => "cleanup",
        };
        f.write_str(s)
    }
}

/// Everything that can stop one connection's sync.
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SyncError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("scratch directory error: {0}")]
    Scratch(String),
}

/// Raised by the run-status validator; carries every failed run, not just the first.
#[derive(Debug, Clone, Error)]
#[error("{} connection(s) failed: {}", failures.len(), failed_names(failures))]
pub struct AggregateError {
    pub failures: Vec<RunResult>,
}

fn failed_names(failures: &[RunResult]) -> String {
    failures
        .iter()
        .map(|r| r.connection_name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SplitError {
    /// Transaction bodies were found but there is no `~GE*` group-end marker.
    #[error("interchange '{0}' has transactions but no group-end (~GE*) footer")]
    MissingFooter(String),
}

/// One raw file of a batch that could not be split. Its siblings are unaffected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{blob}: {message}")]
pub struct SplitFailure {
    pub blob: String,
    pub message: String,
}

fn joined<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error of a per-document-type entry point.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error("{} file(s) could not be split: {}", .0.len(), joined(.0))]
    SplitBatch(Vec<SplitFailure>),
    /// More than one phase of a run failed, in order: validation first, then
    /// whatever failed downstream of the sync.
    #[error("run failed in {} places: {}", .0.len(), joined(.0))]
    Multiple(Vec<PipelineError>),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("object store error: {0}")]
    Store(#[from] TransferError),
    #[error("pipeline trigger failed for {document_type}: {message}")]
    Trigger {
        document_type: String,
        message: String,
    },
    #[error("configuration error: {0}")]
    Config(String),
}
