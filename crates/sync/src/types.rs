//! Data types for sync runs.

use std::collections::BTreeMap;
use std::path::PathBuf;

use emdash_protocol::RecordRef;
use serde::Serialize;

use crate::error::FailureKind;
use crate::handler::HandlerKind;
use crate::retry::RetryPolicy;
use crate::transport::FetchOptions;

/// Default number of concurrent transfers.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Default number of records per `binary.find` request.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default ceiling on records collected by one traversal.
pub const DEFAULT_MAX_NODES: usize = 10_000;

/// Tunables shared by every stage of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub concurrency: usize,
    pub batch_size: usize,
    pub max_nodes: usize,
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            max_nodes: DEFAULT_MAX_NODES,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Worker count, never below one.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }

    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Download,
    Upload,
}

/// Lifecycle of one task: `Pending -> InProgress -> {Done, Skipped, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Skipped,
    Failed,
}

/// One unit of work in a run.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferTask {
    pub id: usize,
    pub direction: Direction,
    /// Local path for uploads, binary name for downloads.
    pub item: String,
    pub target: Option<RecordRef>,
    pub rectype: Option<String>,
    pub params: BTreeMap<String, String>,
    pub status: TaskStatus,
}

/// Stage a run was in when a stage-level failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Resolving,
    Locating,
    Transferring,
}

/// Run phases: `Idle -> Resolving -> Locating -> Transferring -> Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "phase")]
pub enum RunPhase {
    Idle,
    Resolving,
    Locating,
    Transferring,
    Done,
    /// Finished with a usable partial result after a stage-level failure.
    Failed { stage: Stage },
}

/// A failed item with its kind and reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItem {
    pub item: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// Result of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub succeeded: Vec<(String, RecordRef)>,
    pub skipped: Vec<String>,
    pub failed: Vec<FailedItem>,
    pub phase: RunPhase,
}

impl Default for Report {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            phase: RunPhase::Idle,
        }
    }
}

impl Report {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn failure_for(&self, item: &str) -> Option<&FailedItem> {
        self.failed.iter().find(|f| f.item == item)
    }
}

/// Progress published while a run executes.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    PhaseChanged(RunPhase),
    TaskStarted {
        id: usize,
        item: String,
    },
    TaskFinished {
        id: usize,
        item: String,
        status: TaskStatus,
        record: Option<RecordRef>,
        error: Option<String>,
    },
}

/// Parameters of a download run.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub names: Vec<RecordRef>,
    /// Relation levels below the roots; negative means unbounded.
    pub recurse: i32,
    pub dest_dir: PathBuf,
    pub options: FetchOptions,
}

/// Parameters of an upload run.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub target: RecordRef,
    pub paths: Vec<PathBuf>,
    pub handler: HandlerKind,
    pub rectype: Option<String>,
    /// Caller-supplied fields; they override extracted values.
    pub params: BTreeMap<String, String>,
    /// Form field name for the file part; `None` uses the default.
    pub param: Option<String>,
}
