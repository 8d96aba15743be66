//! Batch runs over the resolver, locator and transport.
//!
//! A run turns a request into tasks, executes them on a bounded pool and
//! aggregates the outcome into a [`Report`]. One task failing never stops
//! its siblings; only configuration errors abort a run.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use emdash_protocol::{BinaryDescriptor, RecordRef};
use emdash_transfer::SidecarStore;
use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{FailureKind, SyncError};
use crate::locator::BinaryLocator;
use crate::remote::RecordApi;
use crate::resolver::RelationResolver;
use crate::session::Session;
use crate::transport::{
    FetchOptions, FetchOutcome, FileTransport, UploadJob, UploadOutcome, destination_name,
};
use crate::types::{
    Direction, DownloadRequest, FailedItem, Report, RunPhase, Stage, SyncConfig, SyncEvent,
    TaskStatus, TransferTask, UploadRequest,
};

/// Outcome of one task, before it is folded into the report.
enum TaskResult {
    Done(RecordRef),
    Skipped,
    Failed(SyncError),
}

/// Runs download and upload batches against one remote.
pub struct SyncOrchestrator {
    api: Arc<dyn RecordApi>,
    session: Arc<Session>,
    sidecar: SidecarStore,
    config: SyncConfig,
    events_tx: mpsc::Sender<SyncEvent>,
    events_rx: Option<mpsc::Receiver<SyncEvent>>,
    cancel: CancellationToken,
}

impl SyncOrchestrator {
    pub fn new(
        api: Arc<dyn RecordApi>,
        session: Arc<Session>,
        sidecar: SidecarStore,
        config: SyncConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            api,
            session,
            sidecar,
            config,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.events_rx.take()
    }

    /// Returns the cancellation token shared by every run.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn sidecar(&self) -> &SidecarStore {
        &self.sidecar
    }

    fn emit(&self, event: SyncEvent) {
        // A full or unclaimed channel must not stall the run.
        let _ = self.events_tx.try_send(event);
    }

    fn set_phase(&self, report: &mut Report, phase: RunPhase) {
        report.phase = phase;
        self.emit(SyncEvent::PhaseChanged(phase));
    }

    fn transport(&self) -> FileTransport<'_> {
        FileTransport::new(self.api.as_ref(), &self.session, &self.sidecar, &self.config)
    }

    /// Downloads every binary attached to `request.names` and, depending on
    /// `request.recurse`, to their descendants.
    pub async fn download(&self, request: DownloadRequest) -> Result<Report, SyncError> {
        self.session.current_context().await?;
        let mut report = Report::default();
        let mut stage_failure = None;

        self.set_phase(&mut report, RunPhase::Resolving);
        let expansion = RelationResolver::new(self.api.as_ref(), &self.session, &self.config)
            .expand(&request.names, request.recurse, &self.cancel)
            .await?;
        if expansion.truncated {
            warn!(
                records = expansion.records.len(),
                max_nodes = self.config.max_nodes,
                "traversal truncated"
            );
            stage_failure.get_or_insert(Stage::Resolving);
        }
        for f in expansion.failed {
            warn!(root = %f.root, record = %f.record, error = %f.reason, "branch dropped");
            stage_failure.get_or_insert(Stage::Resolving);
            report.failed.push(FailedItem {
                item: f.record.to_string(),
                kind: f.kind,
                reason: format!("under {}: {}", f.root, f.reason),
            });
        }

        self.set_phase(&mut report, RunPhase::Locating);
        let located = BinaryLocator::new(self.api.as_ref(), &self.session, &self.config)
            .locate(&expansion.records, &self.cancel)
            .await?;
        for f in located.failed {
            stage_failure.get_or_insert(Stage::Locating);
            report.failed.push(FailedItem {
                item: f.record.to_string(),
                kind: f.kind,
                reason: f.reason,
            });
        }
        info!(
            records = expansion.records.len(),
            binaries = located.binaries.len(),
            "located binaries"
        );

        self.set_phase(&mut report, RunPhase::Transferring);
        let options = request.options;
        let binaries = claim_destinations(&located.binaries, &options, &mut report);
        let tasks: Vec<TransferTask> = binaries
            .iter()
            .enumerate()
            .map(|(id, d)| TransferTask {
                id,
                direction: Direction::Download,
                item: d.name.to_string(),
                target: Some(d.record.clone()),
                rectype: None,
                params: Default::default(),
                status: TaskStatus::Pending,
            })
            .collect();

        let transport = self.transport();
        let dest_dir = request.dest_dir.as_path();
        let mut results: Vec<(TransferTask, TaskResult)> = stream::iter(
            tasks.into_iter().zip(binaries.iter().copied()),
        )
        .map(|(task, descriptor)| {
            let transport = &transport;
            async move {
                self.run_task(task, async move {
                    match transport
                        .fetch(descriptor, dest_dir, options, &self.cancel)
                        .await?
                    {
                        FetchOutcome::Fetched(_) => Ok(TaskResult::Done(descriptor.record.clone())),
                        FetchOutcome::SkippedExists(_) => Ok(TaskResult::Skipped),
                    }
                })
                .await
            }
        })
        .buffer_unordered(self.config.effective_concurrency())
        .collect()
        .await;
        results.sort_by_key(|(task, _)| task.id);

        self.finish(report, results, stage_failure)
    }

    /// Uploads `request.paths` to `request.target` with the requested
    /// handler.
    pub async fn upload(&self, request: UploadRequest) -> Result<Report, SyncError> {
        request.handler.validate(request.rectype.as_deref())?;
        self.session.current_context().await?;
        let mut report = Report::default();

        let paths = dedupe_paths(&request.paths);
        self.set_phase(&mut report, RunPhase::Transferring);

        let tasks: Vec<TransferTask> = paths
            .iter()
            .enumerate()
            .map(|(id, path)| TransferTask {
                id,
                direction: Direction::Upload,
                item: path.display().to_string(),
                target: Some(request.target.clone()),
                rectype: request.rectype.clone(),
                params: request.params.clone(),
                status: TaskStatus::Pending,
            })
            .collect();

        let transport = self.transport();
        let request = &request;
        let mut results: Vec<(TransferTask, TaskResult)> =
            stream::iter(tasks.into_iter().zip(paths))
                .map(|(task, path)| {
                    let transport = &transport;
                    async move {
                        let job = UploadJob {
                            path,
                            target: request.target.clone(),
                            handler: request.handler,
                            rectype: request.rectype.clone(),
                            param: request.param.clone(),
                            params: request.params.clone(),
                        };
                        self.run_task(task, async move {
                            match transport.upload(&job, &self.cancel).await? {
                                UploadOutcome::Uploaded(r) => Ok(TaskResult::Done(r)),
                                UploadOutcome::AlreadyUploaded(_) => Ok(TaskResult::Skipped),
                            }
                        })
                        .await
                    }
                })
                .buffer_unordered(self.config.effective_concurrency())
                .collect()
                .await;
        results.sort_by_key(|(task, _)| task.id);

        self.finish(report, results, None)
    }

    /// Runs one task unless the run was cancelled, publishing its start and
    /// finish.
    async fn run_task<F>(&self, mut task: TransferTask, work: F) -> (TransferTask, TaskResult)
    where
        F: Future<Output = Result<TaskResult, SyncError>>,
    {
        if self.cancel.is_cancelled() {
            task.status = TaskStatus::Failed;
            return (task, TaskResult::Failed(SyncError::cancelled()));
        }

        task.status = TaskStatus::InProgress;
        self.emit(SyncEvent::TaskStarted {
            id: task.id,
            item: task.item.clone(),
        });

        let result = match work.await {
            Ok(result) => result,
            Err(e) => TaskResult::Failed(e),
        };
        let (status, record, error) = match &result {
            TaskResult::Done(r) => (TaskStatus::Done, Some(r.clone()), None),
            TaskResult::Skipped => (TaskStatus::Skipped, None, None),
            TaskResult::Failed(e) => (TaskStatus::Failed, None, Some(e.to_string())),
        };
        task.status = status;
        self.emit(SyncEvent::TaskFinished {
            id: task.id,
            item: task.item.clone(),
            status,
            record,
            error,
        });
        (task, result)
    }

    fn finish(
        &self,
        mut report: Report,
        results: Vec<(TransferTask, TaskResult)>,
        mut stage_failure: Option<Stage>,
    ) -> Result<Report, SyncError> {
        for (task, result) in results {
            match result {
                TaskResult::Done(record) => report.succeeded.push((task.item, record)),
                TaskResult::Skipped => report.skipped.push(task.item),
                TaskResult::Failed(e) if e.is_config() => return Err(e),
                TaskResult::Failed(e) => {
                    error!(item = %task.item, error = %e, "task failed");
                    if let Some(kind) = e.kind() {
                        report.failed.push(FailedItem {
                            item: task.item,
                            kind,
                            reason: e.reason().to_string(),
                        });
                    }
                }
            }
        }
        if self.cancel.is_cancelled() {
            stage_failure.get_or_insert(Stage::Transferring);
        }

        let phase = match stage_failure {
            Some(stage) => RunPhase::Failed { stage },
            None => RunPhase::Done,
        };
        self.set_phase(&mut report, phase);
        info!(
            succeeded = report.succeeded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "run finished"
        );
        Ok(report)
    }
}

/// Keeps the first binary for each destination file name, in binary name
/// order. Later binaries that would land on the same file are reported as
/// failed and never dispatched.
fn claim_destinations<'a>(
    binaries: &'a [BinaryDescriptor],
    options: &FetchOptions,
    report: &mut Report,
) -> Vec<&'a BinaryDescriptor> {
    let mut ordered: Vec<&BinaryDescriptor> = binaries.iter().collect();
    ordered.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));

    let mut claimed: HashMap<String, &RecordRef> = HashMap::new();
    let mut dispatch = Vec::with_capacity(ordered.len());
    for d in ordered {
        match claimed.entry(destination_name(d, options)) {
            Entry::Vacant(slot) => {
                slot.insert(&d.name);
                dispatch.push(d);
            }
            Entry::Occupied(slot) => {
                warn!(
                    binary = %d.name,
                    file = %slot.key(),
                    owner = %slot.get(),
                    "destination already claimed"
                );
                report.failed.push(FailedItem {
                    item: d.name.to_string(),
                    kind: FailureKind::LocalIo,
                    reason: format!(
                        "destination {} already claimed by {}",
                        slot.key(),
                        slot.get()
                    ),
                });
            }
        }
    }
    dispatch
}

/// Canonical form used to detect the same file named twice.
fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Drops later occurrences of paths naming the same file.
fn dedupe_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(paths.len());
    for path in paths {
        if seen.insert(normalize(path)) {
            unique.push(path.clone());
        } else {
            debug!(path = %path.display(), "duplicate path dropped");
        }
    }
    unique
}
