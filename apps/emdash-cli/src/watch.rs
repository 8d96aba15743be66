//! Directory watcher: uploads files as they settle.
//!
//! Existing files are uploaded first; markers make that catch-up a no-op
//! for anything already sent. After that every debounced change in the
//! directory tree triggers an upload of the files it names. Hidden files
//! and directories are never uploaded.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use emdash_sync::{RetryPolicy, SyncError, SyncOrchestrator, UploadRequest};
use globset::GlobMatcher;
use notify::RecursiveMode;
use notify_debouncer_mini::{DebounceEventResult, new_debouncer};
use tokio::sync::mpsc;
use walkdir::WalkDir;

use crate::WatchArgs;
use crate::app::{log_events, orchestrator, spawn_interrupt_handler, upload_template};
use crate::config::Config;

fn is_hidden(name: &OsStr) -> bool {
    name.as_encoded_bytes().starts_with(b".")
}

/// Whether `path` should be uploaded: a regular file below `dir` whose
/// name matches, with no hidden component on the way, that is not one of
/// our own markers or stages.
fn is_candidate(
    dir: &Path,
    path: &Path,
    matcher: &GlobMatcher,
    orchestrator: &SyncOrchestrator,
) -> bool {
    let (Ok(relative), Some(name)) = (path.strip_prefix(dir), path.file_name()) else {
        return false;
    };
    !relative.iter().any(is_hidden)
        && matcher.is_match(name)
        && !orchestrator.sidecar().is_marker_file(path)
        && path.is_file()
}

/// Every candidate under `dir`, subdirectories included, sorted.
fn candidates(dir: &Path, matcher: &GlobMatcher, orchestrator: &SyncOrchestrator) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let walk = WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_hidden(e.file_name()));
    for entry in walk {
        match entry {
            Ok(entry) if entry.file_type().is_file() => {
                if is_candidate(dir, entry.path(), matcher, orchestrator) {
                    paths.push(entry.into_path());
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "skipping unreadable entry"),
        }
    }
    paths.sort();
    paths
}

async fn upload_batch(
    orchestrator: &SyncOrchestrator,
    template: &UploadRequest,
    paths: Vec<PathBuf>,
) -> Result<(), SyncError> {
    if paths.is_empty() {
        return Ok(());
    }
    let request = UploadRequest {
        paths,
        ..template.clone()
    };
    let report = orchestrator.upload(request).await?;
    for (item, record) in &report.succeeded {
        tracing::info!(path = %item, record = %record, "uploaded");
    }
    for failed in &report.failed {
        tracing::warn!(
            path = %failed.item,
            kind = %failed.kind,
            error = %failed.reason,
            "upload failed, will retry on next change"
        );
    }
    Ok(())
}

/// Runs the watcher until Ctrl-C.
pub async fn run(config: &Config, args: WatchArgs) -> anyhow::Result<ExitCode> {
    let template = upload_template(args.options, args.target)?;
    if !args.dir.is_dir() {
        anyhow::bail!("{} is not a directory", args.dir.display());
    }
    let dir = std::fs::canonicalize(&args.dir)
        .with_context(|| format!("resolving {}", args.dir.display()))?;
    let matcher = args.pattern.compile_matcher();

    let mut orchestrator = orchestrator(config)?;
    let cancel = orchestrator.cancel_token();
    spawn_interrupt_handler(cancel.clone());
    if let Some(events) = orchestrator.take_events() {
        tokio::spawn(log_events(events));
    }

    // The database may be down when the daemon starts; wait for it.
    match orchestrator
        .session()
        .login_until_success(&RetryPolicy::forever(), &cancel)
        .await
    {
        Ok(_) => {}
        Err(e) if cancel.is_cancelled() => {
            tracing::info!(error = %e, "stopped before login");
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => return Err(e.into()),
    }

    let existing = candidates(&dir, &matcher, &orchestrator);
    tracing::info!(
        dir = %dir.display(),
        files = existing.len(),
        "uploading existing files"
    );
    upload_batch(&orchestrator, &template, existing).await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();
    let mut debouncer = new_debouncer(
        Duration::from_secs(args.settle.max(1)),
        move |result: DebounceEventResult| match result {
            Ok(events) => {
                for event in events {
                    let _ = tx.send(event.path);
                }
            }
            Err(e) => tracing::warn!(error = %e, "watch error"),
        },
    )?;
    debouncer
        .watcher()
        .watch(&dir, RecursiveMode::Recursive)?;
    tracing::info!(dir = %dir.display(), pattern = %args.pattern, "watching");

    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => break,
            path = rx.recv() => match path {
                Some(path) => path,
                None => break,
            },
        };
        let mut batch = vec![first];
        while let Ok(path) = rx.try_recv() {
            batch.push(path);
        }
        batch.retain(|p| is_candidate(&dir, p, &matcher, &orchestrator));
        batch.sort();
        batch.dedup();
        upload_batch(&orchestrator, &template, batch).await?;
    }

    tracing::info!("watcher stopped");
    Ok(ExitCode::SUCCESS)
}
