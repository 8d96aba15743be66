//! Wires configuration, the HTTP client and the orchestrator together.

use std::collections::BTreeMap;
use std::process::ExitCode;
use std::sync::Arc;

use emdash_protocol::RecordRef;
use emdash_remote::Client;
use emdash_sync::{
    Credentials, DownloadRequest, FetchOptions, HandlerKind, Report, Session, SyncError,
    SyncEvent, SyncOrchestrator, TaskStatus, UploadRequest,
};
use emdash_transfer::SidecarStore;
use tokio_util::sync::CancellationToken;

use crate::adapter::{RemoteAdapter, classify};
use crate::config::Config;
use crate::{Command, DownloadArgs, UploadArgs, UploadOptions};

/// Runs one command to completion and returns the process exit status.
pub async fn run(config: Config, command: Command, json: bool) -> anyhow::Result<ExitCode> {
    match command {
        Command::Download(args) => {
            let orchestrator = connect(&config).await?;
            let report = orchestrator.download(download_request(args)).await?;
            finish(&report, json)
        }
        Command::Upload(args) => {
            let request = upload_request(args)?;
            let orchestrator = connect(&config).await?;
            let report = orchestrator.upload(request).await?;
            finish(&report, json)
        }
        Command::Watch(args) => crate::watch::run(&config, args).await,
    }
}

/// Builds an orchestrator for `config`. The session is not logged in yet.
pub fn orchestrator(config: &Config) -> Result<SyncOrchestrator, SyncError> {
    if config.username.is_empty() {
        return Err(SyncError::Config(
            "no username configured (set `username` or EMDASH_USERNAME)".into(),
        ));
    }
    let client = Client::new(&config.host).map_err(classify)?;
    let adapter = Arc::new(RemoteAdapter::new(client));
    let session = Arc::new(Session::new(
        adapter.clone(),
        Credentials::new(&config.username, &config.password),
    ));
    let sidecar = match &config.sidecar_dir {
        Some(dir) => SidecarStore::in_directory(dir),
        None => SidecarStore::beside(),
    };
    Ok(SyncOrchestrator::new(
        adapter,
        session,
        sidecar,
        config.sync_config(),
    ))
}

/// Builds an orchestrator, logs in and hooks Ctrl-C and progress logging up.
async fn connect(config: &Config) -> Result<SyncOrchestrator, SyncError> {
    let mut orchestrator = orchestrator(config)?;
    let cancel = orchestrator.cancel_token();
    spawn_interrupt_handler(cancel.clone());
    if let Some(events) = orchestrator.take_events() {
        tokio::spawn(log_events(events));
    }

    orchestrator
        .session()
        .login_until_success(&orchestrator.config().retry, &cancel)
        .await?;
    Ok(orchestrator)
}

/// Cancels `cancel` on the first Ctrl-C.
pub fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, letting in-flight transfers finish");
            cancel.cancel();
        }
    });
}

/// Logs task progress until the orchestrator is dropped.
pub async fn log_events(mut events: tokio::sync::mpsc::Receiver<SyncEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SyncEvent::PhaseChanged(phase) => tracing::debug!(?phase, "phase changed"),
            SyncEvent::TaskStarted { id, item } => tracing::debug!(id, %item, "started"),
            SyncEvent::TaskFinished {
                id,
                item,
                status: TaskStatus::Failed,
                error,
                ..
            } => {
                tracing::warn!(id, %item, error = error.as_deref().unwrap_or(""), "failed")
            }
            SyncEvent::TaskFinished {
                id, item, status, ..
            } => tracing::debug!(id, %item, ?status, "finished"),
        }
    }
}

fn download_request(args: DownloadArgs) -> DownloadRequest {
    DownloadRequest {
        names: args.names.into_iter().map(RecordRef::new).collect(),
        recurse: args.recurse,
        dest_dir: args.dest,
        options: FetchOptions {
            overwrite: args.overwrite,
            rename: args.rename,
            decompress: !args.nogzip,
        },
    }
}

/// Parses the shared upload flags into a request for `target`.
pub fn upload_template(options: UploadOptions, target: String) -> Result<UploadRequest, SyncError> {
    let handler: HandlerKind = options.handler.parse()?;
    handler.validate(options.rectype.as_deref())?;
    Ok(UploadRequest {
        target: RecordRef::new(target),
        paths: Vec::new(),
        handler,
        rectype: options.rectype,
        params: options.params.into_iter().collect::<BTreeMap<_, _>>(),
        param: options.file_param,
    })
}

fn upload_request(args: UploadArgs) -> Result<UploadRequest, SyncError> {
    let mut request = upload_template(args.options, args.target)?;
    request.paths = args.paths;
    Ok(request)
}

/// Prints `report` and maps it to an exit status.
pub fn finish(report: &Report, json: bool) -> anyhow::Result<ExitCode> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", render_report(report));
    }
    Ok(if report.has_failures() {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

fn render_report(report: &Report) -> String {
    let mut out = String::new();
    for (item, record) in &report.succeeded {
        out.push_str(&format!("ok      {item} -> {record}\n"));
    }
    for item in &report.skipped {
        out.push_str(&format!("skipped {item}\n"));
    }
    for failed in &report.failed {
        out.push_str(&format!(
            "failed  {} [{}] {}\n",
            failed.item, failed.kind, failed.reason
        ));
    }
    out.push_str(&format!(
        "{} succeeded, {} skipped, {} failed\n",
        report.succeeded.len(),
        report.skipped.len(),
        report.failed.len()
    ));
    out
}
