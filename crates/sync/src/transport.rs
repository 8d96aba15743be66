//! Single-file download and upload.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use emdash_protocol::{BinaryDescriptor, RecordRef};
use emdash_transfer::{
    SidecarStore, StagedFile, decompress_file, is_gzip_framed, summarize_csv, validate_file_name,
};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::handler::{HandlerInputs, HandlerKind, build_upload};
use crate::remote::RecordApi;
use crate::session::Session;
use crate::types::SyncConfig;

/// Download behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Replace an existing destination file.
    pub overwrite: bool,
    /// Name the file after the binary instead of its original filename.
    pub rename: bool,
    /// Decompress gzip-framed content.
    pub decompress: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            rename: false,
            decompress: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched(PathBuf),
    /// The destination already existed and overwriting was off.
    SkippedExists(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded(RecordRef),
    /// A marker says this file was uploaded before.
    AlreadyUploaded(RecordRef),
}

impl UploadOutcome {
    pub fn record(&self) -> &RecordRef {
        match self {
            UploadOutcome::Uploaded(r) | UploadOutcome::AlreadyUploaded(r) => r,
        }
    }
}

/// One file to upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadJob {
    pub path: PathBuf,
    pub target: RecordRef,
    pub handler: HandlerKind,
    pub rectype: Option<String>,
    pub param: Option<String>,
    pub params: BTreeMap<String, String>,
}

/// Runs blocking filesystem work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, SyncError>
where
    F: FnOnce() -> Result<T, SyncError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SyncError::local_io(format!("task join error: {e}")))?
}

/// Destination file name for `descriptor` under `options`.
pub fn destination_name(descriptor: &BinaryDescriptor, options: &FetchOptions) -> String {
    let name = if options.rename {
        descriptor.name.as_str()
    } else {
        descriptor.filename.as_str()
    };
    match name.strip_suffix(".gz") {
        Some(stem) if options.decompress && !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

/// Moves single files between local disk and the remote database.
pub struct FileTransport<'a> {
    api: &'a dyn RecordApi,
    session: &'a Session,
    sidecar: &'a SidecarStore,
    config: &'a SyncConfig,
}

impl<'a> FileTransport<'a> {
    pub fn new(
        api: &'a dyn RecordApi,
        session: &'a Session,
        sidecar: &'a SidecarStore,
        config: &'a SyncConfig,
    ) -> Self {
        Self {
            api,
            session,
            sidecar,
            config,
        }
    }

    /// Downloads one binary into `dest_dir`.
    ///
    /// Content is staged next to the destination and renamed into place, so
    /// the destination is either untouched or complete.
    pub async fn fetch(
        &self,
        descriptor: &BinaryDescriptor,
        dest_dir: &Path,
        options: FetchOptions,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, SyncError> {
        let name = destination_name(descriptor, &options);
        validate_file_name(&name)?;
        let dest = dest_dir.join(&name);

        if !options.overwrite && tokio::fs::try_exists(&dest).await? {
            debug!(path = %dest.display(), "destination exists, skipping");
            return Ok(FetchOutcome::SkippedExists(dest));
        }
        if cancel.is_cancelled() {
            return Err(SyncError::cancelled());
        }
        tokio::fs::create_dir_all(dest_dir).await?;

        let stage = StagedFile::new(&dest)?;
        let stage_path = stage.path().to_path_buf();
        let bytes = self
            .config
            .retry
            .run(self.session, cancel, "download", |ctx| {
                let stage_path = stage_path.clone();
                async move {
                    // Truncates whatever a failed attempt left behind.
                    let mut file = tokio::fs::File::create(&stage_path).await?;
                    let n = self.api.download_binary(&ctx, descriptor, &mut file).await?;
                    file.flush().await?;
                    file.sync_all().await?;
                    Ok(n)
                }
            })
            .await?;

        let decompress = options.decompress;
        let final_path = blocking(move || {
            if decompress && is_gzip_framed(stage.path())? {
                let plain = StagedFile::new(stage.dest())?;
                decompress_file(stage.path(), plain.path())?;
                drop(stage);
                Ok(plain.commit()?)
            } else {
                Ok(stage.commit()?)
            }
        })
        .await?;

        info!(
            binary = %descriptor.name,
            path = %final_path.display(),
            bytes,
            "downloaded"
        );
        Ok(FetchOutcome::Fetched(final_path))
    }

    /// Uploads one file unless a marker says it was uploaded before.
    ///
    /// The marker is written only after the remote confirmed the upload.
    pub async fn upload(
        &self,
        job: &UploadJob,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, SyncError> {
        job.handler.validate(job.rectype.as_deref())?;
        // A file whose marker cannot be placed would be uploaded on every run.
        self.sidecar.marker_path(&job.path).map_err(|e| {
            SyncError::local_io(format!("{}: no marker location: {e}", job.path.display()))
        })?;

        let sidecar = self.sidecar.clone();
        let path = job.path.clone();
        if let Some(existing) = blocking(move || Ok(sidecar.lookup(&path))).await? {
            debug!(path = %job.path.display(), record = %existing, "already uploaded");
            return Ok(UploadOutcome::AlreadyUploaded(existing));
        }
        if cancel.is_cancelled() {
            return Err(SyncError::cancelled());
        }

        let metadata = tokio::fs::metadata(&job.path)
            .await
            .map_err(|e| SyncError::local_io(format!("{}: {e}", job.path.display())))?;
        if !metadata.is_file() {
            return Err(SyncError::local_io(format!(
                "{}: not a regular file",
                job.path.display()
            )));
        }
        // Fail early on unreadable files rather than mid-request.
        tokio::fs::File::open(&job.path)
            .await
            .map_err(|e| SyncError::local_io(format!("{}: {e}", job.path.display())))?;

        let behaviour = job.handler.behaviour();
        let parent = if behaviour.inherits_acl {
            Some(
                self.config
                    .retry
                    .run(self.session, cancel, "record.get", |ctx| async move {
                        self.api.get_record(&ctx, &job.target).await
                    })
                    .await?,
            )
        } else {
            None
        };
        let summary = if behaviour.extracts_csv {
            let path = job.path.clone();
            Some(blocking(move || Ok(summarize_csv(&path)?)).await?)
        } else {
            None
        };
        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);

        let upload = build_upload(
            job.handler,
            &job.target,
            job.rectype.as_deref(),
            job.param.as_deref(),
            &job.params,
            &job.path,
            HandlerInputs {
                parent: parent.as_ref(),
                summary: summary.as_ref(),
                modified,
            },
        )?;

        let record = self
            .config
            .retry
            .run(self.session, cancel, "upload", |ctx| {
                let upload = &upload;
                async move { self.api.upload_binary(&ctx, upload).await }
            })
            .await?;

        let sidecar = self.sidecar.clone();
        let path = job.path.clone();
        let name = record.name.clone();
        blocking(move || Ok(sidecar.record(&path, &name)?))
            .await
            .map_err(|e| {
                SyncError::local_io(format!(
                    "uploaded as {} but marker write failed: {}",
                    record.name,
                    e.reason()
                ))
            })?;

        info!(path = %job.path.display(), record = %record.name, "uploaded");
        Ok(UploadOutcome::Uploaded(record.name))
    }
}
