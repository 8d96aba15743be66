//! Per-file upload markers.
//!
//! A marker records that a local file was uploaded and which remote record
//! it became. Its presence is what makes repeated uploads of the same
//! path a no-op.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use emdash_protocol::RecordRef;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::TransferError;
use crate::checksum::{calculate_file_checksum, checksum_bytes};
use crate::staging::atomic_write;

/// Current on-disk marker format version.
pub const MARKER_VERSION: u32 = 1;

const BESIDE_SUFFIX: &str = ".emdash.json";

/// Errors from marker operations.
#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("already recorded as {existing}")]
    Conflict { existing: RecordRef },

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Persisted marker contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarMarker {
    pub version: u32,
    pub local_path: String,
    pub remote_name: RecordRef,
    pub uploaded_at: DateTime<Utc>,
    pub size: u64,
    pub sha256: String,
}

/// Where markers are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SidecarLayout {
    /// `.<filename>.emdash.json` next to the uploaded file.
    Beside,
    /// `<dir>/<sha256 of absolute path>.json`, for read-only data folders.
    Directory(PathBuf),
}

/// Reads and writes upload markers.
#[derive(Debug, Clone)]
pub struct SidecarStore {
    layout: SidecarLayout,
}

impl Default for SidecarStore {
    fn default() -> Self {
        Self::beside()
    }
}

impl SidecarStore {
    pub fn beside() -> Self {
        Self {
            layout: SidecarLayout::Beside,
        }
    }

    pub fn in_directory(dir: impl Into<PathBuf>) -> Self {
        Self {
            layout: SidecarLayout::Directory(dir.into()),
        }
    }

    pub fn layout(&self) -> &SidecarLayout {
        &self.layout
    }

    /// Returns the marker path for `local_path` under the configured layout.
    pub fn marker_path(&self, local_path: &Path) -> Result<PathBuf, SidecarError> {
        match &self.layout {
            SidecarLayout::Beside => {
                let file_name = local_path.file_name().ok_or_else(|| {
                    TransferError::InvalidName(local_path.display().to_string())
                })?;
                let mut marker = OsString::from(".");
                marker.push(file_name);
                marker.push(BESIDE_SUFFIX);
                Ok(match local_path.parent() {
                    Some(dir) => dir.join(marker),
                    None => PathBuf::from(marker),
                })
            }
            SidecarLayout::Directory(dir) => {
                let absolute = std::path::absolute(local_path)?;
                let key = checksum_bytes(absolute.as_os_str().as_encoded_bytes());
                Ok(dir.join(format!("{key}.json")))
            }
        }
    }

    /// Returns the remote record `local_path` was uploaded as, if any.
    ///
    /// Missing, unreadable and unparsable markers all read as "not
    /// uploaded".
    pub fn lookup(&self, local_path: &Path) -> Option<RecordRef> {
        match self.read_marker(local_path) {
            Ok(Some(marker)) => Some(marker.remote_name),
            Ok(None) => None,
            Err(e) => {
                debug!(path = %local_path.display(), error = %e, "ignoring unreadable sidecar");
                None
            }
        }
    }

    /// Loads the full marker, `Ok(None)` when there is none.
    pub fn read_marker(&self, local_path: &Path) -> Result<Option<SidecarMarker>, SidecarError> {
        let path = self.marker_path(local_path)?;
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&data)?))
    }

    /// Records that `local_path` was uploaded as `remote_name`.
    ///
    /// Writing the same name again leaves the existing marker untouched.
    /// A valid marker naming a different record is never overwritten.
    pub fn record(
        &self,
        local_path: &Path,
        remote_name: &RecordRef,
    ) -> Result<SidecarMarker, SidecarError> {
        match self.read_marker(local_path) {
            Ok(Some(existing)) if &existing.remote_name == remote_name => return Ok(existing),
            Ok(Some(existing)) => {
                return Err(SidecarError::Conflict {
                    existing: existing.remote_name,
                });
            }
            Ok(None) => {}
            Err(e) => {
                debug!(path = %local_path.display(), error = %e, "replacing corrupt sidecar");
            }
        }

        let size = std::fs::metadata(local_path)?.len();
        let sha256 = calculate_file_checksum(local_path)?;
        let marker = SidecarMarker {
            version: MARKER_VERSION,
            local_path: local_path.display().to_string(),
            remote_name: remote_name.clone(),
            uploaded_at: Utc::now(),
            size,
            sha256,
        };

        let path = self.marker_path(local_path)?;
        let json = serde_json::to_vec_pretty(&marker)?;
        atomic_write(&path, &json)?;
        debug!(path = %path.display(), record = %remote_name, "sidecar written");
        Ok(marker)
    }

    /// Reports whether `path` is itself a marker written by this store.
    pub fn is_marker_file(&self, path: &Path) -> bool {
        match &self.layout {
            SidecarLayout::Beside => path
                .file_name()
                .map(|n| n.as_encoded_bytes())
                .is_some_and(|n| n.starts_with(b".") && n.ends_with(BESIDE_SUFFIX.as_bytes())),
            SidecarLayout::Directory(dir) => path.parent() == Some(dir.as_path()),
        }
    }
}
