//! Failure taxonomy for transfers.

use serde::Serialize;

/// Why a single item failed. The string form appears in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    TransientNetwork,
    AuthExpired,
    NotFound,
    Rejected,
    LocalIo,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::TransientNetwork => "transient-network",
            FailureKind::AuthExpired => "auth-expired",
            FailureKind::NotFound => "not-found",
            FailureKind::Rejected => "rejected",
            FailureKind::LocalIo => "local-io",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the sync layer.
///
/// `Config` aborts a whole run; `Failed` is recorded against one item.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind}: {reason}")]
    Failed { kind: FailureKind, reason: String },
}

impl SyncError {
    pub fn failed(kind: FailureKind, reason: impl Into<String>) -> Self {
        SyncError::Failed {
            kind,
            reason: reason.into(),
        }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Self::failed(FailureKind::TransientNetwork, reason)
    }

    pub fn auth_expired(reason: impl Into<String>) -> Self {
        Self::failed(FailureKind::AuthExpired, reason)
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::failed(FailureKind::NotFound, reason)
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::failed(FailureKind::Rejected, reason)
    }

    pub fn local_io(reason: impl Into<String>) -> Self {
        Self::failed(FailureKind::LocalIo, reason)
    }

    pub fn cancelled() -> Self {
        Self::failed(FailureKind::Cancelled, "cancelled")
    }

    /// Failure kind, `None` for configuration errors.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            SyncError::Config(_) => None,
            SyncError::Failed { kind, .. } => Some(*kind),
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            SyncError::Config(reason) | SyncError::Failed { reason, .. } => reason,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, SyncError::Config(_))
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::local_io(e.to_string())
    }
}

impl From<emdash_transfer::TransferError> for SyncError {
    fn from(e: emdash_transfer::TransferError) -> Self {
        use emdash_transfer::TransferError;
        match e {
            TransferError::Io(io) if io.kind() == std::io::ErrorKind::InvalidData => {
                SyncError::rejected(io.to_string())
            }
            TransferError::Io(io) => SyncError::local_io(io.to_string()),
            other @ (TransferError::InvalidName(_)
            | TransferError::Decompress(_)
            | TransferError::NoData(_)) => SyncError::rejected(other.to_string()),
        }
    }
}

impl From<emdash_transfer::SidecarError> for SyncError {
    fn from(e: emdash_transfer::SidecarError) -> Self {
        SyncError::local_io(format!("sidecar: {e}"))
    }
}
