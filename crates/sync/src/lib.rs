//! Transport core for the EMDash record database.
//!
//! Expands record graphs, locates attached binaries and moves files in both
//! directions with bounded retries. Uploads are idempotent through
//! per-file sidecar markers. The remote itself is reached through the
//! [`RecordApi`] and [`SessionProvider`] traits.

pub mod error;
pub mod handler;
pub mod locator;
pub mod orchestrator;
pub mod remote;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::{FailureKind, SyncError};
pub use handler::{HandlerBehaviour, HandlerKind, build_upload};
pub use locator::{BinaryLocator, LocateFailure, Located};
pub use orchestrator::SyncOrchestrator;
pub use remote::{BinaryWriter, RecordApi, RemoteFuture, SessionProvider, UploadBinary};
pub use resolver::{Expansion, RelationResolver, ResolveFailure};
pub use retry::RetryPolicy;
pub use session::{Credentials, Session};
pub use transport::{FetchOptions, FetchOutcome, FileTransport, UploadJob, UploadOutcome};
pub use types::{
    DownloadRequest, FailedItem, Report, RunPhase, Stage, SyncConfig, SyncEvent, TaskStatus,
    UploadRequest,
};
