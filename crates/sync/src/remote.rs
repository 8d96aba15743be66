//! Remote database seams.
//!
//! The CLI implements these traits on top of the HTTP client. Keeping
//! them as traits leaves the traversal and transfer logic free of any
//! transport and testable with mocks.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use emdash_protocol::{BinaryDescriptor, ContextId, Record, RecordFields, RecordRef};
use tokio::io::AsyncWrite;

use crate::error::SyncError;

/// Boxed future returned by the remote traits.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SyncError>> + Send + 'a>>;

/// Writer handed to [`RecordApi::download_binary`].
pub type BinaryWriter = dyn AsyncWrite + Unpin + Send;

/// One binary upload, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadBinary {
    /// Record the file is attached to, or the parent of the new record.
    pub target: RecordRef,
    /// When set, a new child record of this type is created under `target`.
    pub rectype: Option<String>,
    /// Field name of the file part.
    pub param: String,
    pub fields: RecordFields,
    pub path: PathBuf,
}

/// Produces session tokens.
pub trait SessionProvider: Send + Sync {
    fn login<'a>(&'a self, username: &'a str, password: &'a str) -> RemoteFuture<'a, ContextId>;
}

/// Record and binary operations of the remote database.
pub trait RecordApi: Send + Sync {
    fn get_record<'a>(&'a self, ctx: &'a ContextId, name: &'a RecordRef)
    -> RemoteFuture<'a, Record>;

    /// Children of `name`, `depth` relation levels down.
    fn children<'a>(
        &'a self,
        ctx: &'a ContextId,
        name: &'a RecordRef,
        depth: i32,
    ) -> RemoteFuture<'a, Vec<RecordRef>>;

    /// Binaries attached to any of `records`; `limit` 0 means unlimited.
    fn find_binaries<'a>(
        &'a self,
        ctx: &'a ContextId,
        records: &'a [RecordRef],
        limit: u32,
    ) -> RemoteFuture<'a, Vec<BinaryDescriptor>>;

    /// Streams the binary's content into `writer` and returns the byte count.
    fn download_binary<'a>(
        &'a self,
        ctx: &'a ContextId,
        descriptor: &'a BinaryDescriptor,
        writer: &'a mut BinaryWriter,
    ) -> RemoteFuture<'a, u64>;

    /// Sends the file and its fields in one request and returns the
    /// record the file ended up on.
    fn upload_binary<'a>(
        &'a self,
        ctx: &'a ContextId,
        upload: &'a UploadBinary,
    ) -> RemoteFuture<'a, Record>;
}
