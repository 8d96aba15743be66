//! Binds the HTTP client to the sync traits.

use emdash_protocol::{BinaryDescriptor, ContextId, Record, RecordRef};
use emdash_remote::{Client, Error};
use emdash_sync::{
    BinaryWriter, RecordApi, RemoteFuture, SessionProvider, SyncError, UploadBinary,
};

/// Maps a client error onto the failure taxonomy.
pub fn classify(e: Error) -> SyncError {
    let reason = e.to_string();
    if e.is_auth_expired() {
        SyncError::auth_expired(reason)
    } else if e.is_not_found() {
        SyncError::not_found(reason)
    } else if e.is_transient() {
        SyncError::transient(reason)
    } else if e.is_local_io() {
        SyncError::local_io(reason)
    } else if let Error::InvalidHost(_) = e {
        SyncError::Config(reason)
    } else {
        // Protocol-level surprises (bad JSON, empty results, unexpected
        // statuses) mean the server refused what we sent.
        SyncError::rejected(reason)
    }
}

/// [`RecordApi`] and [`SessionProvider`] over the HTTP client.
pub struct RemoteAdapter {
    client: Client,
}

impl RemoteAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl SessionProvider for RemoteAdapter {
    fn login<'a>(&'a self, username: &'a str, password: &'a str) -> RemoteFuture<'a, ContextId> {
        Box::pin(async move { self.client.login(username, password).await.map_err(classify) })
    }
}

impl RecordApi for RemoteAdapter {
    fn get_record<'a>(
        &'a self,
        ctx: &'a ContextId,
        name: &'a RecordRef,
    ) -> RemoteFuture<'a, Record> {
        Box::pin(async move { self.client.get_record(ctx, name).await.map_err(classify) })
    }

    fn children<'a>(
        &'a self,
        ctx: &'a ContextId,
        name: &'a RecordRef,
        depth: i32,
    ) -> RemoteFuture<'a, Vec<RecordRef>> {
        Box::pin(async move {
            self.client
                .children(ctx, name, depth)
                .await
                .map_err(classify)
        })
    }

    fn find_binaries<'a>(
        &'a self,
        ctx: &'a ContextId,
        records: &'a [RecordRef],
        limit: u32,
    ) -> RemoteFuture<'a, Vec<BinaryDescriptor>> {
        Box::pin(async move {
            self.client
                .find_binaries(ctx, records, limit)
                .await
                .map_err(classify)
        })
    }

    fn download_binary<'a>(
        &'a self,
        ctx: &'a ContextId,
        descriptor: &'a BinaryDescriptor,
        writer: &'a mut BinaryWriter,
    ) -> RemoteFuture<'a, u64> {
        Box::pin(async move {
            self.client
                .download_to(ctx, descriptor, writer)
                .await
                .map_err(classify)
        })
    }

    fn upload_binary<'a>(
        &'a self,
        ctx: &'a ContextId,
        upload: &'a UploadBinary,
    ) -> RemoteFuture<'a, Record> {
        Box::pin(async move {
            let fields = upload
                .fields
                .to_form_pairs()
                .map_err(|e| SyncError::rejected(format!("metadata: {e}")))?;
            let request = emdash_remote::UploadRequest {
                target: upload.target.clone(),
                rectype: upload.rectype.clone(),
                param: upload.param.clone(),
                fields,
                path: upload.path.clone(),
            };
            self.client.upload(ctx, &request).await.map_err(classify)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emdash_sync::FailureKind;

    fn api(status: u16) -> Error {
        Error::Api {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn classification() {
        assert_eq!(classify(api(401)).kind(), Some(FailureKind::AuthExpired));
        assert_eq!(classify(api(404)).kind(), Some(FailureKind::NotFound));
        assert_eq!(classify(api(503)).kind(), Some(FailureKind::TransientNetwork));
        assert_eq!(classify(api(403)).kind(), Some(FailureKind::Rejected));
        assert_eq!(
            classify(Error::Io(std::io::Error::other("disk full"))).kind(),
            Some(FailureKind::LocalIo)
        );
        assert!(classify(Error::InvalidHost("ftp://x".into())).is_config());
        assert_eq!(
            classify(Error::EmptyResult("auth.login")).kind(),
            Some(FailureKind::Rejected)
        );
    }
}
