//! Batched binary lookup.

use std::collections::HashSet;

use emdash_protocol::{BinaryDescriptor, RecordRef};
use futures_util::StreamExt;
use futures_util::stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{FailureKind, SyncError};
use crate::remote::RecordApi;
use crate::session::Session;
use crate::types::SyncConfig;

/// A record whose binaries could not be listed.
#[derive(Debug, Clone, PartialEq)]
pub struct LocateFailure {
    pub record: RecordRef,
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Located {
    /// Unique by binary name; order is not significant.
    pub binaries: Vec<BinaryDescriptor>,
    pub failed: Vec<LocateFailure>,
}

/// Finds the binaries attached to a set of records.
pub struct BinaryLocator<'a> {
    api: &'a dyn RecordApi,
    session: &'a Session,
    config: &'a SyncConfig,
}

impl<'a> BinaryLocator<'a> {
    pub fn new(api: &'a dyn RecordApi, session: &'a Session, config: &'a SyncConfig) -> Self {
        Self {
            api,
            session,
            config,
        }
    }

    /// Looks up binaries in batches of at most `batch_size` records.
    ///
    /// A batch that still fails after retries contributes its records to
    /// [`Located::failed`]; the other batches are unaffected.
    pub async fn locate(
        &self,
        records: &[RecordRef],
        cancel: &CancellationToken,
    ) -> Result<Located, SyncError> {
        let batches = records
            .chunks(self.config.effective_batch_size())
            .map(|batch| async move {
                let result = self
                    .config
                    .retry
                    .run(self.session, cancel, "binary.find", move |ctx| async move {
                        self.api.find_binaries(&ctx, batch, 0).await
                    })
                    .await;
                (batch, result)
            });
        let results: Vec<_> = stream::iter(batches)
            .buffer_unordered(self.config.effective_concurrency())
            .collect()
            .await;

        let mut located = Located::default();
        let mut seen = HashSet::new();
        for (batch, result) in results {
            match result {
                Ok(found) => {
                    for descriptor in found {
                        if seen.insert(descriptor.name.clone()) {
                            located.binaries.push(descriptor);
                        }
                    }
                }
                Err(e) if e.is_config() => return Err(e),
                Err(e) => {
                    warn!(records = batch.len(), error = %e, "binary lookup failed");
                    let kind = e.kind().unwrap_or(FailureKind::Rejected);
                    located
                        .failed
                        .extend(batch.iter().map(|record| LocateFailure {
                            record: record.clone(),
                            kind,
                            reason: e.reason().to_string(),
                        }));
                }
            }
        }

        debug!(
            records = records.len(),
            binaries = located.binaries.len(),
            failed = located.failed.len(),
            "binaries located"
        );
        Ok(located)
    }
}
