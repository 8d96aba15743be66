//! Record-graph expansion.

use std::collections::{HashMap, HashSet};

use emdash_protocol::RecordRef;
use futures_util::StreamExt;
use futures_util::stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{FailureKind, SyncError};
use crate::remote::RecordApi;
use crate::session::Session;
use crate::types::SyncConfig;

/// A branch that could not be expanded.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveFailure {
    /// Root the failing record descends from.
    pub root: RecordRef,
    pub record: RecordRef,
    pub kind: FailureKind,
    pub reason: String,
}

/// Result of a traversal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expansion {
    /// Roots first, then each level in discovery order. No duplicates.
    pub records: Vec<RecordRef>,
    pub failed: Vec<ResolveFailure>,
    /// The node ceiling stopped the traversal early.
    pub truncated: bool,
}

/// Expands root records into the set of their descendants.
pub struct RelationResolver<'a> {
    api: &'a dyn RecordApi,
    session: &'a Session,
    config: &'a SyncConfig,
}

impl<'a> RelationResolver<'a> {
    pub fn new(api: &'a dyn RecordApi, session: &'a Session, config: &'a SyncConfig) -> Self {
        Self {
            api,
            session,
            config,
        }
    }

    /// Breadth-first expansion of `roots`.
    ///
    /// `max_depth` 0 returns the roots without any remote call, a positive
    /// value expands that many levels and a negative one expands until no
    /// new records appear. Every depth is capped by `max_nodes`.
    ///
    /// Only configuration errors are returned as `Err`; failing lookups are
    /// recorded in [`Expansion::failed`] and their branch is dropped.
    pub async fn expand(
        &self,
        roots: &[RecordRef],
        max_depth: i32,
        cancel: &CancellationToken,
    ) -> Result<Expansion, SyncError> {
        let mut expansion = Expansion::default();
        let mut visited: HashSet<RecordRef> = HashSet::new();
        let mut origin: HashMap<RecordRef, RecordRef> = HashMap::new();

        for root in roots {
            if visited.insert(root.clone()) {
                origin.insert(root.clone(), root.clone());
                expansion.records.push(root.clone());
            }
        }

        let max_nodes = self.config.max_nodes.max(1);
        let mut frontier = expansion.records.clone();
        let mut level = 0i32;

        while !frontier.is_empty() && (max_depth < 0 || level < max_depth) {
            level += 1;
            let lookups = frontier.iter().map(|record| async move {
                let result = self
                    .config
                    .retry
                    .run(self.session, cancel, "rel.children", move |ctx| async move {
                        self.api.children(&ctx, record, 1).await
                    })
                    .await;
                (record, result)
            });
            let results: Vec<_> = stream::iter(lookups)
                .buffered(self.config.effective_concurrency())
                .collect()
                .await;

            let mut next = Vec::new();
            'level: for (record, result) in results {
                let root = origin.get(record).cloned().unwrap_or_else(|| record.clone());
                match result {
                    Ok(children) => {
                        for child in children {
                            if visited.contains(&child) {
                                continue;
                            }
                            if expansion.records.len() >= max_nodes {
                                warn!(max_nodes, "node ceiling reached, traversal truncated");
                                expansion.truncated = true;
                                break 'level;
                            }
                            visited.insert(child.clone());
                            origin.insert(child.clone(), root.clone());
                            expansion.records.push(child.clone());
                            next.push(child);
                        }
                    }
                    Err(e) if e.is_config() => return Err(e),
                    Err(e) => {
                        warn!(record = %record, root = %root, error = %e, "children lookup failed");
                        expansion.failed.push(ResolveFailure {
                            root,
                            record: record.clone(),
                            kind: e.kind().unwrap_or(FailureKind::Rejected),
                            reason: e.reason().to_string(),
                        });
                    }
                }
            }

            debug!(level, found = next.len(), total = expansion.records.len(), "level expanded");
            if expansion.truncated {
                break;
            }
            frontier = next;
        }

        Ok(expansion)
    }
}
