//! Replaying foreign changes into the local store.

use std::sync::Arc;

use filer_sync_core::{ChangeEvent, MutationKind, StoreSignature};
use filer_sync_store::FilerStore;

use crate::error::Result;

/// What replaying one event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The mutation was written to the local store.
    Applied(MutationKind),
    /// The local store already carries this mutation; nothing was written.
    AlreadyApplied,
}

/// Applies change events to a local store.
///
/// Replay is idempotent: a moved or removed entry is deleted from its old
/// path (a missing entry is fine) and the new entry is upserted, so applying an event twice leaves the
/// store as applying it once.
pub struct Replayer<S: FilerStore> {
    store: Arc<S>,
    local_signature: StoreSignature,
}

impl<S: FilerStore> Replayer<S> {
    /// Create a replayer writing into `store`, whose signature is
    /// `local_signature`.
    pub fn new(store: Arc<S>, local_signature: StoreSignature) -> Self {
        Self {
            store,
            local_signature,
        }
    }

    /// Apply one event.
    ///
    /// Fails with [`SyncError::Decode`](crate::SyncError::Decode) when the
    /// payload is not a valid notification or names an entry with something
    /// other than a single path component, and with a store error when a
    /// write fails. A partially applied rename is repaired by replaying the
    /// event again.
    pub async fn apply(&self, event: &ChangeEvent) -> Result<ReplayOutcome> {
        let notification = event.notification()?;
        notification.validate()?;

        if notification.is_signed_by(self.local_signature) {
            return Ok(ReplayOutcome::AlreadyApplied);
        }

        let kind = notification.kind(&event.directory);

        // An update overwrites in place, so a failed write keeps the old version.
        if let Some(old) = &notification.old_entry {
            if kind != MutationKind::Update {
                let old_path = event.directory.child(&old.name);
                self.store.delete_entry(&old_path).await?;
            }
        }

        if let Some(new) = &notification.new_entry {
            let parent = notification
                .new_parent_path
                .as_ref()
                .unwrap_or(&event.directory);
            self.store.insert_entry(parent, new).await?;
        }

        tracing::debug!(
            dir = %event.directory,
            ts_ns = event.ts_ns.as_nanos(),
            ?kind,
            "replayed change"
        );
        Ok(ReplayOutcome::Applied(kind))
    }
}
