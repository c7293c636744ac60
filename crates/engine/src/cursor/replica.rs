//! Cursor over one replica log, gated by the replica's offline marker

use crate::registry::ReplicaEntry;
use crate::subscription::{Notification, Subscription};
use changelog_core::{
    ChangelogCursor, Csn, CursorOptions, CursorState, ReplicaId, Result, UpdateRecord,
};
use changelog_storage::StoreCursor;
use std::sync::Arc;
use tracing::debug;

/// Start position kept until the replica's log exists
struct Unbound {
    from: Option<Csn>,
    options: CursorOptions,
    subscription: Subscription,
}

/// Cursor over the log of one replica
///
/// While the replica is marked offline at CSN `c`, records older than `c`
/// are delivered normally; the cursor then reports
/// [`CursorState::ReplicaOffline`] instead of delivering the record at or
/// after `c`. The record is kept aside, so once the marker is cleared the
/// cursor resumes exactly where it stopped.
///
/// A cursor opened before the replica has a log delivers nothing until the
/// log is created, then reads it from the requested position.
pub struct ReplicaCursor {
    replica_id: ReplicaId,
    entry: Option<Arc<ReplicaEntry>>,
    unbound: Option<Unbound>,
    inner: StoreCursor<Csn, UpdateRecord>,
    /// Record read from the log but held back by the offline gate
    pending: Option<UpdateRecord>,
    current: Option<UpdateRecord>,
    state: CursorState,
}

impl ReplicaCursor {
    pub(crate) fn open(
        entry: Arc<ReplicaEntry>,
        from: Option<&Csn>,
        options: CursorOptions,
    ) -> Result<Self> {
        let inner = entry.log().cursor(from, options)?;
        Ok(Self {
            replica_id: entry.replica_id(),
            entry: Some(entry),
            unbound: None,
            inner,
            pending: None,
            current: None,
            state: CursorState::Uninitialized,
        })
    }

    /// A cursor waiting for the log of `replica_id` to be created
    ///
    /// `subscription` must only receive the creation of that log.
    pub(crate) fn waiting(
        replica_id: ReplicaId,
        from: Option<&Csn>,
        options: CursorOptions,
        subscription: Subscription,
    ) -> Self {
        Self {
            replica_id,
            entry: None,
            unbound: Some(Unbound {
                from: from.copied(),
                options,
                subscription,
            }),
            inner: StoreCursor::empty(),
            pending: None,
            current: None,
            state: CursorState::Uninitialized,
        }
    }

    /// Bind to the log if it was created since the last step
    fn bind(&mut self) -> Result<()> {
        let Some(unbound) = &self.unbound else {
            return Ok(());
        };
        let created = unbound.subscription.drain().into_iter().rev().find_map(|n| match n {
            Notification::ReplicaCreated { entry, .. } => Some(entry),
            Notification::DomainRemoved { .. } => None,
        });
        let Some(entry) = created else {
            return Ok(());
        };

        match entry.log().cursor(unbound.from.as_ref(), unbound.options) {
            Ok(inner) => {
                debug!(domain = %entry.domain(), replica_id = %self.replica_id, "Replica cursor bound to new log");
                self.inner = inner;
                self.entry = Some(entry);
                self.unbound = None;
                Ok(())
            }
            // removed again already; wait for the next creation
            Err(e) if e.is_retryable() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Replica the cursor reads
    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    /// Current offline CSN of the replica
    pub fn offline_csn(&self) -> Option<Csn> {
        self.entry.as_ref().and_then(|e| e.offline_csn())
    }

    pub(crate) fn entry(&self) -> Option<&Arc<ReplicaEntry>> {
        self.entry.as_ref()
    }
}

impl ChangelogCursor for ReplicaCursor {
    type Record = UpdateRecord;

    fn next(&mut self) -> Result<bool> {
        if self.state == CursorState::Closed {
            return Ok(false);
        }
        self.bind()?;
        if self.pending.is_none() && self.inner.next()? {
            self.pending = self.inner.record().cloned();
        }

        let offline = self.offline_csn();
        let gated = match (&self.pending, offline) {
            (Some(record), Some(offline)) => record.csn >= offline,
            (None, Some(_)) => true,
            (_, None) => false,
        };

        self.current = None;
        if gated {
            if let Some(offline) = offline {
                self.state = CursorState::ReplicaOffline(offline);
            }
            return Ok(false);
        }
        match self.pending.take() {
            Some(record) => {
                self.current = Some(record);
                self.state = CursorState::Positioned;
                Ok(true)
            }
            None => {
                self.state = CursorState::Exhausted;
                Ok(false)
            }
        }
    }

    fn record(&self) -> Option<&UpdateRecord> {
        self.current.as_ref()
    }

    fn state(&self) -> CursorState {
        self.state
    }

    fn close(&mut self) {
        self.inner.close();
        self.entry = None;
        self.unbound = None;
        self.pending = None;
        self.current = None;
        self.state = CursorState::Closed;
    }
}

impl std::fmt::Debug for ReplicaCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaCursor")
            .field("replica_id", &self.replica_id)
            .field("bound", &self.unbound.is_none())
            .field("state", &self.state)
            .field("current", &self.current.as_ref().map(|r| r.csn))
            .field("pending", &self.pending.as_ref().map(|r| r.csn))
            .finish()
    }
}
