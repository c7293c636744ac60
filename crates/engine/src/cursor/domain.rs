//! Cursor merging every replica log of one domain

use super::ReplicaCursor;
use crate::registry::ReplicaEntry;
use crate::subscription::{Notification, Subscription};
use changelog_core::{
    ChangelogCursor, Csn, CursorOptions, CursorState, DomainId, ReplicaId, Result, ServerState,
    UpdateRecord,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

struct Lane {
    cursor: ReplicaCursor,
    /// The lane's current record is read but not yet delivered
    ready: bool,
}

/// Cursor delivering the updates of every replica of a domain in CSN order
///
/// Each replica contributes one [`ReplicaCursor`] (a "lane"). `next()`
/// delivers the smallest CSN among the lanes holding a record. A lane held
/// by its offline gate does not hold back the other lanes.
///
/// Replica logs created after the cursor was opened are picked up on the
/// following `next()` and read from their first record.
pub struct DomainCursor {
    domain: DomainId,
    options: CursorOptions,
    start: ServerState,
    lanes: BTreeMap<ReplicaId, Lane>,
    subscription: Option<Subscription>,
    current: Option<UpdateRecord>,
    position: ServerState,
    state: CursorState,
}

impl DomainCursor {
    pub(crate) fn new(domain: DomainId, start: ServerState, options: CursorOptions) -> Self {
        Self {
            domain,
            options,
            position: start.clone(),
            start,
            lanes: BTreeMap::new(),
            subscription: None,
            current: None,
            state: CursorState::Uninitialized,
        }
    }

    pub(crate) fn attach(&mut self, subscription: Subscription) {
        self.subscription = Some(subscription);
    }

    /// Add a lane for `entry`
    ///
    /// No-op if the same log already has a lane. A log closed concurrently
    /// is skipped.
    pub(crate) fn add_replica(&mut self, entry: Arc<ReplicaEntry>) -> Result<()> {
        let replica_id = entry.replica_id();
        if let Some(lane) = self.lanes.get(&replica_id) {
            if lane.cursor.entry().map_or(false, |e| Arc::ptr_eq(e, &entry)) {
                return Ok(());
            }
        }

        let from = self.start.get(replica_id);
        match ReplicaCursor::open(entry, from.as_ref(), self.options) {
            Ok(cursor) => {
                self.lanes.insert(replica_id, Lane { cursor, ready: false });
                Ok(())
            }
            Err(e) if e.is_retryable() => {
                debug!(domain = %self.domain, replica_id = %replica_id, "Skipping closed replica log");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Forget every lane and position of the removed domain
    pub(crate) fn domain_removed(&mut self) {
        self.lanes.clear();
        self.start = ServerState::new();
        self.position = ServerState::new();
    }

    /// Domain the cursor reads
    pub fn domain(&self) -> &DomainId {
        &self.domain
    }

    /// Position of the last delivered record per replica
    ///
    /// Reopening a cursor from this state resumes after the last delivered
    /// record of each replica.
    pub fn server_state(&self) -> &ServerState {
        &self.position
    }

    /// Replicas currently read by the cursor
    pub fn replica_ids(&self) -> Vec<ReplicaId> {
        self.lanes.keys().copied().collect()
    }

    /// Replicas whose lane is held by its offline gate, with the offline CSN
    pub fn offline_replicas(&self) -> Vec<(ReplicaId, Csn)> {
        self.lanes
            .iter()
            .filter_map(|(replica_id, lane)| match lane.cursor.state() {
                CursorState::ReplicaOffline(csn) => Some((*replica_id, csn)),
                _ => None,
            })
            .collect()
    }

    fn drain_notifications(&mut self) -> Result<()> {
        let pending = match &self.subscription {
            Some(subscription) => subscription.drain(),
            None => return Ok(()),
        };
        for notification in pending {
            match notification {
                Notification::ReplicaCreated { entry, .. } => self.add_replica(entry)?,
                Notification::DomainRemoved { .. } => self.domain_removed(),
            }
        }
        Ok(())
    }

    /// Refill every lane that has nothing ready
    fn poll_lanes(&mut self) -> Result<()> {
        let mut closed = Vec::new();
        for (replica_id, lane) in self.lanes.iter_mut() {
            if lane.ready {
                continue;
            }
            match lane.cursor.next() {
                Ok(ready) => lane.ready = ready,
                Err(e) if e.is_retryable() => closed.push(*replica_id),
                Err(e) => return Err(e),
            }
        }
        for replica_id in closed {
            debug!(domain = %self.domain, replica_id = %replica_id, "Dropping lane of closed replica log");
            self.lanes.remove(&replica_id);
        }
        Ok(())
    }
}

impl ChangelogCursor for DomainCursor {
    type Record = UpdateRecord;

    fn next(&mut self) -> Result<bool> {
        if self.state == CursorState::Closed {
            return Ok(false);
        }
        self.drain_notifications()?;
        self.poll_lanes()?;

        let oldest = self
            .lanes
            .iter()
            .filter(|(_, lane)| lane.ready)
            .filter_map(|(replica_id, lane)| lane.cursor.record().map(|r| (r.csn, *replica_id)))
            .min();

        if let Some((csn, replica_id)) = oldest {
            if let Some(lane) = self.lanes.get_mut(&replica_id) {
                lane.ready = false;
                self.current = lane.cursor.record().cloned();
                self.position.update(csn);
                self.state = CursorState::Positioned;
                return Ok(true);
            }
        }

        self.current = None;
        self.state = CursorState::Exhausted;
        Ok(false)
    }

    fn record(&self) -> Option<&UpdateRecord> {
        self.current.as_ref()
    }

    fn state(&self) -> CursorState {
        self.state
    }

    fn close(&mut self) {
        self.subscription = None;
        for lane in self.lanes.values_mut() {
            lane.cursor.close();
        }
        self.lanes.clear();
        self.current = None;
        self.state = CursorState::Closed;
    }
}

impl std::fmt::Debug for DomainCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainCursor")
            .field("domain", &self.domain)
            .field("replicas", &self.replica_ids())
            .field("state", &self.state)
            .field("position", &self.position)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(r: u16, times: &[u64]) -> Arc<ReplicaEntry> {
        let entry = Arc::new(ReplicaEntry::new(DomainId::new("o=test"), ReplicaId(r), None));
        for t in times {
            append(&entry, *t);
        }
        entry
    }

    fn append(entry: &ReplicaEntry, t: u64) {
        let csn = Csn::new(t, 0, entry.replica_id());
        entry.log().append(UpdateRecord::new(csn, vec![])).unwrap();
    }

    fn cursor_over(entries: &[Arc<ReplicaEntry>], start: ServerState) -> DomainCursor {
        let mut cursor = DomainCursor::new(DomainId::new("o=test"), start, CursorOptions::default());
        for e in entries {
            cursor.add_replica(Arc::clone(e)).unwrap();
        }
        cursor
    }

    fn drain(cursor: &mut DomainCursor) -> Vec<(u64, u16)> {
        let mut seen = Vec::new();
        while cursor.next().unwrap() {
            let csn = cursor.record().unwrap().csn;
            seen.push((csn.time_ms(), csn.replica_id().as_u16()));
        }
        seen
    }

    #[test]
    fn test_merges_replicas_by_csn() {
        let a = entry(1, &[100, 300, 500]);
        let b = entry(2, &[200, 400]);
        let mut cursor = cursor_over(&[a, b], ServerState::new());
        assert_eq!(
            drain(&mut cursor),
            vec![(100, 1), (200, 2), (300, 1), (400, 2), (500, 1)]
        );
        assert_eq!(cursor.state(), CursorState::Exhausted);
    }

    #[test]
    fn test_resumes_from_server_state() {
        let a = entry(1, &[100, 300]);
        let b = entry(2, &[200, 400]);
        let mut first = cursor_over(&[Arc::clone(&a), Arc::clone(&b)], ServerState::new());
        assert!(first.next().unwrap());
        assert!(first.next().unwrap());
        let state = first.server_state().clone();

        let mut resumed = cursor_over(&[a, b], state);
        assert_eq!(drain(&mut resumed), vec![(300, 1), (400, 2)]);
    }

    #[test]
    fn test_picks_up_later_appends() {
        let a = entry(1, &[100]);
        let mut cursor = cursor_over(&[Arc::clone(&a)], ServerState::new());
        assert_eq!(drain(&mut cursor), vec![(100, 1)]);
        append(&a, 300);
        assert_eq!(drain(&mut cursor), vec![(300, 1)]);
    }

    #[test]
    fn test_add_replica_is_deduplicated() {
        let a = entry(1, &[100]);
        let mut cursor = cursor_over(&[Arc::clone(&a)], ServerState::new());
        cursor.add_replica(Arc::clone(&a)).unwrap();
        assert_eq!(drain(&mut cursor), vec![(100, 1)]);
    }

    #[test]
    fn test_offline_lane_does_not_block_others() {
        let a = entry(1, &[100, 300]);
        let b = entry(2, &[200, 400]);
        a.set_offline(Csn::new(250, 0, ReplicaId(1)));
        let mut cursor = cursor_over(&[Arc::clone(&a), b], ServerState::new());

        assert_eq!(drain(&mut cursor), vec![(100, 1), (200, 2), (400, 2)]);
        assert_eq!(
            cursor.offline_replicas(),
            vec![(ReplicaId(1), Csn::new(250, 0, ReplicaId(1)))]
        );
    }

    #[test]
    fn test_closed_log_lane_is_dropped() {
        let a = entry(1, &[100]);
        let b = entry(2, &[200]);
        let mut cursor = cursor_over(&[Arc::clone(&a), b], ServerState::new());
        a.log().close();
        assert_eq!(drain(&mut cursor), vec![(200, 2)]);
        assert_eq!(cursor.replica_ids(), vec![ReplicaId(2)]);
    }

    #[test]
    fn test_close() {
        let a = entry(1, &[100]);
        let mut cursor = cursor_over(&[a], ServerState::new());
        cursor.close();
        assert!(!cursor.next().unwrap());
        assert_eq!(cursor.state(), CursorState::Closed);
        assert!(cursor.replica_ids().is_empty());
    }
}
