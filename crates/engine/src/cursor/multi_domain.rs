//! Cursor merging every domain of the changelog

use super::DomainCursor;
use crate::registry::ReplicaEntry;
use crate::subscription::{Notification, Subscription};
use changelog_core::{
    ChangelogCursor, CursorOptions, CursorState, DomainId, DomainUpdate, MultiDomainServerState,
    Result,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

struct Child {
    cursor: DomainCursor,
    ready: bool,
}

/// Cursor delivering the updates of every non-excluded domain
///
/// Records are merged by CSN across domains; ties are broken by domain.
/// Domains and replica logs created after the cursor was opened are picked
/// up on the following `next()`. A removed domain is forgotten, including
/// its position.
pub struct MultiDomainCursor {
    options: CursorOptions,
    start: MultiDomainServerState,
    excluded: BTreeSet<DomainId>,
    children: BTreeMap<DomainId, Child>,
    subscription: Option<Subscription>,
    current: Option<DomainUpdate>,
    position: MultiDomainServerState,
    state: CursorState,
}

impl MultiDomainCursor {
    pub(crate) fn new(
        start: MultiDomainServerState,
        options: CursorOptions,
        excluded: BTreeSet<DomainId>,
    ) -> Self {
        Self {
            options,
            position: start.clone(),
            start,
            excluded,
            children: BTreeMap::new(),
            subscription: None,
            current: None,
            state: CursorState::Uninitialized,
        }
    }

    pub(crate) fn attach(&mut self, subscription: Subscription) {
        self.subscription = Some(subscription);
    }

    pub(crate) fn add_replica(&mut self, domain: &DomainId, entry: Arc<ReplicaEntry>) -> Result<()> {
        if self.excluded.contains(domain) {
            return Ok(());
        }
        if !self.children.contains_key(domain) {
            let start = self.start.get(domain).cloned().unwrap_or_default();
            let cursor = DomainCursor::new(domain.clone(), start, self.options);
            self.children
                .insert(domain.clone(), Child { cursor, ready: false });
        }
        match self.children.get_mut(domain) {
            Some(child) => child.cursor.add_replica(entry),
            None => Ok(()),
        }
    }

    fn domain_removed(&mut self, domain: &DomainId) {
        if let Some(child) = self.children.get_mut(domain) {
            child.cursor.domain_removed();
            child.ready = false;
        }
        self.start.remove(domain);
        self.position.remove(domain);
    }

    /// Position of the last delivered record per domain and replica
    pub fn multi_domain_state(&self) -> &MultiDomainServerState {
        &self.position
    }

    /// Domains currently read by the cursor
    pub fn domains(&self) -> Vec<DomainId> {
        self.children.keys().cloned().collect()
    }

    /// Domains excluded from the cursor
    pub fn excluded(&self) -> &BTreeSet<DomainId> {
        &self.excluded
    }

    fn drain_notifications(&mut self) -> Result<()> {
        let pending = match &self.subscription {
            Some(subscription) => subscription.drain(),
            None => return Ok(()),
        };
        for notification in pending {
            match notification {
                Notification::ReplicaCreated { domain, entry } => {
                    self.add_replica(&domain, entry)?
                }
                Notification::DomainRemoved { domain } => self.domain_removed(&domain),
            }
        }
        Ok(())
    }
}

impl ChangelogCursor for MultiDomainCursor {
    type Record = DomainUpdate;

    fn next(&mut self) -> Result<bool> {
        if self.state == CursorState::Closed {
            return Ok(false);
        }
        self.drain_notifications()?;

        for child in self.children.values_mut() {
            if !child.ready {
                child.ready = child.cursor.next()?;
            }
        }

        let oldest = self
            .children
            .iter()
            .filter(|(_, child)| child.ready)
            .filter_map(|(domain, child)| child.cursor.record().map(|r| (r.csn, domain.clone())))
            .min();

        if let Some((csn, domain)) = oldest {
            if let Some(child) = self.children.get_mut(&domain) {
                child.ready = false;
                if let Some(record) = child.cursor.record().cloned() {
                    self.position.update(&domain, csn);
                    self.current = Some(DomainUpdate { domain, record });
                    self.state = CursorState::Positioned;
                    return Ok(true);
                }
            }
        }

        self.current = None;
        self.state = CursorState::Exhausted;
        Ok(false)
    }

    fn record(&self) -> Option<&DomainUpdate> {
        self.current.as_ref()
    }

    fn state(&self) -> CursorState {
        self.state
    }

    fn close(&mut self) {
        self.subscription = None;
        for child in self.children.values_mut() {
            child.cursor.close();
        }
        self.children.clear();
        self.current = None;
        self.state = CursorState::Closed;
    }
}

impl std::fmt::Debug for MultiDomainCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiDomainCursor")
            .field("domains", &self.domains())
            .field("excluded", &self.excluded)
            .field("state", &self.state)
            .finish()
    }
}
