//! Live cursor subscriptions
//!
//! Cursors that must follow replica logs created after they were opened
//! hold a [`Subscription`]. The registry enqueues a [`Notification`] in the
//! inbox of every matching subscription whenever a log is created or a
//! domain is removed; the cursor drains its inbox at the start of each
//! `next()` call.
//!
//! Enqueuing is a short mutex-protected push, so publishers never wait on
//! cursor consumption. Dropping a subscription unregisters it.
//!
//! Inboxes only keep what a cursor still needs: a domain removal supersedes
//! every earlier notification about that domain, and a log creation
//! supersedes an earlier one for the same replica. A cursor that never
//! steps therefore holds at most one removal per domain plus one creation
//! per live replica log.

use crate::registry::ReplicaEntry;
use changelog_core::{DomainId, ReplicaId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Event pushed to live cursors
#[derive(Clone)]
pub enum Notification {
    /// A replica log was created
    ReplicaCreated {
        /// Domain of the new log
        domain: DomainId,
        /// The new log and its offline marker
        entry: Arc<ReplicaEntry>,
    },
    /// A domain and all its logs were removed
    DomainRemoved {
        /// Removed domain
        domain: DomainId,
    },
}

impl Notification {
    /// Domain the notification is about
    pub fn domain(&self) -> &DomainId {
        match self {
            Notification::ReplicaCreated { domain, .. } | Notification::DomainRemoved { domain } => {
                domain
            }
        }
    }

    /// Replica of a created log
    pub fn replica_id(&self) -> Option<ReplicaId> {
        match self {
            Notification::ReplicaCreated { entry, .. } => Some(entry.replica_id()),
            Notification::DomainRemoved { .. } => None,
        }
    }

    /// Whether this notification makes `earlier` useless to a cursor
    fn supersedes(&self, earlier: &Notification) -> bool {
        match self {
            Notification::DomainRemoved { domain } => earlier.domain() == domain,
            Notification::ReplicaCreated { domain, entry } => {
                earlier.domain() == domain && earlier.replica_id() == Some(entry.replica_id())
            }
        }
    }
}

impl std::fmt::Debug for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notification::ReplicaCreated { domain, entry } => f
                .debug_struct("ReplicaCreated")
                .field("domain", domain)
                .field("replica_id", &entry.replica_id())
                .finish(),
            Notification::DomainRemoved { domain } => f
                .debug_struct("DomainRemoved")
                .field("domain", domain)
                .finish(),
        }
    }
}

/// Which notifications a subscription receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Only notifications about one domain
    Domain(DomainId),
    /// Notifications about every domain but the excluded ones
    AllDomains {
        /// Domains to ignore
        excluded: BTreeSet<DomainId>,
    },
    /// Only the creation of one replica log
    Replica {
        /// Domain of the log
        domain: DomainId,
        /// Replica of the log
        replica_id: ReplicaId,
    },
}

impl Scope {
    /// Whether `notification` is in scope
    pub fn matches(&self, notification: &Notification) -> bool {
        let domain = notification.domain();
        match self {
            Scope::Domain(d) => d == domain,
            Scope::AllDomains { excluded } => !excluded.contains(domain),
            Scope::Replica { domain: d, replica_id } => {
                d == domain && notification.replica_id() == Some(*replica_id)
            }
        }
    }
}

type Inbox = Arc<Mutex<Vec<Notification>>>;

struct Subscriber {
    scope: Scope,
    inbox: Inbox,
}

/// Registry of live subscriptions
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    subscribers: DashMap<u64, Subscriber>,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: DashMap::new(),
        }
    }

    /// Register a subscription for `scope`
    ///
    /// Notifications published after this call are delivered to the
    /// returned subscription until it is dropped.
    pub fn subscribe(self: &Arc<Self>, scope: Scope) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
        self.subscribers.insert(
            id,
            Subscriber {
                scope,
                inbox: Arc::clone(&inbox),
            },
        );
        Subscription {
            id,
            registry: Arc::clone(self),
            inbox,
        }
    }

    /// Enqueue `notification` for every subscription in scope
    ///
    /// Returns the number of subscriptions notified.
    pub fn publish(&self, notification: Notification) -> usize {
        let mut notified = 0;
        for subscriber in self.subscribers.iter() {
            if subscriber.scope.matches(&notification) {
                let mut inbox = subscriber.inbox.lock();
                inbox.retain(|earlier| !notification.supersedes(earlier));
                inbox.push(notification.clone());
                notified += 1;
            }
        }
        notified
    }

    /// Number of live subscriptions
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if no subscription is live
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.remove(&id);
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// Handle of a live subscription; dropping it unregisters it
pub struct Subscription {
    id: u64,
    registry: Arc<SubscriptionRegistry>,
    inbox: Inbox,
}

impl Subscription {
    /// Identifier of the subscription
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Take every pending notification, oldest first
    pub fn drain(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.inbox.lock())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unsubscribe(self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pending", &self.inbox.lock().len())
            .finish()
    }
}
