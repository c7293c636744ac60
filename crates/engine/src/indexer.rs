//! Change number assignment
//!
//! Every event reaching the changelog is forwarded to a
//! [`ChangeNumberIndexer`] once the replica logs accepted it. The indexer
//! decides when an update enters the global change-number index.
//! [`SequentialIndexer`] numbers updates in the order they are published;
//! an indexer merging the replicas' streams plugs into the same seam.

use changelog_core::{Csn, DomainId, Result};
use changelog_storage::ChangeNumberIndex;
use std::sync::Arc;
use tracing::trace;

/// Receives the events that drive the change-number index
pub trait ChangeNumberIndexer: Send + Sync {
    /// An update was stored in its replica log
    fn publish_update(&self, domain: &DomainId, csn: Csn) -> Result<()>;

    /// A replica is alive at `csn` without sending an update
    fn publish_heartbeat(&self, _domain: &DomainId, _csn: Csn) -> Result<()> {
        Ok(())
    }

    /// A replica went offline at `csn`
    fn replica_offline(&self, _domain: &DomainId, _csn: Csn) -> Result<()> {
        Ok(())
    }

    /// A domain was removed; its index records must go
    fn clear_domain(&self, domain: &DomainId) -> Result<()>;
}

/// Indexer assigning the next change number to each update as it arrives
pub struct SequentialIndexer {
    index: Arc<ChangeNumberIndex>,
}

impl SequentialIndexer {
    /// Create an indexer writing to `index`
    pub fn new(index: Arc<ChangeNumberIndex>) -> Self {
        Self { index }
    }
}

impl ChangeNumberIndexer for SequentialIndexer {
    fn publish_update(&self, domain: &DomainId, csn: Csn) -> Result<()> {
        let change_number = self.index.add(domain, csn)?;
        trace!(domain = %domain, csn = %csn, change_number, "Indexed update");
        Ok(())
    }

    fn publish_heartbeat(&self, domain: &DomainId, csn: Csn) -> Result<()> {
        trace!(domain = %domain, csn = %csn, "Heartbeat");
        Ok(())
    }

    fn clear_domain(&self, domain: &DomainId) -> Result<()> {
        self.index.clear_domain(domain)?;
        Ok(())
    }
}

impl std::fmt::Debug for SequentialIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialIndexer")
            .field("last_generated", &self.index.last_generated_change_number())
            .finish()
    }
}
