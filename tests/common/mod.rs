//! Shared helpers for changelog integration tests

#![allow(dead_code)]

use changelogdb::prelude::*;
use changelogdb::{DomainCursor, ManualClock, MultiDomainCursor};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub fn csn(t: u64, r: u16) -> Csn {
    Csn::new(t, 0, ReplicaId(r))
}

pub fn update(t: u64, r: u16) -> UpdateRecord {
    UpdateRecord::new(csn(t, r), format!("change {}@{}", t, r).into_bytes())
}

pub fn domain(name: &str) -> DomainId {
    DomainId::new(name)
}

/// Ephemeral changelog with purging disabled
pub fn ephemeral() -> Changelog {
    Changelog::builder()
        .ephemeral()
        .purge_delay(Duration::ZERO)
        .open()
        .unwrap()
}

/// Ephemeral changelog reading time from a manual clock
pub fn with_clock(purge_delay: Duration) -> (Changelog, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(0));
    let changelog = Changelog::builder()
        .ephemeral()
        .purge_delay(purge_delay)
        .max_purge_sleep(Duration::from_millis(5))
        .clock(Arc::clone(&clock) as Arc<dyn changelogdb::Clock>)
        .open()
        .unwrap();
    (changelog, clock)
}

/// Deliver everything available, as (time, replica) pairs
pub fn drain_domain(cursor: &mut DomainCursor) -> Vec<(u64, u16)> {
    let mut seen = Vec::new();
    while cursor.next().unwrap() {
        let csn = cursor.record().unwrap().csn;
        seen.push((csn.time_ms(), csn.replica_id().as_u16()));
    }
    seen
}

/// Deliver everything available, as (domain, time) pairs
pub fn drain_all(cursor: &mut MultiDomainCursor) -> Vec<(String, u64)> {
    let mut seen = Vec::new();
    while cursor.next().unwrap() {
        let update = cursor.record().unwrap();
        seen.push((update.domain.to_string(), update.record.csn.time_ms()));
    }
    seen
}

/// Poll `condition` for up to five seconds
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}
