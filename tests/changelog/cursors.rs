//! Domain and replica cursors

use crate::common::*;
use changelogdb::prelude::*;
use std::sync::Arc;
use std::thread;

#[test]
fn test_domain_cursor_delivers_in_csn_order_then_picks_up_appends() {
    let changelog = ephemeral();
    let d = domain("o=D");
    changelog.publish_update(&d, update(100, 1)).unwrap();
    changelog.publish_update(&d, update(200, 2)).unwrap();

    let mut cursor = changelog
        .open_cursor_for_domain(&d, &ServerState::new(), CursorOptions::default())
        .unwrap();
    assert_eq!(cursor.state(), CursorState::Uninitialized);
    assert!(cursor.next().unwrap());
    assert_eq!(cursor.record().unwrap().csn, csn(100, 1));
    assert!(cursor.next().unwrap());
    assert_eq!(cursor.record().unwrap().csn, csn(200, 2));
    assert!(!cursor.next().unwrap());
    assert_eq!(cursor.state(), CursorState::Exhausted);

    changelog.publish_update(&d, update(300, 1)).unwrap();
    assert!(cursor.next().unwrap());
    assert_eq!(cursor.record().unwrap().csn, csn(300, 1));
    assert_eq!(cursor.record().unwrap().payload, b"change 300@1".to_vec());
}

#[test]
fn test_domain_cursor_picks_up_new_replica() {
    let changelog = ephemeral();
    let d = domain("o=D");
    changelog.publish_update(&d, update(100, 1)).unwrap();

    let mut cursor = changelog
        .open_cursor_for_domain(&d, &ServerState::new(), CursorOptions::default())
        .unwrap();
    assert_eq!(drain_domain(&mut cursor), vec![(100, 1)]);

    // replica 3 did not exist when the cursor was opened
    assert!(changelog.publish_update(&d, update(50, 3)).unwrap());
    changelog.publish_update(&d, update(150, 3)).unwrap();
    assert_eq!(drain_domain(&mut cursor), vec![(50, 3), (150, 3)]);
    assert_eq!(cursor.replica_ids(), vec![ReplicaId(1), ReplicaId(3)]);
}

#[test]
fn test_domain_cursor_on_unknown_domain_follows_creation() {
    let changelog = ephemeral();
    let d = domain("o=later");
    let mut cursor = changelog
        .open_cursor_for_domain(&d, &ServerState::new(), CursorOptions::default())
        .unwrap();
    assert!(!cursor.next().unwrap());

    changelog.publish_update(&d, update(100, 1)).unwrap();
    assert_eq!(drain_domain(&mut cursor), vec![(100, 1)]);
}

#[test]
fn test_resume_from_server_state() {
    let changelog = ephemeral();
    let d = domain("o=D");
    for (t, r) in [(100, 1), (200, 2), (300, 1), (400, 2)] {
        changelog.publish_update(&d, update(t, r)).unwrap();
    }

    let mut first = changelog
        .open_cursor_for_domain(&d, &ServerState::new(), CursorOptions::default())
        .unwrap();
    assert!(first.next().unwrap());
    assert!(first.next().unwrap());
    assert!(first.next().unwrap());
    let state = first.server_state().clone();
    assert_eq!(state.get(ReplicaId(1)), Some(csn(300, 1)));
    assert_eq!(state.get(ReplicaId(2)), Some(csn(200, 2)));
    first.close();

    let mut resumed = changelog
        .open_cursor_for_domain(&d, &state, CursorOptions::default())
        .unwrap();
    assert_eq!(drain_domain(&mut resumed), vec![(400, 2)]);
}

#[test]
fn test_replica_cursor_strategies() {
    let changelog = ephemeral();
    let d = domain("o=D");
    for t in [100, 200, 300] {
        changelog.publish_update(&d, update(t, 1)).unwrap();
    }

    let mut exact_missing = changelog
        .open_cursor_for_replica(&d, ReplicaId(1), Some(&csn(150, 1)), CursorOptions::exact())
        .unwrap();
    assert!(!exact_missing.next().unwrap());

    let mut exact = changelog
        .open_cursor_for_replica(&d, ReplicaId(1), Some(&csn(200, 1)), CursorOptions::exact())
        .unwrap();
    assert!(exact.next().unwrap());
    assert_eq!(exact.record().unwrap().csn, csn(200, 1));

    let mut after = changelog
        .open_cursor_for_replica(&d, ReplicaId(1), Some(&csn(150, 1)), CursorOptions::default())
        .unwrap();
    assert!(after.next().unwrap());
    assert_eq!(after.record().unwrap().csn, csn(200, 1));

    let floor = CursorOptions::new(
        KeyMatchingStrategy::LessThanOrEqualToKey,
        PositionStrategy::OnMatchingKey,
    );
    let mut lower = changelog
        .open_cursor_for_replica(&d, ReplicaId(1), Some(&csn(250, 1)), floor)
        .unwrap();
    assert!(lower.next().unwrap());
    assert_eq!(lower.record().unwrap().csn, csn(200, 1));
}

#[test]
fn test_replica_cursor_opened_before_first_update() {
    let changelog = ephemeral();
    let d = domain("o=D");
    let mut cursor = changelog
        .open_cursor_for_replica(&d, ReplicaId(1), None, CursorOptions::default())
        .unwrap();
    assert!(!cursor.next().unwrap());
    assert!(changelog.domains().is_empty());

    changelog.publish_update(&d, update(100, 1)).unwrap();
    assert!(cursor.next().unwrap());
    assert_eq!(cursor.record().unwrap().csn, csn(100, 1));
    changelog.publish_update(&d, update(200, 1)).unwrap();
    assert!(cursor.next().unwrap());
    assert_eq!(cursor.record().unwrap().csn, csn(200, 1));
}

#[test]
fn test_replayed_update_is_not_stored_twice() {
    let changelog = ephemeral();
    let d = domain("o=D");
    changelog.publish_update(&d, update(100, 1)).unwrap();
    changelog.publish_update(&d, update(200, 1)).unwrap();
    changelog.publish_update(&d, update(200, 1)).unwrap();
    changelog.publish_update(&d, update(150, 1)).unwrap();

    let mut cursor = changelog
        .open_cursor_for_domain(&d, &ServerState::new(), CursorOptions::default())
        .unwrap();
    assert_eq!(drain_domain(&mut cursor), vec![(100, 1), (200, 1)]);
    assert_eq!(changelog.newest_change_number().unwrap(), 2);
}

#[test]
fn test_cursor_release_unregisters() {
    let changelog = ephemeral();
    let d = domain("o=D");
    let first = changelog
        .open_cursor_for_domain(&d, &ServerState::new(), CursorOptions::default())
        .unwrap();
    let mut second = changelog
        .open_cursor_for_domain(&d, &ServerState::new(), CursorOptions::default())
        .unwrap();
    assert_eq!(changelog.live_cursor_count(), 2);

    drop(first);
    assert_eq!(changelog.live_cursor_count(), 1);
    second.close();
    assert_eq!(changelog.live_cursor_count(), 0);
    assert!(!second.next().unwrap());
}

#[test]
fn test_concurrent_replicas_all_reach_live_cursor() {
    let changelog = Arc::new(ephemeral());
    let d = domain("o=D");
    let mut cursor = changelog
        .open_cursor_for_domain(&d, &ServerState::new(), CursorOptions::default())
        .unwrap();

    let handles: Vec<_> = (1..=8u16)
        .map(|r| {
            let changelog = Arc::clone(&changelog);
            let d = d.clone();
            thread::spawn(move || {
                for t in 1..=50u64 {
                    changelog.publish_update(&d, update(t * 10, r)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let seen = drain_domain(&mut cursor);
    assert_eq!(seen.len(), 8 * 50);
    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted);
    assert_eq!(changelog.newest_change_number().unwrap(), 400);
}

#[test]
fn test_change_number_cursor_from_start() {
    let changelog = ephemeral();
    let a = domain("o=a");
    let b = domain("o=b");
    changelog.publish_update(&a, update(100, 1)).unwrap();
    changelog.publish_update(&b, update(90, 2)).unwrap();

    let mut cursor = changelog.change_number_index_cursor(None).unwrap();
    assert!(cursor.next().unwrap());
    let first = cursor.record().unwrap().clone();
    assert_eq!((first.change_number, first.domain), (1, a));
    assert!(cursor.next().unwrap());
    let second = cursor.record().unwrap().clone();
    assert_eq!((second.change_number, second.domain, second.csn), (2, b, csn(90, 2)));
    assert!(!cursor.next().unwrap());
}
