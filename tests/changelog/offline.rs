//! Offline replicas

use crate::common::*;
use changelogdb::prelude::*;

#[test]
fn test_replica_cursor_stops_at_offline_csn() {
    let changelog = ephemeral();
    let d = domain("o=D");
    for t in [100, 200, 300, 400] {
        changelog.publish_update(&d, update(t, 1)).unwrap();
    }
    let mut cursor = changelog
        .open_cursor_for_replica(&d, ReplicaId(1), None, CursorOptions::default())
        .unwrap();
    assert!(cursor.next().unwrap());

    changelog
        .notify_replica_offline(&d, ReplicaId(1), csn(250, 1))
        .unwrap();
    assert!(cursor.next().unwrap());
    assert_eq!(cursor.record().unwrap().csn, csn(200, 1));
    // records beyond the offline CSN exist but are not delivered
    assert!(!cursor.next().unwrap());
    assert_eq!(cursor.state(), CursorState::ReplicaOffline(csn(250, 1)));
    assert_eq!(cursor.offline_csn(), Some(csn(250, 1)));
}

#[test]
fn test_heartbeat_brings_replica_back_online() {
    let changelog = ephemeral();
    let d = domain("o=D");
    changelog.publish_update(&d, update(100, 1)).unwrap();
    changelog.publish_update(&d, update(300, 1)).unwrap();
    changelog
        .notify_replica_offline(&d, ReplicaId(1), csn(200, 1))
        .unwrap();

    let mut cursor = changelog
        .open_cursor_for_replica(&d, ReplicaId(1), None, CursorOptions::default())
        .unwrap();
    assert!(cursor.next().unwrap());
    assert!(!cursor.next().unwrap());
    assert!(matches!(cursor.state(), CursorState::ReplicaOffline(_)));

    // a heartbeat not newer than the marker changes nothing
    changelog.replica_heartbeat(&d, ReplicaId(1), csn(200, 1)).unwrap();
    assert!(!cursor.next().unwrap());

    changelog.replica_heartbeat(&d, ReplicaId(1), csn(500, 1)).unwrap();
    assert!(cursor.next().unwrap());
    assert_eq!(cursor.record().unwrap().csn, csn(300, 1));
}

#[test]
fn test_publish_brings_replica_back_online() {
    let changelog = ephemeral();
    let d = domain("o=D");
    changelog.publish_update(&d, update(100, 1)).unwrap();
    changelog
        .notify_replica_offline(&d, ReplicaId(1), csn(150, 1))
        .unwrap();

    let mut cursor = changelog
        .open_cursor_for_domain(&d, &ServerState::new(), CursorOptions::default())
        .unwrap();
    assert_eq!(drain_domain(&mut cursor), vec![(100, 1)]);
    assert_eq!(cursor.offline_replicas(), vec![(ReplicaId(1), csn(150, 1))]);

    changelog.publish_update(&d, update(400, 1)).unwrap();
    assert_eq!(drain_domain(&mut cursor), vec![(400, 1)]);
    assert!(cursor.offline_replicas().is_empty());
}

#[test]
fn test_offline_replica_does_not_block_domain() {
    let changelog = ephemeral();
    let d = domain("o=D");
    changelog.publish_update(&d, update(100, 1)).unwrap();
    changelog.publish_update(&d, update(300, 1)).unwrap();
    changelog.publish_update(&d, update(200, 2)).unwrap();
    changelog
        .notify_replica_offline(&d, ReplicaId(1), csn(250, 1))
        .unwrap();

    let mut cursor = changelog
        .open_cursor_for_domain(&d, &ServerState::new(), CursorOptions::default())
        .unwrap();
    assert_eq!(drain_domain(&mut cursor), vec![(100, 1), (200, 2)]);
}

#[test]
fn test_offline_for_unknown_replica_creates_its_log() {
    let changelog = ephemeral();
    let d = domain("o=D");
    changelog
        .notify_replica_offline(&d, ReplicaId(9), csn(100, 9))
        .unwrap();
    assert_eq!(changelog.domains(), vec![d.clone()]);
    let cursor = changelog
        .open_cursor_for_replica(&d, ReplicaId(9), None, CursorOptions::default())
        .unwrap();
    assert_eq!(cursor.offline_csn(), Some(csn(100, 9)));
}

#[test]
fn test_offline_csn_from_other_replica_is_rejected() {
    let changelog = ephemeral();
    let err = changelog
        .notify_replica_offline(&domain("o=D"), ReplicaId(1), csn(100, 2))
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(changelog.domains().is_empty());
}
