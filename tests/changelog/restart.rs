//! Restart from the persisted state journal

use crate::common::*;
use changelogdb::prelude::*;
use std::time::Duration;

fn open_at(path: &std::path::Path) -> Changelog {
    Changelog::builder()
        .path(path)
        .purge_delay(Duration::ZERO)
        .open()
        .unwrap()
}

#[test]
fn test_restart_restores_membership_and_generation_id() {
    let dir = tempfile::tempdir().unwrap();
    let d = domain("o=D");
    {
        let changelog = open_at(dir.path());
        changelog.set_generation_id(&d, 42).unwrap();
        changelog.publish_update(&d, update(100, 7)).unwrap();
        changelog.close();
    }

    let changelog = open_at(dir.path());
    assert_eq!(changelog.domains(), vec![d.clone()]);
    assert_eq!(changelog.domain_generation_id(&d), Some(42));
    let entry = changelog.engine().registry().replica(&d, ReplicaId(7)).unwrap();
    assert_eq!(entry.offline_csn(), None);
    // the publish after restart reuses the restored log
    assert!(!changelog.publish_update(&d, update(200, 7)).unwrap());
}

#[test]
fn test_restart_keeps_offline_marker() {
    let dir = tempfile::tempdir().unwrap();
    let d = domain("o=D");
    {
        let changelog = open_at(dir.path());
        changelog.publish_update(&d, update(100, 3)).unwrap();
        changelog
            .notify_replica_offline(&d, ReplicaId(3), csn(150, 3))
            .unwrap();
    }

    let changelog = open_at(dir.path());
    let cursor = changelog
        .open_cursor_for_replica(&d, ReplicaId(3), None, CursorOptions::default())
        .unwrap();
    assert_eq!(cursor.offline_csn(), Some(csn(150, 3)));

    // coming back online is persisted too
    changelog.publish_update(&d, update(200, 3)).unwrap();
    drop(cursor);
    drop(changelog);
    let changelog = open_at(dir.path());
    let cursor = changelog
        .open_cursor_for_replica(&d, ReplicaId(3), None, CursorOptions::default())
        .unwrap();
    assert_eq!(cursor.offline_csn(), None);
}

#[test]
fn test_removed_domain_stays_removed() {
    let dir = tempfile::tempdir().unwrap();
    let a = domain("o=a");
    let b = domain("o=b");
    {
        let changelog = open_at(dir.path());
        changelog.publish_update(&a, update(100, 1)).unwrap();
        changelog.publish_update(&b, update(100, 2)).unwrap();
        assert!(changelog.remove_domain(&a).unwrap());
    }

    let changelog = open_at(dir.path());
    assert_eq!(changelog.domains(), vec![b]);
}

#[test]
fn test_clear_all_forgets_everything() {
    let dir = tempfile::tempdir().unwrap();
    {
        let changelog = open_at(dir.path());
        changelog.publish_update(&domain("o=a"), update(100, 1)).unwrap();
        changelog.set_generation_id(&domain("o=b"), 7).unwrap();
        changelog.clear_all().unwrap();
    }

    let changelog = open_at(dir.path());
    assert!(changelog.domains().is_empty());
    assert_eq!(changelog.domain_generation_id(&domain("o=b")), None);
}

#[test]
fn test_restart_restores_logs_and_change_numbers() {
    let dir = tempfile::tempdir().unwrap();
    let d = domain("o=D");
    {
        let changelog = open_at(dir.path());
        changelog.publish_update(&d, update(100, 7)).unwrap();
        changelog.publish_update(&d, update(200, 7)).unwrap();
    }

    let changelog = open_at(dir.path());
    assert_eq!(changelog.newest_change_number().unwrap(), 2);
    assert_eq!(changelog.newest_csns(&d).unwrap().get(ReplicaId(7)), Some(csn(200, 7)));

    // older than what was stored before the restart: a replay
    changelog.publish_update(&d, update(150, 7)).unwrap();
    changelog.publish_update(&d, update(300, 7)).unwrap();
    assert_eq!(changelog.newest_change_number().unwrap(), 3);

    let mut cursor = changelog
        .open_cursor_for_domain(&d, &ServerState::new(), CursorOptions::default())
        .unwrap();
    assert_eq!(drain_domain(&mut cursor), vec![(100, 7), (200, 7), (300, 7)]);

    let mut numbers = changelog.change_number_index_cursor(None).unwrap();
    let mut seen = Vec::new();
    while numbers.next().unwrap() {
        let record = numbers.record().unwrap();
        seen.push((record.change_number, record.csn.time_ms()));
    }
    assert_eq!(seen, vec![(1, 100), (2, 200), (3, 300)]);
}

#[test]
fn test_restart_after_purge_keeps_numbering() {
    let dir = tempfile::tempdir().unwrap();
    let d = domain("o=D");
    {
        let changelog = open_at(dir.path());
        changelog.publish_update(&d, update(100, 1)).unwrap();
        changelog.publish_update(&d, update(200, 1)).unwrap();
        changelog.purge_before(&d, ReplicaId(1), &csn(200, 1)).unwrap();
    }

    let changelog = open_at(dir.path());
    assert_eq!(changelog.oldest_csns(&d).unwrap().get(ReplicaId(1)), Some(csn(200, 1)));
    changelog.publish_update(&d, update(300, 1)).unwrap();
    assert_eq!(changelog.newest_change_number().unwrap(), 3);
}
