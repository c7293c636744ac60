//! Cross-domain cursors

use crate::common::*;
use changelogdb::prelude::*;
use std::collections::BTreeSet;

fn open_all(changelog: &Changelog, excluded: &[&str]) -> changelogdb::MultiDomainCursor {
    let excluded: BTreeSet<DomainId> = excluded.iter().map(|d| domain(d)).collect();
    changelog
        .open_cursor_across_domains(
            &MultiDomainServerState::new(),
            CursorOptions::default(),
            &excluded,
        )
        .unwrap()
}

#[test]
fn test_interleaves_domains_by_csn() {
    let changelog = ephemeral();
    changelog.publish_update(&domain("o=a"), update(100, 1)).unwrap();
    changelog.publish_update(&domain("o=b"), update(150, 2)).unwrap();
    changelog.publish_update(&domain("o=a"), update(200, 1)).unwrap();

    let mut cursor = open_all(&changelog, &[]);
    assert_eq!(
        drain_all(&mut cursor),
        vec![
            ("o=a".to_string(), 100),
            ("o=b".to_string(), 150),
            ("o=a".to_string(), 200),
        ]
    );
}

#[test]
fn test_picks_up_new_domain() {
    let changelog = ephemeral();
    changelog.publish_update(&domain("o=a"), update(100, 1)).unwrap();
    let mut cursor = open_all(&changelog, &[]);
    assert_eq!(drain_all(&mut cursor).len(), 1);

    changelog.publish_update(&domain("o=new"), update(50, 4)).unwrap();
    changelog.publish_update(&domain("o=a"), update(300, 2)).unwrap();
    assert_eq!(
        drain_all(&mut cursor),
        vec![("o=new".to_string(), 50), ("o=a".to_string(), 300)]
    );
    assert_eq!(cursor.domains(), vec![domain("o=a"), domain("o=new")]);
}

#[test]
fn test_excluded_domains_never_delivered() {
    let changelog = ephemeral();
    changelog.publish_update(&domain("cn=admin data"), update(100, 1)).unwrap();
    changelog.publish_update(&domain("o=a"), update(200, 1)).unwrap();

    let mut cursor = open_all(&changelog, &["cn=admin data"]);
    changelog.publish_update(&domain("cn=admin data"), update(300, 1)).unwrap();
    assert_eq!(drain_all(&mut cursor), vec![("o=a".to_string(), 200)]);
}

#[test]
fn test_resume_from_multi_domain_state() {
    let changelog = ephemeral();
    changelog.publish_update(&domain("o=a"), update(100, 1)).unwrap();
    changelog.publish_update(&domain("o=b"), update(200, 2)).unwrap();

    let mut first = open_all(&changelog, &[]);
    assert!(first.next().unwrap());
    let state = first.multi_domain_state().clone();
    drop(first);

    changelog.publish_update(&domain("o=a"), update(300, 1)).unwrap();
    let mut resumed = changelog
        .open_cursor_across_domains(&state, CursorOptions::default(), &BTreeSet::new())
        .unwrap();
    assert_eq!(
        drain_all(&mut resumed),
        vec![("o=b".to_string(), 200), ("o=a".to_string(), 300)]
    );
}

#[test]
fn test_removed_domain_restarts_from_scratch() {
    let changelog = ephemeral();
    let a = domain("o=a");
    changelog.publish_update(&a, update(100, 1)).unwrap();
    changelog.publish_update(&a, update(200, 1)).unwrap();
    let mut cursor = open_all(&changelog, &[]);
    assert_eq!(drain_all(&mut cursor).len(), 2);

    assert!(changelog.remove_domain(&a).unwrap());
    assert!(!cursor.next().unwrap());
    assert!(cursor.multi_domain_state().get(&a).is_none());

    // a recreated domain is read from its first record
    changelog.publish_update(&a, update(50, 1)).unwrap();
    assert_eq!(drain_all(&mut cursor), vec![("o=a".to_string(), 50)]);
}

#[test]
fn test_release_unregisters() {
    let changelog = ephemeral();
    let mut cursor = open_all(&changelog, &[]);
    assert_eq!(changelog.live_cursor_count(), 1);
    cursor.close();
    assert_eq!(changelog.live_cursor_count(), 0);
}
