//! Retention and purge

use crate::common::*;
use changelogdb::prelude::*;
use std::time::Duration;

#[test]
fn test_purge_before_is_idempotent() {
    let changelog = ephemeral();
    let d = domain("o=D");
    for t in [100, 200, 300] {
        changelog.publish_update(&d, update(t, 1)).unwrap();
    }

    assert_eq!(changelog.purge_before(&d, ReplicaId(1), &csn(250, 1)).unwrap(), 2);
    assert_eq!(changelog.purge_before(&d, ReplicaId(1), &csn(250, 1)).unwrap(), 0);
    // older than everything left
    assert_eq!(changelog.purge_before(&d, ReplicaId(1), &csn(10, 1)).unwrap(), 0);
    assert_eq!(changelog.oldest_csns(&d).unwrap().get(ReplicaId(1)), Some(csn(300, 1)));
    assert_eq!(changelog.purge_before(&d, ReplicaId(2), &csn(250, 2)).unwrap(), 0);
}

#[test]
fn test_background_purge_keeps_index_ahead_of_logs() {
    let (changelog, clock) = with_clock(Duration::from_millis(1_000));
    let d = domain("o=D");
    changelog.publish_update(&d, update(100, 1)).unwrap();
    changelog.publish_update(&d, update(200, 2)).unwrap();
    changelog.publish_update(&d, update(5_000, 1)).unwrap();

    clock.set(4_500);
    assert!(eventually(|| changelog.oldest_change_number().unwrap() == 3));
    assert!(eventually(|| changelog.oldest_csns(&d).unwrap().len() == 1));

    let oldest_indexed = changelog
        .engine()
        .change_number_index()
        .read_first()
        .unwrap()
        .unwrap()
        .csn;
    for (_, oldest) in changelog.oldest_csns(&d).unwrap().iter() {
        assert!(oldest >= Csn::floor_at(3_500));
        assert!(oldest <= oldest_indexed);
    }
}

#[test]
fn test_zero_delay_stops_purging_and_positive_resumes() {
    let (changelog, clock) = with_clock(Duration::ZERO);
    let d = domain("o=D");
    changelog.publish_update(&d, update(100, 1)).unwrap();
    changelog.publish_update(&d, update(900, 1)).unwrap();
    clock.set(1_000);

    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(changelog.oldest_change_number().unwrap(), 1);

    // manual purge still works
    assert_eq!(changelog.purge_before(&d, ReplicaId(1), &csn(50, 1)).unwrap(), 0);
    assert_eq!(changelog.oldest_csns(&d).unwrap().get(ReplicaId(1)), Some(csn(100, 1)));

    changelog.set_purge_delay(Duration::from_millis(500)).unwrap();
    assert!(eventually(|| changelog.oldest_csns(&d).unwrap().get(ReplicaId(1)) == Some(csn(900, 1))));
    assert_eq!(changelog.oldest_change_number().unwrap(), 2);
}

#[test]
fn test_purge_without_change_numbers_uses_floor() {
    let (changelog, clock) = with_clock(Duration::ZERO);
    changelog.set_compute_change_number(false);
    let d = domain("o=D");
    changelog.publish_update(&d, update(100, 1)).unwrap();
    changelog.publish_update(&d, update(950, 1)).unwrap();
    clock.set(1_000);

    changelog.set_purge_delay(Duration::from_millis(100)).unwrap();
    assert!(eventually(|| changelog.oldest_csns(&d).unwrap().get(ReplicaId(1)) == Some(csn(950, 1))));
    assert_eq!(changelog.newest_change_number().unwrap(), 0);
}

#[test]
fn test_purge_now() {
    let (changelog, clock) = with_clock(Duration::ZERO);
    let d = domain("o=D");
    changelog.publish_update(&d, update(100, 1)).unwrap();
    changelog.publish_update(&d, update(800, 1)).unwrap();

    // disabled: nothing happens
    let outcome = changelog.purge_now().unwrap();
    assert_eq!(outcome.bound, None);

    clock.set(1_000);
    changelog.set_purge_delay(Duration::from_millis(500)).unwrap();
    let outcome = changelog.purge_now().unwrap();
    assert_eq!(outcome.bound, Some(Csn::floor_at(500)));
    assert_eq!(outcome.next_eligible_ms, Some(1_300));
}

#[test]
fn test_out_of_range_delay_rejected() {
    let changelog = ephemeral();
    let err = changelog
        .set_purge_delay(Duration::from_secs(100 * 365 * 24 * 3600))
        .unwrap_err();
    assert!(err.is_rejected());
    assert_eq!(changelog.purge_delay(), Duration::ZERO);
}
