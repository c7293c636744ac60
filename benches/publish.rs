//! Publish and Cursor Benchmarks
//!
//! | Benchmark | Path | Regression Detection |
//! |-----------|------|----------------------|
//! | publish/index_on | registry + replica log + change number index | append and allocation cost |
//! | publish/index_off | registry + replica log | log append cost |
//! | domain_cursor/replicas | k-way merge over replica logs | merge cost per lane |
//!
//! ## Running
//!
//! ```bash
//! cargo bench --bench publish
//! cargo bench --bench publish -- "domain_cursor"
//! ```

use changelogdb::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

// =============================================================================
// Utilities - All allocation happens here, outside timed loops
// =============================================================================

fn changelog(compute_change_number: bool) -> Changelog {
    Changelog::builder()
        .ephemeral()
        .purge_delay(Duration::ZERO)
        .compute_change_number(compute_change_number)
        .open()
        .unwrap()
}

fn pregenerate_updates(replicas: u16, per_replica: u64) -> Vec<UpdateRecord> {
    let mut updates = Vec::with_capacity(replicas as usize * per_replica as usize);
    for t in 1..=per_replica {
        for r in 1..=replicas {
            updates.push(UpdateRecord::new(Csn::new(t, 0, ReplicaId(r)), vec![0u8; 128]));
        }
    }
    updates
}

// =============================================================================
// Publish
// =============================================================================

fn publish_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");
    group.throughput(Throughput::Elements(1));
    let domain = DomainId::new("dc=example,dc=com");

    for (name, compute) in [("index_on", true), ("index_off", false)] {
        group.bench_function(name, |b| {
            let changelog = changelog(compute);
            let mut t = 0u64;
            b.iter(|| {
                t += 1;
                let record = UpdateRecord::new(Csn::new(t, 0, ReplicaId(1)), vec![0u8; 128]);
                black_box(changelog.publish_update(&domain, record).unwrap())
            });
        });
    }
    group.finish();
}

// =============================================================================
// Domain cursor merge
// =============================================================================

fn domain_cursor_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("domain_cursor");
    let domain = DomainId::new("dc=example,dc=com");
    let per_replica = 1_000u64;

    for replicas in [1u16, 4, 16] {
        let changelog = changelog(false);
        for update in pregenerate_updates(replicas, per_replica) {
            changelog.publish_update(&domain, update).unwrap();
        }
        group.throughput(Throughput::Elements(replicas as u64 * per_replica));
        group.bench_with_input(BenchmarkId::new("replicas", replicas), &replicas, |b, _| {
            b.iter(|| {
                let mut cursor = changelog
                    .open_cursor_for_domain(&domain, &ServerState::new(), CursorOptions::default())
                    .unwrap();
                let mut delivered = 0u64;
                while cursor.next().unwrap() {
                    delivered += 1;
                }
                black_box(delivered)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, publish_benchmarks, domain_cursor_benchmarks);
criterion_main!(benches);
