//! Merge engine benchmarks.
//!
//! Measures `apply` and `remove` against tables of growing size, with one
//! owner per key so the claim lookups are exercised on every entry.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench merge_apply
//! # With a custom filter:
//! cargo bench --bench merge_apply -- apply
//! ```

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use authmap_core::merge::{Claims, MergePolicy, apply, remove};
use authmap_core::model::{EntryKind, MappingEntry, SharedTable, Snippet, SnippetSpec};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn arn(n: usize) -> String {
    format!("arn:aws:iam::111122223333:role/r{n}")
}

/// `owners` snippets owning `per_owner` role keys each, merged into a table.
fn populated(owners: usize, per_owner: usize) -> (SharedTable, Vec<Snippet>) {
    let mut table = SharedTable::default();
    let mut snippets = Vec::with_capacity(owners);
    for o in 0..owners {
        let entries: Vec<MappingEntry> = (0..per_owner)
            .map(|i| MappingEntry::new(&arn(o * per_owner + i), &format!("team{o}"), &["dev"]))
            .collect();
        let mut snippet = Snippet::new(
            format!("ns{o:04}/s").parse().expect("valid id"),
            SnippetSpec {
                map_roles: entries.clone(),
                ..SnippetSpec::default()
            },
        );
        for entry in entries {
            snippet.status.role_arns.insert(entry.principal_arn.clone());
            table.upsert(EntryKind::Role, entry);
        }
        snippets.push(snippet);
    }
    (table, snippets)
}

// ---------------------------------------------------------------------------
// Benchmark: apply
// ---------------------------------------------------------------------------

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");
    let policy = MergePolicy::default();

    for &owners in &[10_usize, 100, 1_000] {
        let (table, snippets) = populated(owners, 5);
        let subject = &snippets[owners / 2];
        let claims = Claims::gather(snippets.iter(), &subject.id, &policy);

        group.throughput(Throughput::Elements(table.len() as u64));
        group.bench_with_input(BenchmarkId::new("entries", table.len()), &table, |b, t| {
            b.iter(|| apply(black_box(t), subject, &claims, &policy));
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: remove
// ---------------------------------------------------------------------------

fn bench_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("remove");
    let policy = MergePolicy::default();

    for &owners in &[10_usize, 100, 1_000] {
        let (table, snippets) = populated(owners, 5);
        let subject = &snippets[0];
        let claims = Claims::gather(snippets.iter(), &subject.id, &policy);

        group.throughput(Throughput::Elements(table.len() as u64));
        group.bench_with_input(BenchmarkId::new("entries", table.len()), &table, |b, t| {
            b.iter(|| remove(black_box(t), subject, &claims, &policy));
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: claim gathering
// ---------------------------------------------------------------------------

fn bench_gather(c: &mut Criterion) {
    let mut group = c.benchmark_group("gather");
    let policy = MergePolicy::default();

    for &owners in &[100_usize, 1_000] {
        let (_, snippets) = populated(owners, 5);
        group.bench_with_input(BenchmarkId::new("snippets", owners), &snippets, |b, s| {
            b.iter(|| Claims::gather(black_box(s).iter(), &s[0].id, &policy));
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

criterion_group!(benches, bench_apply, bench_remove, bench_gather);
criterion_main!(benches);
