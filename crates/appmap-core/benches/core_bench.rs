//! Criterion benchmarks for appmap-core.
//!
//! ## Benchmark groups
//!
//! 1. **build** — parse, normalize and build a trace.
//! 2. **canonicalize** — every canonicalization algorithm on a built trace.
//! 3. **fingerprint** — full fingerprint set (all algorithms plus digests).
//! 4. **sequence_diff** — diagram construction and base/head diff.
//!
//! ## Running
//!
//! ```sh
//! cargo bench --manifest-path crates/appmap-core/Cargo.toml
//! # Run only the diff group:
//! cargo bench --manifest-path crates/appmap-core/Cargo.toml -- sequence_diff
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

use appmap_core::fingerprint::compute_fingerprints;
use appmap_core::sequence::{build_diagram, diff, DiffOptions};
use appmap_core::{AppMap, AppMapBuilder, Algorithm};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `width` root calls, each a chain `depth` calls deep, with a query every
/// third level. `variant` renames one method so base/head diffs have work.
fn synthetic_trace(width: usize, depth: usize, variant: usize) -> Vec<u8> {
    let mut events = Vec::new();
    let mut id = 0u64;
    for root in 0..width {
        let mut open = Vec::new();
        for level in 0..depth {
            id += 1;
            open.push(id);
            let method = if root == variant && level == depth / 2 {
                "renamed".to_string()
            } else {
                format!("step{}", (root + level) % 5)
            };
            events.push(json!({
                "id": id, "event": "call", "thread_id": 1 + root % 3,
                "defined_class": format!("app.Service{}", level % 7),
                "method_id": method,
                "static": level % 2 == 0
            }));
            if level % 3 == 2 {
                id += 1;
                events.push(json!({
                    "id": id, "event": "call", "thread_id": 1 + root % 3,
                    "sql_query": {"sql": format!("SELECT * FROM t{} WHERE id = {root}", level % 4)}
                }));
                id += 1;
                events.push(json!({"id": id, "event": "return", "thread_id": 1 + root % 3}));
            }
        }
        while open.pop().is_some() {
            id += 1;
            events.push(json!({"id": id, "event": "return", "thread_id": 1 + root % 3}));
        }
    }
    json!({"metadata": {"name": "synthetic"}, "classMap": [], "events": events})
        .to_string()
        .into_bytes()
}

fn built(width: usize, depth: usize, variant: usize) -> AppMap {
    AppMapBuilder::source(&synthetic_trace(width, depth, variant))
        .unwrap()
        .normalize()
        .build()
}

const SCALES: &[(usize, usize)] = &[(10, 10), (50, 20), (200, 25)];

// ---------------------------------------------------------------------------
// build
// ---------------------------------------------------------------------------

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    for &(width, depth) in SCALES {
        let bytes = synthetic_trace(width, depth, usize::MAX);
        group.bench_with_input(
            BenchmarkId::new("source_normalize_build", width * depth),
            &bytes,
            |b, bytes| {
                b.iter(|| {
                    let appmap = AppMapBuilder::source(bytes).unwrap().normalize().build();
                    black_box(appmap.len());
                });
            },
        );
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// canonicalize
// ---------------------------------------------------------------------------

fn bench_canonicalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("canonicalize");
    let appmap = built(50, 20, usize::MAX);
    for algorithm in Algorithm::ALL {
        group.bench_function(algorithm.as_str(), |b| {
            b.iter(|| black_box(algorithm.apply(&appmap).to_json().unwrap()));
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// fingerprint
// ---------------------------------------------------------------------------

fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");
    for &(width, depth) in SCALES {
        let appmap = built(width, depth, usize::MAX);
        group.bench_with_input(
            BenchmarkId::new("compute_fingerprints", width * depth),
            &appmap,
            |b, appmap| {
                b.iter(|| black_box(compute_fingerprints(appmap).unwrap()));
            },
        );
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// sequence_diff
// ---------------------------------------------------------------------------

fn bench_sequence_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequence_diff");
    for &(width, depth) in SCALES {
        let base = build_diagram(&built(width, depth, usize::MAX));
        let head = build_diagram(&built(width, depth, width / 2));
        group.bench_with_input(
            BenchmarkId::new("diff", width * depth),
            &(base, head),
            |b, (base, head)| {
                b.iter(|| black_box(diff(base, head, &DiffOptions::default()).moves.len()));
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_build,
    bench_canonicalize,
    bench_fingerprint,
    bench_sequence_diff,
);
criterion_main!(benches);
