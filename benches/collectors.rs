//! Collector benchmarks on a list-building workload.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use njord::{CollectorKind, Heap, HeapConfig};

/// Build a list of `len` pairs, dropping one scalar per element, then let
/// the whole list die.
fn build_and_drop_list(heap: &mut Heap, len: i64) {
    heap.alloc_scalar(0).unwrap();
    for i in 0..len {
        heap.alloc_scalar(i).unwrap();
        heap.alloc_scalar(-i).unwrap();
        heap.pop_root().unwrap();
        heap.alloc_pair().unwrap();
    }
    heap.pop_root().unwrap();
}

fn bench_list_building(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_building");

    for kind in CollectorKind::ALL.into_iter().filter(|kind| kind.is_sound()) {
        group.bench_with_input(BenchmarkId::from_parameter(kind), &kind, |b, &kind| {
            b.iter(|| {
                let mut heap = Heap::with_config(&HeapConfig::for_collector(kind)).unwrap();
                for _ in 0..10 {
                    build_and_drop_list(&mut heap, black_box(200));
                }
                black_box(heap.destroy())
            });
        });
    }

    group.finish();
}

fn bench_forced_collection(c: &mut Criterion) {
    let mut group = c.benchmark_group("forced_collection");

    for kind in CollectorKind::ALL.into_iter().filter(|kind| kind.collects_cycles()) {
        group.bench_with_input(BenchmarkId::from_parameter(kind), &kind, |b, &kind| {
            let mut heap = Heap::with_config(&HeapConfig::for_collector(kind)).unwrap();
            heap.alloc_scalar(0).unwrap();
            for i in 0..500 {
                heap.alloc_scalar(i).unwrap();
                heap.alloc_pair().unwrap();
            }
            b.iter(|| heap.force_collect());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_list_building, bench_forced_collection);
criterion_main!(benches);
