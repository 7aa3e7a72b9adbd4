//! Dispatch and effect throughput benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use slicekit_core::{
    EffectOptions, IdGenerator, Key, ManualScheduler, Slice, SliceSpec, StateField, Store,
    StoreOptions,
};

/// A chain of `depth` slices, each depending on the previous one.
fn slice_chain(depth: usize) -> (Vec<Slice>, Vec<StateField<u64>>) {
    let ids = IdGenerator::new();
    let mut slices: Vec<Slice> = Vec::with_capacity(depth);
    let mut fields = Vec::with_capacity(depth);

    for i in 0..depth {
        let deps: Vec<Slice> = slices.last().cloned().into_iter().collect();
        let key = Key::with_ids(ids.clone(), &format!("s{i}"), &deps);
        let value = key.field(0u64).unwrap();
        slices.push(key.slice(SliceSpec::new().field("value", &value)).unwrap());
        fields.push(value);
    }
    (slices, fields)
}

/// Benchmark applying transactions with no effects registered
fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    for depth in [1, 10, 50] {
        group.bench_with_input(BenchmarkId::new("slices", depth), &depth, |b, &depth| {
            let (slices, fields) = slice_chain(depth);
            let store = Store::new(StoreOptions::new(slices).scheduler(ManualScheduler::new()))
                .unwrap();
            let first = fields[0].clone();

            b.iter(|| {
                store.dispatch(first.update_with(|v| v + 1)).unwrap();
                black_box(store.state().sequence());
            });
        });
    }

    group.finish();
}

/// Benchmark dispatch plus flushing effects on the last slice of a chain
fn bench_effect_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("effect_flush");

    for effects in [1, 10, 100] {
        group.bench_with_input(
            BenchmarkId::new("effects", effects),
            &effects,
            |b, &effects| {
                let (slices, fields) = slice_chain(10);
                let scheduler = ManualScheduler::new();
                let store =
                    Store::new(StoreOptions::new(slices).scheduler(scheduler.clone())).unwrap();

                let first = fields[0].clone();
                for _ in 0..effects {
                    let first = first.clone();
                    store.effect(
                        move |ctx| {
                            black_box(first.track(ctx)?);
                            Ok(())
                        },
                        EffectOptions::default(),
                    );
                }
                scheduler.flush();

                b.iter(|| {
                    store.dispatch(first.update_with(|v| v + 1)).unwrap();
                    black_box(scheduler.flush());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_dispatch, bench_effect_flush);
criterion_main!(benches);
