//! Micro-benchmarks for the reactive core: write fan-out, derived
//! recomputation, and batched writes.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use filament_core::{batch, Derived, Signal};

fn signal_write_fanout(c: &mut Criterion) {
    let signal = Signal::new(0u64);
    for _ in 0..8 {
        let _sub = signal.subscribe(|v| {
            black_box(*v);
        });
    }

    let mut n = 0u64;
    c.bench_function("signal_set_8_subscribers", |b| {
        b.iter(|| {
            n += 1;
            signal.set(black_box(n)).unwrap();
        })
    });
}

fn derived_chain(c: &mut Criterion) {
    let base = Signal::new(0u64);
    let base_clone = base.clone();
    let doubled = Derived::new(&[base.handle()], move || base_clone.get() * 2).unwrap();
    let doubled_clone = doubled.clone();
    let plus_one =
        Derived::new(&[doubled.handle()], move || doubled_clone.get() + 1).unwrap();

    let mut n = 0u64;
    c.bench_function("derived_chain_depth_2", |b| {
        b.iter(|| {
            n += 1;
            base.set(black_box(n)).unwrap();
            black_box(plus_one.get());
        })
    });
}

fn batched_writes(c: &mut Criterion) {
    let a = Signal::new(0u64);
    let b_cell = Signal::new(0u64);
    let a_clone = a.clone();
    let b_clone = b_cell.clone();
    let sum = Derived::new(&[a.handle(), b_cell.handle()], move || {
        a_clone.get() + b_clone.get()
    })
    .unwrap();

    let mut n = 0u64;
    c.bench_function("batch_two_writes", |b| {
        b.iter(|| {
            n += 1;
            batch(|| {
                a.set(n).unwrap();
                b_cell.set(n * 2).unwrap();
            });
            black_box(sum.get());
        })
    });
}

criterion_group!(benches, signal_write_fanout, derived_chain, batched_writes);
criterion_main!(benches);
