use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::time::Duration;

use kvmirror_cache::{ExpireConfig, ExpireQueue};

fn bench_set_get_unbounded(c: &mut Criterion) {
    c.bench_function("set_get_unbounded_10k", |b| {
        b.iter(|| {
            let mut q = ExpireQueue::new(Duration::ZERO);
            for i in 0..10_000u32 {
                q.set(i, i);
                black_box(q.get(&i));
            }
        })
    });
}

fn bench_set_at_capacity(c: &mut Criterion) {
    // Acima do limite toda inserção recicla o nó do fundo.
    c.bench_function("set_capacity_1k_of_10k", |b| {
        b.iter(|| {
            let mut q = ExpireQueue::with_config(ExpireConfig {
                ttl: Duration::ZERO,
                max_items: 1_000,
                back_scan: 1,
            });
            for i in 0..10_000u32 {
                q.set(i, i);
            }
            black_box(q.len());
        })
    });
}

fn bench_overwrite_hot_keys(c: &mut Criterion) {
    c.bench_function("overwrite_hot_keys_10k", |b| {
        b.iter(|| {
            let mut q = ExpireQueue::new(Duration::from_secs(60));
            for i in 0..10_000u32 {
                q.set(i % 64, i);
            }
            black_box(q.len());
        })
    });
}

fn bench_string_keys(c: &mut Criterion) {
    let keys: Vec<String> = (0..1_000).map(|i| format!("user:{i}")).collect();

    c.bench_function("string_keys_set_get_1k", |b| {
        b.iter(|| {
            let mut q = ExpireQueue::new(Duration::ZERO);
            for key in &keys {
                q.set(key.clone(), key.len());
            }
            for key in &keys {
                black_box(q.get(key.as_str()));
            }
        })
    });
}

criterion_group!(
    benches,
    bench_set_get_unbounded,
    bench_set_at_capacity,
    bench_overwrite_hot_keys,
    bench_string_keys
);
criterion_main!(benches);
