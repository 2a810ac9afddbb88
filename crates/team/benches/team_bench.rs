use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use kvmirror_team::{RoundRobin, Selector, Team, TeamConfig, WorkerConfig};

fn bench_round_robin_select(c: &mut Criterion) {
    let rr = RoundRobin::new();
    c.bench_function("round_robin_select", |b| {
        b.iter(|| black_box(rr.select(black_box(8))))
    });
}

fn bench_push_close(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    for backlog_size in [1, 64] {
        c.bench_function(&format!("team_4_lanes_push_10k_backlog_{backlog_size}"), |b| {
            b.iter(|| {
                rt.block_on(async {
                    let team = Team::new(
                        TeamConfig {
                            lanes: 4,
                            worker: WorkerConfig {
                                backlog_size,
                                channel_buffer: 16,
                            },
                        },
                        RoundRobin::new(),
                    );
                    let sum = Arc::new(AtomicU64::new(0));
                    for i in 0..10_000u64 {
                        let sum = sum.clone();
                        team.push(async move {
                            sum.fetch_add(i, Ordering::Relaxed);
                        })
                        .await
                        .unwrap();
                    }
                    team.close().await;
                    black_box(sum.load(Ordering::Relaxed));
                });
            })
        });
    }
}

criterion_group!(benches, bench_round_robin_select, bench_push_close);
criterion_main!(benches);
