#[macro_use]
extern crate criterion;

use std::sync::Arc;

use criterion::Criterion;

use keel_config::{MemoryConfig, ReleaseTier};
use keel_core::diagnostics::PanicHandler;
use keel_core::prelude::*;

fn bench_allocate_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_release");

    for tier in [ReleaseTier::Debug, ReleaseTier::Shipping] {
        let config = MemoryConfig {
            release_tier: tier,
            ..MemoryConfig::default()
        };
        let manager = Arc::new(MemoryManager::with_handler(&config, Arc::new(PanicHandler)));
        let ctx = manager.context();

        for pool in [PoolId::Heap, PoolId::TemporaryStack] {
            group.throughput(criterion::Throughput::Elements(1));
            group.bench_function(format!("{}_{:?}", pool, tier), |b| {
                let _scope = ctx.enter_scope(pool);
                b.iter(|| {
                    let ptr = ctx.allocate(64).unwrap();
                    unsafe { ctx.release(ptr).unwrap() };
                });
            });
        }
    }
    group.finish();
}

fn bench_scope_enter_exit(c: &mut Criterion) {
    let manager = Arc::new(MemoryManager::with_handler(
        &MemoryConfig::default(),
        Arc::new(PanicHandler),
    ));
    let ctx = manager.context();
    c.bench_function("scope_enter_exit", |b| {
        b.iter(|| {
            let scope = ctx.enter_scope(PoolId::TemporaryStack);
            criterion::black_box(scope.scope_allocation_count());
        });
    });
}

criterion_group!(benches, bench_allocate_release, bench_scope_enter_exit);
criterion_main!(benches);
