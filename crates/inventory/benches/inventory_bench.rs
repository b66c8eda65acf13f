use std::sync::Arc;

use chrono::Utc;
use common::{ChannelId, ProductId};
use criterion::{Criterion, criterion_group, criterion_main};
use event_bus::InMemoryEventTransport;
use inventory::{
    AllocationEngine, ChannelLimits, ConflictConfig, ConflictReport, ConflictResolver,
    InMemoryStockLedger, ResolutionStrategy,
};

fn bench_conflict_resolution(c: &mut Criterion) {
    let resolver = ConflictResolver::new(
        ConflictConfig::default()
            .with_rank("shopify", 1)
            .with_rank("amazon", 2)
            .with_rank("ebay", 3),
    );
    let now = Utc::now();
    let report = ConflictReport::new("SKU-BENCH")
        .with_report("shopify", 100, now)
        .with_report("amazon", 95, now)
        .with_report("ebay", 98, now);

    c.bench_function("conflict/detect", |b| {
        b.iter(|| resolver.detect(&report));
    });

    c.bench_function("conflict/resolve_all_strategies", |b| {
        b.iter(|| {
            for strategy in [
                ResolutionStrategy::LastWriteWins,
                ResolutionStrategy::Conservative,
                ResolutionStrategy::SourcePriority,
                ResolutionStrategy::Average,
            ] {
                resolver.resolve(&report, strategy).unwrap();
            }
        });
    });
}

fn bench_allocate_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let ledger = InMemoryStockLedger::new();
    ledger.set_stock("SKU-BENCH", 1_000_000);
    let engine = AllocationEngine::new(
        Arc::new(ledger),
        Arc::new(InMemoryEventTransport::new()),
    );
    let product = ProductId::new("SKU-BENCH");
    let channel = ChannelId::new("shopify");

    c.bench_function("allocation/allocate_release", |b| {
        b.iter(|| {
            rt.block_on(async {
                let result = engine
                    .allocate_inventory(&product, &channel, 1, 1)
                    .await
                    .unwrap();
                engine
                    .release_allocation(result.allocation_id, &channel, &product, 1)
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_rebalance(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let ledger = InMemoryStockLedger::new();
    ledger.set_stock("SKU-BENCH", 10_000);
    let engine = AllocationEngine::new(
        Arc::new(ledger),
        Arc::new(InMemoryEventTransport::new()),
    );
    let product = ProductId::new("SKU-BENCH");
    rt.block_on(async {
        for i in 0..8 {
            engine
                .configure_channel(
                    &product,
                    &ChannelId::new(format!("channel-{i}")),
                    ChannelLimits::with_priority(i).min(10).max(5_000),
                )
                .await
                .unwrap();
        }
    });

    c.bench_function("allocation/rebalance_8_channels", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine.rebalance_allocations(&product).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_conflict_resolution,
    bench_allocate_release,
    bench_rebalance
);
criterion_main!(benches);
