//! Depth book and chart benchmarks.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use live_update::chart::ChartBook;
use live_update::config::ChartConfig;
use live_update::order_book::DepthBook;
use rust_decimal::Decimal;
use std::hint::black_box;
use types::ids::PairKey;
use types::order::Side;

fn seeded_book() -> (DepthBook, ChartBook) {
    let pair = PairKey::parse("BTC-EUR").unwrap();
    let mut depth = DepthBook::new(pair.clone());
    for i in 1..=500i64 {
        depth.add_depth(Side::BUY, Decimal::new(50_000_00 - i * 50, 2), Decimal::from(i % 7 + 1), false, None);
        depth.add_depth(Side::SELL, Decimal::new(50_010_00 + i * 50, 2), Decimal::from(i % 5 + 1), false, None);
    }
    let mut chart = ChartBook::new(pair, 2, ChartConfig::default());
    chart.rebuild(&depth);
    depth.harvest();
    chart.harvest();
    (depth, chart)
}

fn benchmark_depth_updates(c: &mut Criterion) {
    let mut group = c.benchmark_group("depth");
    group.throughput(Throughput::Elements(1));

    group.bench_function("add_depth_with_chart", |b| {
        b.iter_batched(
            seeded_book,
            |(mut depth, mut chart)| {
                for i in 0..100i64 {
                    let price = Decimal::new(49_990_00 - i * 25, 2);
                    if let Some(change) = depth.add_depth(Side::BUY, price, Decimal::ONE, true, None) {
                        chart
                            .add_depth(&depth, change.side, change.price, change.change)
                            .unwrap();
                    }
                }
                black_box(chart.harvest())
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("quantity_sum", |b| {
        let (depth, _) = seeded_book();
        b.iter(|| {
            black_box(depth.quantity_sum(
                Side::BUY,
                black_box(Decimal::from(50_000)),
                black_box(Decimal::from(49_900)),
            ))
        })
    });

    group.bench_function("estimate_fill", |b| {
        let (depth, _) = seeded_book();
        b.iter(|| black_box(depth.estimate_fill(Side::BUY, black_box(Decimal::from(250)))))
    });

    group.finish();
}

criterion_group!(benches, benchmark_depth_updates);
criterion_main!(benches);
