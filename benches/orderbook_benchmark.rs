//! Benchmarks for order book operations

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use orderbook_sync::orderbook::{BookEntry, OrderBook, Side};
use orderbook_sync::parser::{BookSnapshot, EventKind, FeedEvent};
use orderbook_sync::sync::BookSync;
use rust_decimal::Decimal;
use std::str::FromStr;

/// `levels` price levels per side, `per_level` orders at each
fn create_snapshot(levels: usize, per_level: usize) -> BookSnapshot {
    let size = Decimal::from_str("1.5").unwrap();
    let mut bids = Vec::with_capacity(levels * per_level);
    let mut asks = Vec::with_capacity(levels * per_level);

    for i in 0..levels {
        for j in 0..per_level {
            bids.push(BookEntry::new(Decimal::from(50000 - i as i64), size, format!("b-{}-{}", i, j)));
            asks.push(BookEntry::new(Decimal::from(50001 + i as i64), size, format!("a-{}-{}", i, j)));
        }
    }

    BookSnapshot {
        sequence: 1000,
        bids,
        asks,
    }
}

/// Alternating opens and cancels starting after `sequence`
fn create_events(sequence: u64, count: usize) -> Vec<FeedEvent> {
    (0..count)
        .map(|i| {
            let seq = sequence + 1 + i as u64;
            let order_id = format!("n-{}", i / 2);
            let kind = if i % 2 == 0 {
                EventKind::Open {
                    order_id,
                    side: Side::Buy,
                    price: Decimal::from(49990),
                    size: Decimal::from_str("0.25").unwrap(),
                }
            } else {
                EventKind::Done { order_id }
            };
            FeedEvent::new("BTC-USD".to_string(), seq, kind)
        })
        .collect()
}

fn benchmark_load_snapshot(c: &mut Criterion) {
    let snapshot = create_snapshot(100, 10);

    c.bench_function("load_snapshot_1000_orders_per_side", |b| {
        b.iter(|| {
            let mut book = OrderBook::new();
            book.load_snapshot(black_box(&snapshot.bids), black_box(&snapshot.asks))
                .unwrap();
        })
    });
}

fn benchmark_order_flow(c: &mut Criterion) {
    let snapshot = create_snapshot(100, 10);
    let mut book = OrderBook::new();
    book.load_snapshot(&snapshot.bids, &snapshot.asks).unwrap();
    let price = Decimal::from(49995);
    let size = Decimal::from_str("0.5").unwrap();

    c.bench_function("add_then_remove_order", |b| {
        b.iter(|| {
            book.add_order(black_box("bench-order"), Side::Buy, price, size)
                .unwrap();
            black_box(book.remove_order("bench-order"));
        })
    });

    c.bench_function("apply_trade_partial", |b| {
        b.iter_batched(
            || {
                let mut book = OrderBook::new();
                book.load_snapshot(&snapshot.bids, &snapshot.asks).unwrap();
                book
            },
            |mut book| {
                black_box(
                    book.apply_trade(Side::Sell, Decimal::from(50001), Decimal::ONE, "a-0-0")
                        .unwrap(),
                );
            },
            BatchSize::LargeInput,
        )
    });
}

fn benchmark_replay(c: &mut Criterion) {
    let snapshot = create_snapshot(100, 10);
    let events = create_events(snapshot.sequence, 1000);

    c.bench_function("replay_1000_buffered_events", |b| {
        b.iter_batched(
            || {
                let mut sync = BookSync::new("BTC-USD", None);
                let ticket = sync.begin_sync();
                for event in events.iter().cloned() {
                    sync.handle_event(event).unwrap();
                }
                (sync, ticket, snapshot.clone())
            },
            |(mut sync, ticket, snapshot)| {
                black_box(sync.complete_snapshot(ticket, snapshot));
            },
            BatchSize::LargeInput,
        )
    });
}

fn benchmark_metrics_calculation(c: &mut Criterion) {
    let snapshot = create_snapshot(100, 10);
    let mut book = OrderBook::new();
    book.load_snapshot(&snapshot.bids, &snapshot.asks).unwrap();

    c.bench_function("calculate_imbalance", |b| {
        b.iter(|| {
            black_box(book.imbalance(10));
        })
    });

    c.bench_function("get_state", |b| {
        b.iter(|| {
            black_box(book.state("BTC-USD", 1000, 20));
        })
    });

    c.bench_function("snapshot_view", |b| {
        b.iter(|| {
            black_box(book.snapshot_view());
        })
    });
}

criterion_group!(
    benches,
    benchmark_load_snapshot,
    benchmark_order_flow,
    benchmark_replay,
    benchmark_metrics_calculation
);
criterion_main!(benches);
