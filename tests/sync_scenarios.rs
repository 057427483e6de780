//! End-to-end synchronization scenarios driven by raw feed messages

use orderbook_sync::orderbook::{BookEntry, Side};
use orderbook_sync::parser::{BookSnapshot, FeedEvent, FeedMessage};
use orderbook_sync::sync::{ChangeKind, EventOutcome, OrderBookManager, ResyncReason, SnapshotOutcome};
use orderbook_sync::{BookError, SyncError};
use rust_decimal_macros::dec;

const PRODUCT: &str = "BTC-USD";

fn event(raw: &str) -> FeedEvent {
    FeedMessage::parse(raw)
        .expect("valid feed message")
        .into_event()
        .expect("sequenced message")
}

fn open(sequence: u64, order_id: &str, side: &str, price: &str, size: &str) -> FeedEvent {
    event(&format!(
        r#"{{"type":"open","product_id":"{PRODUCT}","sequence":{sequence},"time":"2024-01-01T00:00:00.000000Z","order_id":"{order_id}","price":"{price}","remaining_size":"{size}","side":"{side}"}}"#
    ))
}

fn done(sequence: u64, order_id: &str, side: &str) -> FeedEvent {
    event(&format!(
        r#"{{"type":"done","product_id":"{PRODUCT}","sequence":{sequence},"order_id":"{order_id}","reason":"canceled","side":"{side}","remaining_size":"0"}}"#
    ))
}

fn trade(sequence: u64, maker: &str, side: &str, price: &str, size: &str) -> FeedEvent {
    event(&format!(
        r#"{{"type":"match","product_id":"{PRODUCT}","sequence":{sequence},"trade_id":{sequence},"maker_order_id":"{maker}","taker_order_id":"taker-{sequence}","side":"{side}","price":"{price}","size":"{size}"}}"#
    ))
}

fn change(sequence: u64, order_id: &str, side: &str, price: &str, new_size: &str, old_size: &str) -> FeedEvent {
    event(&format!(
        r#"{{"type":"change","product_id":"{PRODUCT}","sequence":{sequence},"order_id":"{order_id}","side":"{side}","price":"{price}","new_size":"{new_size}","old_size":"{old_size}"}}"#
    ))
}

fn snapshot(raw: &str) -> BookSnapshot {
    serde_json::from_str(raw).expect("valid snapshot")
}

fn empty_snapshot(sequence: u64) -> BookSnapshot {
    BookSnapshot {
        sequence,
        ..Default::default()
    }
}

/// A manager with one live product at `sequence` holding `snapshot`'s orders
fn live_manager(book: BookSnapshot) -> OrderBookManager {
    let mut manager = OrderBookManager::new();
    manager.add_product(PRODUCT);
    let ticket = manager.begin_sync(PRODUCT).unwrap();
    match manager.complete_snapshot(PRODUCT, ticket, book) {
        Some(SnapshotOutcome::Loaded(_)) => manager,
        other => panic!("snapshot not loaded: {:?}", other),
    }
}

fn apply(manager: &mut OrderBookManager, event: FeedEvent) -> Result<EventOutcome, SyncError> {
    manager.handle_event(event).expect("tracked product")
}

#[test]
fn test_rest_snapshot_then_buffered_event() {
    let mut manager = OrderBookManager::new();
    manager.add_product(PRODUCT);
    let ticket = manager.begin_sync(PRODUCT).unwrap();

    let outcome = apply(&mut manager, open(5, "late", "sell", "101.00", "1.0")).unwrap();
    assert_eq!(outcome, EventOutcome::Buffered);

    let book = snapshot(
        r#"{"sequence":4,"bids":[["100.00","2.5","bid-1"]],"asks":[["102.00","1.0","ask-1"]]}"#,
    );
    let Some(SnapshotOutcome::Loaded(report)) = manager.complete_snapshot(PRODUCT, ticket, book) else {
        panic!("expected snapshot to load");
    };

    assert_eq!(report.applied, 1);
    let replica = manager.get(PRODUCT).unwrap();
    assert_eq!(replica.sequence(), Some(5));
    assert_eq!(replica.buffered_len(), 0);

    let view = manager.current_view(PRODUCT).unwrap();
    assert_eq!(view.bids, vec![BookEntry::new(dec!(100.00), dec!(2.5), "bid-1")]);
    assert_eq!(view.asks[0].order_id, "late");
    assert_eq!(view.asks[1].order_id, "ask-1");
}

#[test]
fn test_order_count_tracks_opens_minus_dones() {
    let mut manager = live_manager(empty_snapshot(0));

    apply(&mut manager, open(1, "a", "buy", "100", "1")).unwrap();
    apply(&mut manager, open(2, "b", "buy", "100", "1")).unwrap();
    apply(&mut manager, open(3, "c", "sell", "105", "1")).unwrap();
    apply(&mut manager, done(4, "b", "buy")).unwrap();
    // Done for an order that never rested
    apply(&mut manager, done(5, "ghost", "sell")).unwrap();

    let replica = manager.get(PRODUCT).unwrap();
    assert_eq!(replica.book().order_count(), 2);
    assert!(replica.book().check_consistency());
    assert!(manager.lookup(PRODUCT, "b").is_none());
}

#[test]
fn test_match_consumes_oldest_order_first() {
    let mut manager = live_manager(empty_snapshot(10));

    apply(&mut manager, open(11, "A", "buy", "100", "2")).unwrap();
    apply(&mut manager, open(12, "B", "buy", "100", "3")).unwrap();
    apply(&mut manager, trade(13, "A", "buy", "100", "2")).unwrap();

    assert!(manager.lookup(PRODUCT, "A").is_none());
    let b = manager.lookup(PRODUCT, "B").unwrap();
    assert_eq!(b.size, dec!(3));
    assert_eq!(b.side, Side::Buy);
}

#[test]
fn test_match_against_wrong_maker_is_reported() {
    let mut manager = live_manager(empty_snapshot(10));

    apply(&mut manager, open(11, "A", "buy", "100", "2")).unwrap();
    apply(&mut manager, open(12, "B", "buy", "100", "3")).unwrap();

    let err = apply(&mut manager, trade(13, "B", "buy", "100", "1")).unwrap_err();
    assert!(matches!(
        err.book_error(),
        BookError::MakerMismatch { expected, found, .. } if expected == "B" && found == "A"
    ));

    // Sequence advanced, sizes untouched
    assert_eq!(manager.get(PRODUCT).unwrap().sequence(), Some(13));
    assert_eq!(manager.lookup(PRODUCT, "A").unwrap().size, dec!(2));
    assert_eq!(manager.lookup(PRODUCT, "B").unwrap().size, dec!(3));
}

#[test]
fn test_change_with_stale_old_size_still_applies() {
    let mut manager = live_manager(snapshot(
        r#"{"sequence":20,"bids":[],"asks":[["200.0","4.0","x"]]}"#,
    ));

    let outcome = apply(&mut manager, change(21, "x", "sell", "200.0", "1.0", "3.0")).unwrap();
    let EventOutcome::Applied { mismatch: Some(mismatch), .. } = outcome else {
        panic!("expected flagged change, got {:?}", outcome);
    };
    assert_eq!(mismatch.recorded, dec!(4.0));
    assert_eq!(mismatch.expected, dec!(3.0));
    assert_eq!(manager.lookup(PRODUCT, "x").unwrap().size, dec!(1.0));
}

#[test]
fn test_gap_discards_state_and_ignores_old_events() {
    let mut manager = live_manager(empty_snapshot(40));
    apply(&mut manager, open(41, "before-gap", "buy", "99", "1")).unwrap();

    let outcome = apply(&mut manager, open(43, "after-gap", "buy", "98", "1")).unwrap();
    let EventOutcome::Resync { reason, ticket } = outcome else {
        panic!("expected resync, got {:?}", outcome);
    };
    assert_eq!(reason, ResyncReason::Gap { expected: 42, got: 43 });
    assert!(!manager.is_live(PRODUCT));

    apply(&mut manager, open(44, "n-44", "buy", "97", "1")).unwrap();
    apply(&mut manager, open(45, "n-45", "buy", "96", "1")).unwrap();

    let Some(SnapshotOutcome::Loaded(report)) = manager.complete_snapshot(PRODUCT, ticket, empty_snapshot(44)) else {
        panic!("expected snapshot to load");
    };
    assert_eq!(report.discarded, 2);
    assert_eq!(report.applied, 1);

    let replica = manager.get(PRODUCT).unwrap();
    assert_eq!(replica.sequence(), Some(45));
    assert!(replica.lookup("before-gap").is_none());
    assert!(replica.lookup("after-gap").is_none());
    assert!(replica.lookup("n-45").is_some());
}

#[test]
fn test_snapshot_replay_matches_live_application() {
    let base = r#"{"sequence":100,"bids":[["50.0","1.0","s-bid"]],"asks":[["60.0","2.0","s-ask"]]}"#;
    let stream = || {
        vec![
            open(101, "o1", "buy", "49.5", "3.0"),
            open(102, "o2", "sell", "60.0", "1.0"),
            trade(103, "s-ask", "sell", "60.0", "0.5"),
            change(104, "o1", "buy", "49.5", "2.0", "3.0"),
            done(105, "s-bid", "buy"),
        ]
    };

    let mut live = live_manager(snapshot(base));
    for e in stream() {
        apply(&mut live, e).unwrap();
    }

    let mut replayed = OrderBookManager::new();
    replayed.add_product(PRODUCT);
    let ticket = replayed.begin_sync(PRODUCT).unwrap();
    for e in stream() {
        assert_eq!(apply(&mut replayed, e).unwrap(), EventOutcome::Buffered);
    }
    replayed.complete_snapshot(PRODUCT, ticket, snapshot(base));

    assert_eq!(live.current_view(PRODUCT), replayed.current_view(PRODUCT));
    assert_eq!(
        live.get(PRODUCT).unwrap().sequence(),
        replayed.get(PRODUCT).unwrap().sequence()
    );
}

#[test]
fn test_stale_snapshot_after_gap_is_ignored() {
    let mut manager = live_manager(empty_snapshot(1));
    let first = manager.force_resync(PRODUCT).unwrap();
    let second = manager.force_resync(PRODUCT).unwrap();

    assert_eq!(
        manager.complete_snapshot(PRODUCT, first, empty_snapshot(5)),
        Some(SnapshotOutcome::Stale)
    );
    assert!(!manager.is_live(PRODUCT));
    assert!(matches!(
        manager.complete_snapshot(PRODUCT, second, empty_snapshot(6)),
        Some(SnapshotOutcome::Loaded(_))
    ));
}

#[tokio::test]
async fn test_notifications_follow_applied_mutations() {
    let mut manager = OrderBookManager::new();
    manager.add_product(PRODUCT);
    let mut changes = manager.subscribe(PRODUCT).unwrap();

    let ticket = manager.begin_sync(PRODUCT).unwrap();
    manager.complete_snapshot(PRODUCT, ticket, empty_snapshot(7));
    apply(&mut manager, open(8, "a", "buy", "10", "1")).unwrap();
    apply(&mut manager, done(9, "a", "buy")).unwrap();

    let kinds: Vec<(u64, ChangeKind)> = (0..3)
        .map(|_| changes.try_recv().map(|c| (c.sequence, c.kind)).unwrap())
        .collect();
    assert_eq!(
        kinds,
        vec![
            (7, ChangeKind::Snapshot),
            (8, ChangeKind::Open),
            (9, ChangeKind::Done),
        ]
    );
}

#[test]
fn test_untracked_product_is_ignored() {
    let mut manager = OrderBookManager::new();
    manager.add_product(PRODUCT);

    let other = event(
        r#"{"type":"done","product_id":"ETH-USD","sequence":3,"order_id":"e","side":"buy","reason":"filled"}"#,
    );
    assert!(manager.handle_event(other).is_none());
    assert!(manager.get("ETH-USD").is_none());
}
