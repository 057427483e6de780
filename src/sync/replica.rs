//! Sequence-checked replica of one product's order book
//!
//! `BookSync` owns the book, the pre-snapshot buffer and the sequence
//! counter. It never performs I/O: when it needs a snapshot it hands out a
//! `FetchTicket`, and the caller reports the fetch result back with that
//! ticket. Results carrying an outdated ticket are ignored.

use rust_decimal::Decimal;
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use super::{BookChanged, ChangeKind};
use crate::error::{BookError, SyncError};
use crate::orderbook::{BookView, ChangeOutcome, Order, OrderBook};
use crate::parser::{BookSnapshot, EventKind, FeedEvent};

/// Capacity of the change notification channel
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Synchronization state of a replica
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No baseline and no snapshot fetch outstanding
    Uninitialized,
    /// Waiting for the snapshot fetch identified by `generation`
    Syncing { generation: u64 },
    /// Applying events directly; `sequence` is the last one applied
    Live { sequence: u64 },
}

/// Identifies one snapshot fetch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchTicket {
    pub generation: u64,
}

/// Why a replica restarted synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncReason {
    Gap { expected: u64, got: u64 },
    BufferOverflow { limit: usize },
}

/// A `change` whose `old_size` disagreed with the recorded size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeMismatch {
    pub order_id: String,
    pub recorded: Decimal,
    pub expected: Decimal,
}

/// What happened to a single incoming event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Held until the next snapshot is loaded
    Buffered,
    /// Sequence at or below the current one; dropped
    Duplicate,
    /// Sequence advanced and the event dispatched to the book
    Applied {
        sequence: u64,
        mismatch: Option<SizeMismatch>,
    },
    /// A new snapshot must be fetched for `ticket`
    Resync {
        reason: ResyncReason,
        ticket: FetchTicket,
    },
}

/// Summary of loading a snapshot and replaying the buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Sequence of the snapshot itself
    pub snapshot_sequence: u64,
    pub applied: usize,
    pub discarded: usize,
    pub mismatches: Vec<SizeMismatch>,
    pub violations: Vec<SyncError>,
    /// Set when the replayed buffer itself contained a gap
    pub resync: Option<(ResyncReason, FetchTicket)>,
}

/// Result of handing a snapshot to the replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Loaded(ReplayReport),
    /// The ticket no longer matches the outstanding fetch
    Stale,
    /// The snapshot could not be loaded; a new fetch is needed for `retry`
    Rejected { error: BookError, retry: FetchTicket },
}

/// Order book replica driven by a sequenced event stream
#[derive(Debug)]
pub struct BookSync {
    product_id: String,
    state: SyncState,
    book: OrderBook,
    buffer: VecDeque<FeedEvent>,
    max_buffered: Option<usize>,
    generation: u64,
    changes: broadcast::Sender<BookChanged>,
}

impl BookSync {
    /// Create an uninitialized replica; call `begin_sync` to start it
    pub fn new(product_id: &str, max_buffered: Option<usize>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            product_id: product_id.to_string(),
            state: SyncState::Uninitialized,
            book: OrderBook::new(),
            buffer: VecDeque::new(),
            max_buffered,
            generation: 0,
            changes,
        }
    }

    /// Enter `Syncing` and request a snapshot
    ///
    /// Buffered events are kept. Any earlier outstanding ticket becomes stale.
    pub fn begin_sync(&mut self) -> FetchTicket {
        self.generation += 1;
        self.state = SyncState::Syncing {
            generation: self.generation,
        };
        debug!(product = %self.product_id, generation = self.generation, "Requesting snapshot");
        FetchTicket {
            generation: self.generation,
        }
    }

    /// Drop the buffer and start over from a fresh snapshot
    pub fn force_resync(&mut self) -> FetchTicket {
        self.buffer.clear();
        self.begin_sync()
    }

    /// Feed one event from the stream
    ///
    /// An `Err` means the sequence advanced but the event contradicted the
    /// book; the book is unchanged for that event.
    pub fn handle_event(&mut self, event: FeedEvent) -> Result<EventOutcome, SyncError> {
        match self.state {
            SyncState::Uninitialized | SyncState::Syncing { .. } => Ok(self.buffer_event(event)),
            SyncState::Live { sequence } => self.process_live(sequence, event),
        }
    }

    /// Install a snapshot fetched for `ticket` and replay the buffer
    pub fn complete_snapshot(&mut self, ticket: FetchTicket, snapshot: BookSnapshot) -> SnapshotOutcome {
        if self.state != (SyncState::Syncing { generation: ticket.generation }) {
            debug!(
                product = %self.product_id,
                generation = ticket.generation,
                "Ignoring stale snapshot"
            );
            return SnapshotOutcome::Stale;
        }

        let mut book = OrderBook::new();
        if let Err(error) = book.load_snapshot(&snapshot.bids, &snapshot.asks) {
            warn!(product = %self.product_id, error = %error, "Snapshot rejected");
            let retry = self.begin_sync();
            return SnapshotOutcome::Rejected { error, retry };
        }

        self.book = book;
        self.state = SyncState::Live {
            sequence: snapshot.sequence,
        };
        let _ = self.changes.send(BookChanged {
            product_id: self.product_id.clone(),
            sequence: snapshot.sequence,
            kind: ChangeKind::Snapshot,
        });

        let mut report = ReplayReport {
            snapshot_sequence: snapshot.sequence,
            ..Default::default()
        };
        let buffered = std::mem::take(&mut self.buffer);
        let buffered_len = buffered.len();

        for event in buffered {
            match self.handle_event(event) {
                Ok(EventOutcome::Applied { mismatch, .. }) => {
                    report.applied += 1;
                    report.mismatches.extend(mismatch);
                }
                Ok(EventOutcome::Duplicate) => report.discarded += 1,
                Ok(EventOutcome::Buffered) => {}
                Ok(EventOutcome::Resync { reason, ticket }) => report.resync = Some((reason, ticket)),
                Err(err) => report.violations.push(err),
            }
        }

        info!(
            product = %self.product_id,
            snapshot_sequence = snapshot.sequence,
            orders = self.book.order_count(),
            buffered = buffered_len,
            applied = report.applied,
            discarded = report.discarded,
            "Snapshot loaded"
        );

        SnapshotOutcome::Loaded(report)
    }

    /// Record a failed fetch for `ticket`
    ///
    /// Returns false if the ticket was already stale. On a current ticket the
    /// replica drops back to `Uninitialized`, keeping its buffer.
    pub fn snapshot_failed(&mut self, ticket: FetchTicket) -> bool {
        if self.state != (SyncState::Syncing { generation: ticket.generation }) {
            return false;
        }
        self.state = SyncState::Uninitialized;
        true
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, SyncState::Live { .. })
    }

    /// Last applied sequence, `None` while not live
    pub fn sequence(&self) -> Option<u64> {
        match self.state {
            SyncState::Live { sequence } => Some(sequence),
            _ => None,
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    /// Full level-3 view of the current book
    pub fn current_view(&self) -> BookView {
        self.book.snapshot_view()
    }

    pub fn lookup(&self, order_id: &str) -> Option<&Order> {
        self.book.lookup(order_id)
    }

    /// Receive a notification after every applied book mutation
    pub fn subscribe(&self) -> broadcast::Receiver<BookChanged> {
        self.changes.subscribe()
    }

    fn buffer_event(&mut self, event: FeedEvent) -> EventOutcome {
        if let Some(limit) = self.max_buffered {
            if self.buffer.len() >= limit {
                warn!(product = %self.product_id, limit, "Event buffer full, restarting sync");
                let ticket = self.force_resync();
                self.buffer.push_back(event);
                return EventOutcome::Resync {
                    reason: ResyncReason::BufferOverflow { limit },
                    ticket,
                };
            }
        }

        self.buffer.push_back(event);
        EventOutcome::Buffered
    }

    fn process_live(&mut self, current: u64, event: FeedEvent) -> Result<EventOutcome, SyncError> {
        if event.sequence <= current {
            trace!(
                product = %self.product_id,
                sequence = event.sequence,
                current,
                kind = event.kind_name(),
                "Duplicate event"
            );
            return Ok(EventOutcome::Duplicate);
        }

        let expected = current + 1;
        if event.sequence != expected {
            warn!(
                product = %self.product_id,
                expected,
                got = event.sequence,
                "Sequence gap, resyncing"
            );
            let got = event.sequence;
            let ticket = self.force_resync();
            // Kept in case the next snapshot predates it
            self.buffer.push_back(event);
            return Ok(EventOutcome::Resync {
                reason: ResyncReason::Gap { expected, got },
                ticket,
            });
        }

        let sequence = event.sequence;
        self.state = SyncState::Live { sequence };

        let change_kind = match &event.kind {
            EventKind::Open { .. } => Some(ChangeKind::Open),
            EventKind::Done { .. } => Some(ChangeKind::Done),
            EventKind::Match { .. } => Some(ChangeKind::Match),
            EventKind::Change { .. } => Some(ChangeKind::Change),
            EventKind::Sequenced => None,
        };

        let mismatch = self
            .dispatch(event.kind)
            .map_err(|source| SyncError::Invariant { sequence, source })?;

        if let Some(kind) = change_kind {
            trace!(product = %self.product_id, sequence, kind = ?kind, "Applied event");
            let _ = self.changes.send(BookChanged {
                product_id: self.product_id.clone(),
                sequence,
                kind,
            });
        }

        Ok(EventOutcome::Applied { sequence, mismatch })
    }

    fn dispatch(&mut self, kind: EventKind) -> Result<Option<SizeMismatch>, BookError> {
        match kind {
            EventKind::Open {
                order_id,
                side,
                price,
                size,
            } => self.book.add_order(&order_id, side, price, size)?,
            EventKind::Done { order_id } => {
                self.book.remove_order(&order_id);
            }
            EventKind::Match {
                maker_order_id,
                side,
                price,
                size,
            } => {
                self.book.apply_trade(side, price, size, &maker_order_id)?;
            }
            EventKind::Change {
                order_id,
                side,
                price: Some(price),
                new_size: Some(new_size),
                old_size: Some(old_size),
            } => {
                if let ChangeOutcome::SizeMismatch { recorded, expected } =
                    self.book.apply_change(&order_id, side, price, new_size, old_size)
                {
                    warn!(
                        product = %self.product_id,
                        order_id = %order_id,
                        recorded = %recorded,
                        expected = %expected,
                        "Change old_size disagrees with recorded size"
                    );
                    return Ok(Some(SizeMismatch {
                        order_id,
                        recorded,
                        expected,
                    }));
                }
            }
            // Market orders never rest, so a change without price or sizes has nothing to update
            EventKind::Change { .. } | EventKind::Sequenced => {}
        }
        Ok(None)
    }
}
