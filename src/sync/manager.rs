//! Order book manager
//!
//! Manages one replica per subscribed product.

use std::collections::HashMap;
use tokio::sync::broadcast;

use super::{BookChanged, BookSync, EventOutcome, FetchTicket, SnapshotOutcome};
use crate::error::SyncError;
use crate::orderbook::{BookView, Order, OrderBookState};
use crate::parser::{BookSnapshot, FeedEvent};

/// Manages order book replicas for multiple products
#[derive(Debug, Default)]
pub struct OrderBookManager {
    books: HashMap<String, BookSync>,
    max_buffered: Option<usize>,
}

impl OrderBookManager {
    /// Create a new order book manager with an unbounded event buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with a cap on events buffered while a snapshot is pending
    pub fn with_buffer_limit(max_buffered: Option<usize>) -> Self {
        Self {
            books: HashMap::new(),
            max_buffered,
        }
    }

    /// Track a product; its replica stays uninitialized until synced
    pub fn add_product(&mut self, product_id: &str) {
        let max_buffered = self.max_buffered;
        self.books
            .entry(product_id.to_string())
            .or_insert_with(|| BookSync::new(product_id, max_buffered));
    }

    /// Route an event to its product's replica
    ///
    /// Returns `None` for products that are not tracked.
    pub fn handle_event(&mut self, event: FeedEvent) -> Option<Result<EventOutcome, SyncError>> {
        let book = self.books.get_mut(&event.product_id)?;
        Some(book.handle_event(event))
    }

    pub fn complete_snapshot(
        &mut self,
        product_id: &str,
        ticket: FetchTicket,
        snapshot: BookSnapshot,
    ) -> Option<SnapshotOutcome> {
        self.books
            .get_mut(product_id)
            .map(|book| book.complete_snapshot(ticket, snapshot))
    }

    pub fn snapshot_failed(&mut self, product_id: &str, ticket: FetchTicket) -> bool {
        self.books
            .get_mut(product_id)
            .map(|book| book.snapshot_failed(ticket))
            .unwrap_or(false)
    }

    pub fn begin_sync(&mut self, product_id: &str) -> Option<FetchTicket> {
        self.books.get_mut(product_id).map(BookSync::begin_sync)
    }

    pub fn force_resync(&mut self, product_id: &str) -> Option<FetchTicket> {
        self.books.get_mut(product_id).map(BookSync::force_resync)
    }

    /// Restart synchronization of every product, e.g. after a reconnect
    pub fn force_resync_all(&mut self) -> Vec<(String, FetchTicket)> {
        self.books
            .iter_mut()
            .map(|(product_id, book)| (product_id.clone(), book.force_resync()))
            .collect()
    }

    pub fn get(&self, product_id: &str) -> Option<&BookSync> {
        self.books.get(product_id)
    }

    /// Get the aggregated state of a live book
    pub fn get_state(&self, product_id: &str, depth: usize) -> Option<OrderBookState> {
        let book = self.books.get(product_id)?;
        let sequence = book.sequence()?;
        Some(book.book().state(product_id, sequence, depth))
    }

    pub fn current_view(&self, product_id: &str) -> Option<BookView> {
        self.books.get(product_id).map(BookSync::current_view)
    }

    pub fn lookup(&self, product_id: &str, order_id: &str) -> Option<&Order> {
        self.books.get(product_id)?.lookup(order_id)
    }

    pub fn subscribe(&self, product_id: &str) -> Option<broadcast::Receiver<BookChanged>> {
        self.books.get(product_id).map(BookSync::subscribe)
    }

    /// Check if a book is live
    pub fn is_live(&self, product_id: &str) -> bool {
        self.books
            .get(product_id)
            .map(BookSync::is_live)
            .unwrap_or(false)
    }

    /// Get list of products being tracked
    pub fn products(&self) -> Vec<String> {
        self.books.keys().cloned().collect()
    }
}
