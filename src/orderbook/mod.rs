//! Order book module
//!
//! Level-3 book: every resting order is tracked individually, grouped into
//! price levels that preserve arrival order.

mod book;
mod level;
mod metrics;

pub use book::{ChangeOutcome, OrderBook};
pub use metrics::OrderBookMetrics;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("buy"),
            Side::Sell => f.write_str("sell"),
        }
    }
}

/// A single resting order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub side: Side,
    pub price: Decimal,
    /// Remaining (unfilled) size
    pub size: Decimal,
}

/// One order as it appears in a snapshot or an exported view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookEntry {
    pub price: Decimal,
    pub size: Decimal,
    pub order_id: String,
}

impl BookEntry {
    pub fn new(price: Decimal, size: Decimal, order_id: impl Into<String>) -> Self {
        Self {
            price,
            size,
            order_id: order_id.into(),
        }
    }
}

/// Full level-3 view, best price first, each level oldest order first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookView {
    pub bids: Vec<BookEntry>,
    pub asks: Vec<BookEntry>,
}

/// A single aggregated level in the order book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub quantity: Decimal,
    pub order_count: usize,
}

/// Aggregated order book state to be published
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookState {
    pub product_id: String,
    /// Milliseconds since the epoch when the state was taken
    pub timestamp: i64,
    pub sequence: u64,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
    pub metrics: OrderBookMetrics,
}
