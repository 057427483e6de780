//! Order Book Sync - Level-3 Replica Library
//!
//! This crate keeps per-order replicas of exchange order books in sync by
//! combining REST snapshots with the sequenced full channel WebSocket feed.

use std::sync::Arc;
use tokio::sync::RwLock;

pub mod config;
pub mod error;
pub mod metrics;
pub mod orderbook;
pub mod parser;
pub mod publisher;
pub mod sync;
pub mod websocket;

pub use config::Config;
pub use error::{BookError, MarketDataError, Result, SyncError};
pub use metrics::FeedMetrics;
pub use orderbook::{BookEntry, BookView, Order, OrderBook, OrderBookMetrics, OrderBookState, Side};
pub use parser::{BookSnapshot, EventKind, FeedEvent, FeedMessage};
pub use publisher::Publisher;
pub use sync::{BookSync, OrderBookManager, RestSnapshotProvider, SnapshotProvider, SyncState};
pub use websocket::WebSocketManager;

/// Application state shared across components
pub struct AppState {
    pub orderbook_manager: Arc<RwLock<OrderBookManager>>,
    pub publisher: Arc<Publisher>,
    pub config: Arc<Config>,
    pub metrics: Arc<FeedMetrics>,
}
