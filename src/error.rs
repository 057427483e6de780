//! Error types for the order book replica

use rust_decimal::Decimal;
use thiserror::Error;

use crate::orderbook::Side;

/// Invariant violations raised by the order book store
///
/// Each of these means the replica and the exchange book have diverged in a
/// way the feed protocol does not account for. The offending operation leaves
/// the book untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookError {
    #[error("Order {order_id} already exists in the book")]
    DuplicateOrder { order_id: String },

    #[error("No {side} price level at {price}")]
    MissingPriceLevel { side: Side, price: Decimal },

    #[error("Maker order mismatch at {price}: expected {expected}, front of level is {found}")]
    MakerMismatch {
        price: Decimal,
        expected: String,
        found: String,
    },

    #[error("Order {order_id} is queued at a price level but missing from the index")]
    UnknownOrder { order_id: String },

    #[error("Trade of {traded} exceeds remaining size {remaining} of order {order_id}")]
    Oversized {
        order_id: String,
        remaining: Decimal,
        traded: Decimal,
    },
}

/// Errors surfaced by the sequencing layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The event advanced the sequence but could not be applied
    #[error("Invariant violation at sequence {sequence}: {source}")]
    Invariant {
        sequence: u64,
        #[source]
        source: BookError,
    },
}

impl SyncError {
    /// The underlying store error
    pub fn book_error(&self) -> &BookError {
        match self {
            SyncError::Invariant { source, .. } => source,
        }
    }
}

/// Market data handler errors
#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("Order book error: {0}")]
    OrderBook(#[from] BookError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("REST API error: {0}")]
    RestApiError(String),

    #[error("Snapshot request for {product} failed with status {status}")]
    SnapshotStatus { product: String, status: u16 },

    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Max reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

impl From<tokio_tungstenite::tungstenite::Error> for MarketDataError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        MarketDataError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for MarketDataError {
    fn from(err: serde_json::Error) -> Self {
        MarketDataError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for MarketDataError {
    fn from(err: reqwest::Error) -> Self {
        MarketDataError::RestApiError(err.to_string())
    }
}

impl From<std::io::Error> for MarketDataError {
    fn from(err: std::io::Error) -> Self {
        MarketDataError::IpcError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MarketDataError>;
