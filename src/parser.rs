//! Parser module for full-channel feed messages
//!
//! Handles deserialization of level-3 book events and REST snapshots.
//! Prices and sizes arrive as strings and are parsed straight into `Decimal`.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;

use crate::orderbook::{BookEntry, Side};

/// An order was accepted by the matching engine
#[derive(Debug, Clone, Deserialize)]
pub struct Received {
    pub sequence: u64,
    pub product_id: String,
    pub order_id: String,
    pub side: Side,
}

/// An order is now resting on the book
#[derive(Debug, Clone, Deserialize)]
pub struct Open {
    pub sequence: u64,
    pub product_id: String,
    pub order_id: String,
    pub side: Side,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub price: Decimal,
    /// Some feeds send `size` instead
    #[serde(alias = "size", deserialize_with = "deserialize_decimal")]
    pub remaining_size: Decimal,
}

/// An order is no longer on the book
#[derive(Debug, Clone, Deserialize)]
pub struct Done {
    pub sequence: u64,
    pub product_id: String,
    pub order_id: String,
    pub side: Side,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub price: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub remaining_size: Option<Decimal>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A trade between a resting maker and an incoming taker
#[derive(Debug, Clone, Deserialize)]
pub struct Match {
    pub sequence: u64,
    pub product_id: String,
    #[serde(default)]
    pub trade_id: Option<u64>,
    pub maker_order_id: String,
    #[serde(default)]
    pub taker_order_id: Option<String>,
    /// Side of the maker order
    pub side: Side,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub price: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub size: Decimal,
}

/// An order's size was modified in place
#[derive(Debug, Clone, Deserialize)]
pub struct Change {
    pub sequence: u64,
    pub product_id: String,
    pub order_id: String,
    pub side: Side,
    /// Absent for market orders, which never rest on the book
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub price: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub new_size: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub old_size: Option<Decimal>,
}

/// A stop order was triggered
#[derive(Debug, Clone, Deserialize)]
pub struct Activate {
    #[serde(default)]
    pub sequence: Option<u64>,
    pub product_id: String,
    pub order_id: String,
}

/// Periodic liveness message
#[derive(Debug, Clone, Deserialize)]
pub struct Heartbeat {
    pub sequence: u64,
    pub product_id: String,
    #[serde(default)]
    pub last_trade_id: Option<u64>,
}

/// A message received on the full channel
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    Received(Received),
    Open(Open),
    Done(Done),
    Match(Match),
    Change(Change),
    Activate(Activate),
    Heartbeat(Heartbeat),
    Subscriptions {
        #[serde(default)]
        channels: serde_json::Value,
    },
    Error {
        message: String,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// The book-relevant content of a sequenced event
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Open {
        order_id: String,
        side: Side,
        price: Decimal,
        size: Decimal,
    },
    Done {
        order_id: String,
    },
    Match {
        maker_order_id: String,
        side: Side,
        price: Decimal,
        size: Decimal,
    },
    Change {
        order_id: String,
        side: Side,
        price: Option<Decimal>,
        new_size: Option<Decimal>,
        old_size: Option<Decimal>,
    },
    /// Consumes a sequence number without touching the book
    Sequenced,
}

/// A sequenced event ready for the synchronizer
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEvent {
    pub product_id: String,
    pub sequence: u64,
    pub kind: EventKind,
}

impl FeedEvent {
    pub fn new(product_id: impl Into<String>, sequence: u64, kind: EventKind) -> Self {
        Self {
            product_id: product_id.into(),
            sequence,
            kind,
        }
    }

    /// Event type as it appears on the wire
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            EventKind::Open { .. } => "open",
            EventKind::Done { .. } => "done",
            EventKind::Match { .. } => "match",
            EventKind::Change { .. } => "change",
            EventKind::Sequenced => "sequenced",
        }
    }
}

impl FeedMessage {
    /// Parse a raw WebSocket message
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Product the message belongs to, if any
    pub fn product_id(&self) -> Option<&str> {
        match self {
            FeedMessage::Received(m) => Some(&m.product_id),
            FeedMessage::Open(m) => Some(&m.product_id),
            FeedMessage::Done(m) => Some(&m.product_id),
            FeedMessage::Match(m) => Some(&m.product_id),
            FeedMessage::Change(m) => Some(&m.product_id),
            FeedMessage::Activate(m) => Some(&m.product_id),
            FeedMessage::Heartbeat(m) => Some(&m.product_id),
            FeedMessage::Subscriptions { .. } | FeedMessage::Error { .. } | FeedMessage::Unknown => {
                None
            }
        }
    }

    /// Convert into a sequenced book event
    ///
    /// Messages that carry no sequence number of the product's book stream
    /// (subscriptions, heartbeats, errors) yield `None`.
    pub fn into_event(self) -> Option<FeedEvent> {
        let event = match self {
            FeedMessage::Received(m) => FeedEvent::new(m.product_id, m.sequence, EventKind::Sequenced),
            FeedMessage::Open(m) => FeedEvent::new(
                m.product_id,
                m.sequence,
                EventKind::Open {
                    order_id: m.order_id,
                    side: m.side,
                    price: m.price,
                    size: m.remaining_size,
                },
            ),
            FeedMessage::Done(m) => FeedEvent::new(
                m.product_id,
                m.sequence,
                EventKind::Done {
                    order_id: m.order_id,
                },
            ),
            FeedMessage::Match(m) => FeedEvent::new(
                m.product_id,
                m.sequence,
                EventKind::Match {
                    maker_order_id: m.maker_order_id,
                    side: m.side,
                    price: m.price,
                    size: m.size,
                },
            ),
            FeedMessage::Change(m) => FeedEvent::new(
                m.product_id,
                m.sequence,
                EventKind::Change {
                    order_id: m.order_id,
                    side: m.side,
                    price: m.price,
                    new_size: m.new_size,
                    old_size: m.old_size,
                },
            ),
            FeedMessage::Activate(m) => FeedEvent::new(m.product_id, m.sequence?, EventKind::Sequenced),
            FeedMessage::Heartbeat(_)
            | FeedMessage::Subscriptions { .. }
            | FeedMessage::Error { .. }
            | FeedMessage::Unknown => return None,
        };
        Some(event)
    }
}

/// Level-3 order book snapshot from the REST API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookSnapshot {
    /// Sequence number the snapshot is consistent with
    pub sequence: u64,

    #[serde(deserialize_with = "deserialize_book_entries")]
    pub bids: Vec<BookEntry>,

    #[serde(deserialize_with = "deserialize_book_entries")]
    pub asks: Vec<BookEntry>,
}

/// Custom deserializer for Decimal from string
fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Decimal::from_str(&s).map_err(serde::de::Error::custom)
}

fn deserialize_optional_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(deserializer)?;
    s.map(|s| Decimal::from_str(&s).map_err(serde::de::Error::custom))
        .transpose()
}

/// Custom deserializer for `[price, size, order_id]` triples
fn deserialize_book_entries<'de, D>(deserializer: D) -> Result<Vec<BookEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Vec<String>> = Deserialize::deserialize(deserializer)?;
    raw.into_iter()
        .map(|entry| match <[String; 3]>::try_from(entry) {
            Ok([price, size, order_id]) => Ok(BookEntry {
                price: Decimal::from_str(&price).map_err(serde::de::Error::custom)?,
                size: Decimal::from_str(&size).map_err(serde::de::Error::custom)?,
                order_id,
            }),
            Err(_) => Err(serde::de::Error::custom("Invalid level-3 entry format")),
        })
        .collect()
}
