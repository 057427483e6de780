//! Synchronization module
//!
//! Keeps order book replicas consistent with the exchange: snapshots over
//! REST, incremental events over the feed, sequence checks in between.

mod manager;
mod replica;
mod snapshot;

pub use manager::OrderBookManager;
pub use replica::{
    BookSync, EventOutcome, FetchTicket, ReplayReport, ResyncReason, SizeMismatch,
    SnapshotOutcome, SyncState,
};
pub use snapshot::{RestSnapshotProvider, SnapshotProvider};

use serde::{Deserialize, Serialize};

/// What caused a book change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Snapshot,
    Open,
    Done,
    Match,
    Change,
}

/// Sent after every mutation applied to a replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookChanged {
    pub product_id: String,
    pub sequence: u64,
    pub kind: ChangeKind,
}
