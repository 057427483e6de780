//! WebSocket module for the full channel feed

mod client;
mod manager;

pub use client::WebSocketClient;
pub use manager::{SnapshotResult, WebSocketManager};
