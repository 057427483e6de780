//! Configuration module for the order book synchronizer

use serde::Deserialize;
use std::env;
use std::str::FromStr;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Products to replicate (e.g., ["BTC-USD", "ETH-USD"])
    pub products: Vec<String>,

    /// WebSocket feed endpoint
    pub ws_endpoint: String,

    /// REST API endpoint for snapshots
    pub rest_endpoint: String,

    /// IPC socket path for publishing data
    pub ipc_socket_path: String,

    /// Aggregated depth levels to publish
    pub depth_levels: usize,

    /// Reconnection settings
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,

    /// Delay before retrying a failed snapshot fetch
    pub snapshot_retry_delay_ms: u64,

    /// Events buffered per product while a snapshot is pending; `None` is unbounded
    pub max_buffered_events: Option<usize>,

    /// Consecutive invariant violations tolerated before forcing a resync
    pub max_invariant_violations: u32,

    /// Port for the health and metrics server
    pub health_port: u16,

    /// Health check interval in seconds
    pub health_check_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let products: Vec<String> = env::var("PRODUCTS")
            .unwrap_or_else(|_| defaults.products.join(","))
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        if products.is_empty() {
            anyhow::bail!("PRODUCTS must name at least one product");
        }

        let max_buffered_events = match env_or("MAX_BUFFERED_EVENTS", defaults.max_buffered_events.unwrap_or(0)) {
            0 => None,
            limit => Some(limit),
        };

        Ok(Self {
            products,
            ws_endpoint: env::var("WS_ENDPOINT").unwrap_or(defaults.ws_endpoint),
            rest_endpoint: env::var("REST_ENDPOINT").unwrap_or(defaults.rest_endpoint),
            ipc_socket_path: env::var("IPC_SOCKET_PATH").unwrap_or(defaults.ipc_socket_path),
            depth_levels: env_or("DEPTH_LEVELS", defaults.depth_levels),
            reconnect_delay_ms: env_or("RECONNECT_DELAY_MS", defaults.reconnect_delay_ms),
            max_reconnect_attempts: env_or("MAX_RECONNECT_ATTEMPTS", defaults.max_reconnect_attempts),
            snapshot_retry_delay_ms: env_or("SNAPSHOT_RETRY_DELAY_MS", defaults.snapshot_retry_delay_ms),
            max_buffered_events,
            max_invariant_violations: env_or(
                "MAX_INVARIANT_VIOLATIONS",
                defaults.max_invariant_violations,
            ),
            health_port: env_or("HEALTH_PORT", defaults.health_port),
            health_check_interval_secs: env_or(
                "HEALTH_CHECK_INTERVAL_SECS",
                defaults.health_check_interval_secs,
            ),
        })
    }
}

/// Parse an environment variable, falling back to `default` when unset or invalid
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            products: vec!["BTC-USD".to_string()],
            ws_endpoint: "wss://ws-feed.exchange.coinbase.com".to_string(),
            rest_endpoint: "https://api.exchange.coinbase.com".to_string(),
            ipc_socket_path: "/tmp/orderbook-sync.sock".to_string(),
            depth_levels: 20,
            reconnect_delay_ms: 1000,
            max_reconnect_attempts: 10,
            snapshot_retry_delay_ms: 2000,
            max_buffered_events: Some(100_000),
            max_invariant_violations: 3,
            health_port: 9090,
            health_check_interval_secs: 30,
        }
    }
}
