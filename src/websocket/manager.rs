//! WebSocket connection manager
//!
//! Handles reconnection logic and message dispatch. This loop is the only
//! writer of the order books: feed messages and snapshot results both arrive
//! here and are applied one at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, error, info, trace, warn};

use super::WebSocketClient;
use crate::error::{MarketDataError, Result};
use crate::parser::{BookSnapshot, FeedEvent, FeedMessage};
use crate::sync::{EventOutcome, FetchTicket, ResyncReason, SnapshotOutcome, SnapshotProvider};
use crate::AppState;

/// Maximum backoff delay in milliseconds (60 seconds)
const MAX_BACKOFF_MS: u64 = 60_000;
/// Cooldown period after which reconnect attempts are reset (5 minutes)
const RECONNECT_COOLDOWN_SECS: u64 = 300;
const KEEPALIVE_SECS: u64 = 30;
const RECV_TIMEOUT_SECS: u64 = 45;

/// Outcome of a spawned snapshot fetch
#[derive(Debug)]
pub struct SnapshotResult {
    pub product_id: String,
    pub ticket: FetchTicket,
    pub result: Result<BookSnapshot>,
}

/// Manages the feed connection with automatic reconnection
pub struct WebSocketManager<P: SnapshotProvider> {
    state: Arc<AppState>,
    client: WebSocketClient,
    provider: Arc<P>,
    snapshot_tx: mpsc::UnboundedSender<SnapshotResult>,
    snapshot_rx: mpsc::UnboundedReceiver<SnapshotResult>,
    reconnect_attempts: u32,
    last_successful_connection: Option<Instant>,
    /// Consecutive invariant violations per product
    violation_streaks: HashMap<String, u32>,
}

impl<P: SnapshotProvider> WebSocketManager<P> {
    /// Create a new WebSocket manager
    pub fn new(state: Arc<AppState>, provider: Arc<P>) -> Self {
        let client = WebSocketClient::new(&state.config.ws_endpoint, state.config.products.clone());
        let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();

        Self {
            state,
            client,
            provider,
            snapshot_tx,
            snapshot_rx,
            reconnect_attempts: 0,
            last_successful_connection: None,
            violation_streaks: HashMap::new(),
        }
    }

    /// Run the WebSocket manager with automatic reconnection
    ///
    /// Gives up once `max_reconnect_attempts` consecutive attempts have
    /// failed; zero retries forever.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting WebSocket manager");
        self.spawn_status_logger();

        loop {
            // Reset reconnect attempts if we've been stable for a while
            if let Some(last_success) = self.last_successful_connection {
                if last_success.elapsed() > Duration::from_secs(RECONNECT_COOLDOWN_SECS)
                    && self.reconnect_attempts > 0
                {
                    info!(
                        previous_attempts = self.reconnect_attempts,
                        "Resetting reconnect counter after cooldown period"
                    );
                    self.reconnect_attempts = 0;
                }
            }

            match self.connect_and_process().await {
                Ok(()) => {
                    info!("WebSocket processing completed normally, reconnecting...");
                    sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    error!(error = %e, "WebSocket error");
                    self.client.close().await;
                    self.reconnect_attempts += 1;

                    let max_attempts = self.state.config.max_reconnect_attempts;
                    if max_attempts > 0 && self.reconnect_attempts > max_attempts {
                        return Err(MarketDataError::MaxReconnectAttemptsExceeded);
                    }

                    // Calculate delay with exponential backoff, capped at MAX_BACKOFF_MS
                    let base_delay = self.state.config.reconnect_delay_ms
                        * 2u64.pow(self.reconnect_attempts.min(6));
                    let delay = Duration::from_millis(base_delay.min(MAX_BACKOFF_MS));

                    warn!(
                        attempt = self.reconnect_attempts,
                        delay_secs = delay.as_secs(),
                        "Reconnecting after error..."
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Connect, resync every book and process messages
    async fn connect_and_process(&mut self) -> Result<()> {
        self.client.connect().await?;

        self.last_successful_connection = Some(Instant::now());
        info!("WebSocket connected, resyncing order books");

        // Subscribed before fetching, so the buffer covers the snapshot race
        self.resync_all().await;

        let mut last_message = Instant::now();
        let keepalive_timeout = Duration::from_secs(KEEPALIVE_SECS);
        let recv_timeout = Duration::from_secs(RECV_TIMEOUT_SECS);

        loop {
            tokio::select! {
                received = timeout(recv_timeout, self.client.recv()) => match received {
                    Ok(Ok(Some(text))) => {
                        last_message = Instant::now();
                        if let Err(e) = self.process_message(&text).await {
                            warn!(error = %e, "Failed to process message");
                        }
                    }
                    Ok(Ok(None)) => {
                        // Ping/pong or other non-data message
                        if last_message.elapsed() > keepalive_timeout {
                            if let Err(e) = self.client.ping().await {
                                warn!(error = %e, "Failed to send keepalive ping");
                            }
                        }
                    }
                    Ok(Err(e)) => return Err(e),
                    Err(_) => {
                        warn!(
                            last_message_secs = last_message.elapsed().as_secs(),
                            "No message received within timeout, sending keepalive"
                        );
                        if let Err(e) = self.client.ping().await {
                            warn!(error = %e, "Failed to send keepalive ping, reconnecting");
                            return Err(MarketDataError::ConnectionTimeout);
                        }
                    }
                },
                Some(result) = self.snapshot_rx.recv() => {
                    self.handle_snapshot_result(result).await;
                }
            }
        }
    }

    async fn resync_all(&mut self) {
        let tickets = self.state.orderbook_manager.write().await.force_resync_all();
        for (product_id, ticket) in tickets {
            self.state.metrics.resyncs.with_label_values(&[&product_id]).inc();
            self.request_snapshot(&product_id, ticket, Duration::ZERO);
        }
    }

    /// Spawn a snapshot fetch; its result comes back through the channel
    fn request_snapshot(&self, product_id: &str, ticket: FetchTicket, delay: Duration) {
        let provider = self.provider.clone();
        let tx = self.snapshot_tx.clone();
        let product_id = product_id.to_string();

        tokio::spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            let result = provider.fetch(&product_id).await;
            let _ = tx.send(SnapshotResult {
                product_id,
                ticket,
                result,
            });
        });
    }

    /// Process a single WebSocket message
    pub async fn process_message(&mut self, raw: &str) -> Result<()> {
        let message = FeedMessage::parse(raw)?;

        match message {
            FeedMessage::Error { message, reason } => {
                warn!(message = %message, reason = ?reason, "Feed error message");
            }
            FeedMessage::Subscriptions { channels } => {
                info!(channels = %channels, "Subscription confirmed");
            }
            FeedMessage::Heartbeat(heartbeat) => {
                trace!(product = %heartbeat.product_id, sequence = heartbeat.sequence, "Heartbeat");
            }
            FeedMessage::Unknown => {
                trace!(msg = %raw, "Unknown message type");
            }
            other => {
                if let Some(event) = other.into_event() {
                    self.apply_event(event).await?;
                }
            }
        }

        Ok(())
    }

    async fn apply_event(&mut self, event: FeedEvent) -> Result<()> {
        let product_id = event.product_id.clone();
        let metrics = &self.state.metrics;
        let mut manager = self.state.orderbook_manager.write().await;

        let Some(outcome) = manager.handle_event(event) else {
            trace!(product = %product_id, "Event for untracked product");
            return Ok(());
        };
        if let Some(book) = manager.get(&product_id) {
            metrics
                .buffered_events
                .with_label_values(&[&product_id])
                .set(book.buffered_len() as i64);
        }

        match outcome {
            Ok(EventOutcome::Applied { mismatch, .. }) => {
                metrics.events_applied.with_label_values(&[&product_id]).inc();
                self.violation_streaks.remove(&product_id);
                if mismatch.is_some() {
                    metrics.size_mismatches.with_label_values(&[&product_id]).inc();
                }

                let state = manager.get_state(&product_id, self.state.config.depth_levels);
                drop(manager); // Release lock before publishing
                if let Some(state) = state {
                    self.state.publisher.publish(&state).await?;
                }
            }
            Ok(EventOutcome::Buffered) => {}
            Ok(EventOutcome::Duplicate) => {
                metrics.events_duplicate.with_label_values(&[&product_id]).inc();
            }
            Ok(EventOutcome::Resync { reason, ticket }) => {
                drop(manager);
                self.start_resync(&product_id, reason, ticket);
            }
            Err(err) => {
                metrics.invariant_violations.with_label_values(&[&product_id]).inc();
                let streak = bump_streak(&mut self.violation_streaks, &product_id, 1);
                warn!(product = %product_id, error = %err, streak, "Invariant violation");

                if streak >= self.state.config.max_invariant_violations {
                    self.violation_streaks.remove(&product_id);
                    let ticket = manager.force_resync(&product_id);
                    drop(manager);
                    if let Some(ticket) = ticket {
                        warn!(product = %product_id, "Too many invariant violations, forcing resync");
                        metrics.resyncs.with_label_values(&[&product_id]).inc();
                        self.request_snapshot(&product_id, ticket, Duration::ZERO);
                    }
                }
            }
        }

        Ok(())
    }

    fn start_resync(&self, product_id: &str, reason: ResyncReason, ticket: FetchTicket) {
        if let ResyncReason::Gap { expected, got } = reason {
            debug!(product = %product_id, expected, got, "Resync after gap");
            self.state.metrics.sequence_gaps.with_label_values(&[product_id]).inc();
        }
        self.state.metrics.resyncs.with_label_values(&[product_id]).inc();
        self.request_snapshot(product_id, ticket, Duration::ZERO);
    }

    /// Apply the result of a snapshot fetch
    pub async fn handle_snapshot_result(&mut self, result: SnapshotResult) {
        let SnapshotResult {
            product_id,
            ticket,
            result,
        } = result;
        let metrics = &self.state.metrics;
        let retry_delay = Duration::from_millis(self.state.config.snapshot_retry_delay_ms);
        let mut manager = self.state.orderbook_manager.write().await;

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                if manager.snapshot_failed(&product_id, ticket) {
                    warn!(product = %product_id, error = %e, "Snapshot fetch failed, retrying");
                    metrics.snapshot_failures.with_label_values(&[&product_id]).inc();
                    if let Some(retry) = manager.begin_sync(&product_id) {
                        self.request_snapshot(&product_id, retry, retry_delay);
                    }
                }
                return;
            }
        };

        let outcome = manager.complete_snapshot(&product_id, ticket, snapshot);
        match outcome {
            Some(SnapshotOutcome::Loaded(report)) => {
                metrics.snapshots_loaded.with_label_values(&[&product_id]).inc();
                metrics
                    .events_applied
                    .with_label_values(&[&product_id])
                    .inc_by(report.applied as u64);
                metrics
                    .events_duplicate
                    .with_label_values(&[&product_id])
                    .inc_by(report.discarded as u64);
                metrics
                    .size_mismatches
                    .with_label_values(&[&product_id])
                    .inc_by(report.mismatches.len() as u64);
                for violation in &report.violations {
                    metrics.invariant_violations.with_label_values(&[&product_id]).inc();
                    warn!(product = %product_id, error = %violation, "Invariant violation during replay");
                }
                if let Some(book) = manager.get(&product_id) {
                    metrics
                        .buffered_events
                        .with_label_values(&[&product_id])
                        .set(book.buffered_len() as i64);
                }

                // A new baseline starts a new streak
                self.violation_streaks.remove(&product_id);
                let mut forced = None;
                if !report.violations.is_empty() && report.resync.is_none() {
                    let streak = bump_streak(
                        &mut self.violation_streaks,
                        &product_id,
                        report.violations.len() as u32,
                    );
                    if streak >= self.state.config.max_invariant_violations {
                        self.violation_streaks.remove(&product_id);
                        forced = manager.force_resync(&product_id);
                    }
                }

                let state = manager.get_state(&product_id, self.state.config.depth_levels);
                drop(manager);
                if let Some((reason, retry)) = report.resync {
                    self.start_resync(&product_id, reason, retry);
                } else if let Some(ticket) = forced {
                    warn!(product = %product_id, "Too many invariant violations during replay, forcing resync");
                    metrics.resyncs.with_label_values(&[&product_id]).inc();
                    self.request_snapshot(&product_id, ticket, Duration::ZERO);
                } else if let Some(state) = state {
                    if let Err(e) = self.state.publisher.publish(&state).await {
                        warn!(product = %product_id, error = %e, "Failed to publish snapshot state");
                    }
                }
            }
            Some(SnapshotOutcome::Rejected { error, retry }) => {
                metrics.snapshot_failures.with_label_values(&[&product_id]).inc();
                warn!(product = %product_id, error = %error, "Snapshot rejected, retrying");
                self.request_snapshot(&product_id, retry, retry_delay);
            }
            Some(SnapshotOutcome::Stale) | None => {
                debug!(product = %product_id, generation = ticket.generation, "Dropped stale snapshot");
            }
        }
    }

    /// Periodically log the state of every book
    fn spawn_status_logger(&self) {
        let state = self.state.clone();
        let period = Duration::from_secs(state.config.health_check_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                let manager = state.orderbook_manager.read().await;
                for product_id in manager.products() {
                    let Some(book) = manager.get(&product_id) else {
                        continue;
                    };
                    info!(
                        product = %product_id,
                        state = ?book.state(),
                        orders = book.book().order_count(),
                        buffered = book.buffered_len(),
                        mid_price = ?book.book().mid_price(),
                        spread_bps = ?book.book().spread_bps(),
                        "Order book status"
                    );
                }
            }
        });
    }
}

/// Add `by` violations to a product's streak and return the new length
fn bump_streak(streaks: &mut HashMap<String, u32>, product_id: &str, by: u32) -> u32 {
    let streak = streaks.entry(product_id.to_string()).or_insert(0);
    *streak += by;
    *streak
}
