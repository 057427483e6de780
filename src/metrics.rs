//! Prometheus metrics for feed synchronization

use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::error::{MarketDataError, Result};

const NAMESPACE: &str = "orderbook_sync";

/// Counters describing what happened to feed events, per product
#[derive(Clone)]
pub struct FeedMetrics {
    registry: Registry,
    pub events_applied: IntCounterVec,
    pub events_duplicate: IntCounterVec,
    pub sequence_gaps: IntCounterVec,
    pub resyncs: IntCounterVec,
    pub snapshots_loaded: IntCounterVec,
    pub snapshot_failures: IntCounterVec,
    pub invariant_violations: IntCounterVec,
    pub size_mismatches: IntCounterVec,
    pub buffered_events: IntGaugeVec,
}

impl FeedMetrics {
    /// Create the metrics on a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let events_applied = counter(&registry, "events_applied_total", "Feed events applied to a live book")?;
        let events_duplicate = counter(&registry, "events_duplicate_total", "Feed events dropped as duplicates")?;
        let sequence_gaps = counter(&registry, "sequence_gaps_total", "Sequence gaps detected")?;
        let resyncs = counter(&registry, "resyncs_total", "Snapshot resyncs started")?;
        let snapshots_loaded = counter(&registry, "snapshots_loaded_total", "Snapshots loaded")?;
        let snapshot_failures = counter(&registry, "snapshot_failures_total", "Failed snapshot fetches")?;
        let invariant_violations = counter(
            &registry,
            "invariant_violations_total",
            "Events that contradicted the replicated book",
        )?;
        let size_mismatches = counter(
            &registry,
            "change_size_mismatches_total",
            "Change events whose old size disagreed with the book",
        )?;

        let buffered_events = IntGaugeVec::new(
            Opts::new("buffered_events", "Events buffered while waiting for a snapshot").namespace(NAMESPACE),
            &["product"],
        )?;
        registry.register(Box::new(buffered_events.clone()))?;

        Ok(Self {
            registry,
            events_applied,
            events_duplicate,
            sequence_gaps,
            resyncs,
            snapshots_loaded,
            snapshot_failures,
            invariant_violations,
            size_mismatches,
            buffered_events,
        })
    }

    /// Render all metrics in the text exposition format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| MarketDataError::SerializationError(e.to_string()))
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounterVec> {
    let counter = IntCounterVec::new(Opts::new(name, help).namespace(NAMESPACE), &["product"])?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}
