//! Order book metrics calculation

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Computed metrics for an order book
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBookMetrics {
    /// Mid price (average of best bid and ask)
    pub mid_price: Option<Decimal>,

    /// Spread in basis points
    pub spread_bps: Option<Decimal>,

    /// Simple imbalance over the top levels: (bid_vol - ask_vol) / (bid_vol + ask_vol)
    pub imbalance: Option<Decimal>,

    /// Total resting bid size
    pub bid_depth: Decimal,

    /// Total resting ask size
    pub ask_depth: Decimal,

    /// Number of bid levels
    pub bid_levels: usize,

    /// Number of ask levels
    pub ask_levels: usize,

    /// Number of resting orders across both sides
    pub order_count: usize,
}

impl OrderBookMetrics {
    /// Check if the order book is healthy (has valid data)
    pub fn is_healthy(&self) -> bool {
        self.mid_price.is_some()
            && self.spread_bps.is_some()
            && self.bid_levels > 0
            && self.ask_levels > 0
    }

    /// Get volume ratio (bid_depth / ask_depth)
    pub fn volume_ratio(&self) -> Option<Decimal> {
        if self.ask_depth > Decimal::ZERO {
            Some(self.bid_depth / self.ask_depth)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_empty_metrics_are_unhealthy() {
        let metrics = OrderBookMetrics::default();
        assert!(!metrics.is_healthy());
        assert_eq!(metrics.volume_ratio(), None);
    }

    #[test]
    fn test_volume_ratio() {
        let metrics = OrderBookMetrics {
            bid_depth: dec!(3),
            ask_depth: dec!(6),
            ..Default::default()
        };
        assert_eq!(metrics.volume_ratio(), Some(dec!(0.5)));
    }
}
