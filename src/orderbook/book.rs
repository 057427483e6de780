//! Core order book implementation
//!
//! Uses BTreeMap for sorted price level management and a HashMap index for
//! constant time order lookup. Every public mutator updates both in one call.

use chrono::Utc;
use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use super::level::PriceLevel;
use super::{BookEntry, BookView, Level, Order, OrderBookMetrics, OrderBookState, Side};
use crate::error::BookError;

/// Levels used for the published imbalance figure
const IMBALANCE_LEVELS: usize = 5;

/// Result of applying a `change` event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// Recorded size matched `old_size`, new size applied
    Applied,
    /// Recorded size differed from `old_size`; the new size was applied anyway
    SizeMismatch { recorded: Decimal, expected: Decimal },
    /// The order is not resting at that price level
    NotResting,
}

/// Level-3 order book for a single product
#[derive(Debug, Default)]
pub struct OrderBook {
    /// Bids sorted by price descending (highest first)
    bids: BTreeMap<Reverse<Decimal>, PriceLevel>,
    /// Asks sorted by price ascending (lowest first)
    asks: BTreeMap<Decimal, PriceLevel>,
    /// Every resting order on both sides, by id
    orders: HashMap<String, Order>,
    /// Running total of resting bid size
    bid_volume: Decimal,
    /// Running total of resting ask size
    ask_volume: Decimal,
}

impl OrderBook {
    /// Create a new empty order book
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk load a snapshot into an empty book
    pub fn load_snapshot(&mut self, bids: &[BookEntry], asks: &[BookEntry]) -> Result<(), BookError> {
        for entry in bids {
            self.add_order(&entry.order_id, Side::Buy, entry.price, entry.size)?;
        }
        for entry in asks {
            self.add_order(&entry.order_id, Side::Sell, entry.price, entry.size)?;
        }
        Ok(())
    }

    /// Append a new order to the back of its price level
    pub fn add_order(
        &mut self,
        order_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Result<(), BookError> {
        if self.orders.contains_key(order_id) {
            return Err(BookError::DuplicateOrder {
                order_id: order_id.to_string(),
            });
        }

        self.level_or_insert(side, price).push_back(order_id.to_string());
        *self.volume_mut(side) += size;
        self.orders.insert(
            order_id.to_string(),
            Order {
                id: order_id.to_string(),
                side,
                price,
                size,
            },
        );

        Ok(())
    }

    /// Remove an order, dropping its level if it was the last one there
    ///
    /// Unknown ids are ignored and return `None`.
    pub fn remove_order(&mut self, order_id: &str) -> Option<Order> {
        let order = self.orders.remove(order_id)?;
        *self.volume_mut(order.side) -= order.size;

        let emptied = match self.level_mut(order.side, order.price) {
            Some(level) => {
                level.remove(order_id);
                level.is_empty()
            }
            None => false,
        };
        if emptied {
            self.drop_level(order.side, order.price);
        }

        Some(order)
    }

    /// Execute a trade against the oldest order at `price`
    ///
    /// Returns the maker's remaining size; at zero the order has been removed.
    pub fn apply_trade(
        &mut self,
        side: Side,
        price: Decimal,
        traded_size: Decimal,
        maker_order_id: &str,
    ) -> Result<Decimal, BookError> {
        match self.level(side, price) {
            None => return Err(BookError::MissingPriceLevel { side, price }),
            Some(level) if level.front() != Some(maker_order_id) => {
                return Err(BookError::MakerMismatch {
                    price,
                    expected: maker_order_id.to_string(),
                    found: level.front().unwrap_or_default().to_string(),
                });
            }
            Some(_) => {}
        }

        let order = self
            .orders
            .get_mut(maker_order_id)
            .ok_or_else(|| BookError::UnknownOrder {
                order_id: maker_order_id.to_string(),
            })?;
        if traded_size > order.size {
            return Err(BookError::Oversized {
                order_id: maker_order_id.to_string(),
                remaining: order.size,
                traded: traded_size,
            });
        }

        order.size -= traded_size;
        let remaining = order.size;
        *self.volume_mut(side) -= traded_size;
        if remaining.is_zero() {
            self.remove_order(maker_order_id);
        }

        Ok(remaining)
    }

    /// Overwrite the size of an order resting at `price`
    pub fn apply_change(
        &mut self,
        order_id: &str,
        side: Side,
        price: Decimal,
        new_size: Decimal,
        old_size: Decimal,
    ) -> ChangeOutcome {
        let resting = self
            .level(side, price)
            .map_or(false, |level| level.contains(order_id));
        if !resting {
            return ChangeOutcome::NotResting;
        }
        let Some(order) = self.orders.get_mut(order_id) else {
            return ChangeOutcome::NotResting;
        };

        let recorded = order.size;
        order.size = new_size;
        *self.volume_mut(side) += new_size - recorded;

        if recorded == old_size {
            ChangeOutcome::Applied
        } else {
            ChangeOutcome::SizeMismatch {
                recorded,
                expected: old_size,
            }
        }
    }

    /// Every resting order, best price first and oldest first within a level
    pub fn snapshot_view(&self) -> BookView {
        BookView {
            bids: self.entries(Side::Buy),
            asks: self.entries(Side::Sell),
        }
    }

    /// Look up a resting order by id
    pub fn lookup(&self, order_id: &str) -> Option<&Order> {
        self.orders.get(order_id)
    }

    /// Number of resting orders on both sides
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// Number of price levels on one side
    pub fn level_count(&self, side: Side) -> usize {
        match side {
            Side::Buy => self.bids.len(),
            Side::Sell => self.asks.len(),
        }
    }

    /// Total resting size on one side
    pub fn total_size(&self, side: Side) -> Decimal {
        match side {
            Side::Buy => self.bid_volume,
            Side::Sell => self.ask_volume,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Get best bid price
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first_key_value().map(|(Reverse(p), _)| *p)
    }

    /// Get best ask price
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first_key_value().map(|(p, _)| *p)
    }

    /// Get mid price
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::from(2)),
            _ => None,
        }
    }

    /// Get spread in basis points
    pub fn spread_bps(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask(), self.mid_price()) {
            (Some(bid), Some(ask), Some(mid)) if mid > Decimal::ZERO => {
                Some((ask - bid) / mid * Decimal::from(10000))
            }
            _ => None,
        }
    }

    /// Calculate order book imbalance at top N levels
    pub fn imbalance(&self, levels: usize) -> Option<Decimal> {
        let bid_volume: Decimal = self.depth(Side::Buy, levels).iter().map(|l| l.quantity).sum();
        let ask_volume: Decimal = self.depth(Side::Sell, levels).iter().map(|l| l.quantity).sum();

        let total = bid_volume + ask_volume;
        if total > Decimal::ZERO {
            Some((bid_volume - ask_volume) / total)
        } else {
            None
        }
    }

    /// Aggregated top `levels` price levels of one side, best first
    pub fn depth(&self, side: Side, levels: usize) -> Vec<Level> {
        self.levels(side)
            .take(levels)
            .map(|level| Level {
                price: level.price(),
                quantity: self.level_size(level),
                order_count: level.len(),
            })
            .collect()
    }

    /// Get aggregated state for publishing
    pub fn state(&self, product_id: &str, sequence: u64, depth: usize) -> OrderBookState {
        OrderBookState {
            product_id: product_id.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            sequence,
            bids: self.depth(Side::Buy, depth),
            asks: self.depth(Side::Sell, depth),
            metrics: self.calculate_metrics(),
        }
    }

    /// Audit the id index against the price levels
    ///
    /// True when every indexed order sits in exactly one level on its own
    /// side and price, every queued id is indexed, no level is empty, and
    /// the running side totals equal the resting sizes.
    pub fn check_consistency(&self) -> bool {
        let mut queued = 0;
        for side in [Side::Buy, Side::Sell] {
            for level in self.levels(side) {
                if level.is_empty() {
                    return false;
                }
                for order_id in level.iter() {
                    queued += 1;
                    match self.orders.get(order_id) {
                        Some(order) if order.side == side && order.price == level.price() => {}
                        _ => return false,
                    }
                }
            }
        }
        queued == self.orders.len()
            && self.side_size(Side::Buy) == self.bid_volume
            && self.side_size(Side::Sell) == self.ask_volume
    }

    fn calculate_metrics(&self) -> OrderBookMetrics {
        OrderBookMetrics {
            mid_price: self.mid_price(),
            spread_bps: self.spread_bps(),
            imbalance: self.imbalance(IMBALANCE_LEVELS),
            bid_depth: self.bid_volume,
            ask_depth: self.ask_volume,
            bid_levels: self.bids.len(),
            ask_levels: self.asks.len(),
            order_count: self.orders.len(),
        }
    }

    fn entries(&self, side: Side) -> Vec<BookEntry> {
        self.levels(side)
            .flat_map(|level| level.iter())
            .filter_map(|order_id| self.orders.get(order_id))
            .map(|order| BookEntry::new(order.price, order.size, order.id.clone()))
            .collect()
    }

    fn level_size(&self, level: &PriceLevel) -> Decimal {
        level
            .iter()
            .filter_map(|order_id| self.orders.get(order_id))
            .map(|order| order.size)
            .sum()
    }

    fn side_size(&self, side: Side) -> Decimal {
        self.orders
            .values()
            .filter(|order| order.side == side)
            .map(|order| order.size)
            .sum()
    }

    fn volume_mut(&mut self, side: Side) -> &mut Decimal {
        match side {
            Side::Buy => &mut self.bid_volume,
            Side::Sell => &mut self.ask_volume,
        }
    }

    fn levels(&self, side: Side) -> Box<dyn Iterator<Item = &PriceLevel> + '_> {
        match side {
            Side::Buy => Box::new(self.bids.values()),
            Side::Sell => Box::new(self.asks.values()),
        }
    }

    fn level(&self, side: Side, price: Decimal) -> Option<&PriceLevel> {
        match side {
            Side::Buy => self.bids.get(&Reverse(price)),
            Side::Sell => self.asks.get(&price),
        }
    }

    fn level_mut(&mut self, side: Side, price: Decimal) -> Option<&mut PriceLevel> {
        match side {
            Side::Buy => self.bids.get_mut(&Reverse(price)),
            Side::Sell => self.asks.get_mut(&price),
        }
    }

    fn level_or_insert(&mut self, side: Side, price: Decimal) -> &mut PriceLevel {
        match side {
            Side::Buy => self
                .bids
                .entry(Reverse(price))
                .or_insert_with(|| PriceLevel::new(price)),
            Side::Sell => self
                .asks
                .entry(price)
                .or_insert_with(|| PriceLevel::new(price)),
        }
    }

    fn drop_level(&mut self, side: Side, price: Decimal) {
        match side {
            Side::Buy => {
                self.bids.remove(&Reverse(price));
            }
            Side::Sell => {
                self.asks.remove(&price);
            }
        }
    }
}
