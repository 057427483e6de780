//! Price level with a FIFO order queue
//!
//! A level only holds order ids; the orders themselves live in the book's
//! id index. Orders are appended at the back and consumed from the front.

use rust_decimal::Decimal;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub(crate) struct PriceLevel {
    price: Decimal,
    /// Oldest order first
    queue: VecDeque<String>,
}

impl PriceLevel {
    pub(crate) fn new(price: Decimal) -> Self {
        Self {
            price,
            queue: VecDeque::new(),
        }
    }

    pub(crate) fn price(&self) -> Decimal {
        self.price
    }

    pub(crate) fn push_back(&mut self, order_id: String) {
        self.queue.push_back(order_id);
    }

    /// Remove an order from anywhere in the queue, keeping the order of the rest
    pub(crate) fn remove(&mut self, order_id: &str) -> bool {
        match self.queue.iter().position(|id| id == order_id) {
            Some(index) => self.queue.remove(index).is_some(),
            None => false,
        }
    }

    /// The order with the highest time priority
    pub(crate) fn front(&self) -> Option<&str> {
        self.queue.front().map(String::as_str)
    }

    pub(crate) fn contains(&self, order_id: &str) -> bool {
        self.queue.iter().any(|id| id == order_id)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fifo_order() {
        let mut level = PriceLevel::new(dec!(100));
        level.push_back("a".to_string());
        level.push_back("b".to_string());
        level.push_back("c".to_string());

        assert_eq!(level.front(), Some("a"));
        assert_eq!(level.iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_remove_middle_keeps_order() {
        let mut level = PriceLevel::new(dec!(100));
        level.push_back("a".to_string());
        level.push_back("b".to_string());
        level.push_back("c".to_string());

        assert!(level.remove("b"));
        assert!(!level.remove("b"));
        assert_eq!(level.iter().collect::<Vec<_>>(), vec!["a", "c"]);
        assert_eq!(level.len(), 2);
    }

    #[test]
    fn test_empty_after_removing_all() {
        let mut level = PriceLevel::new(dec!(42.5));
        level.push_back("x".to_string());
        assert!(level.contains("x"));
        level.remove("x");
        assert!(level.is_empty());
        assert_eq!(level.front(), None);
        assert_eq!(level.price(), dec!(42.5));
    }
}
