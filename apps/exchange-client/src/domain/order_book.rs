//! Order Book Snapshot
//!
//! A complete, self-consistent view of one symbol's book. Every snapshot
//! fully replaces the previous one; there is no incremental patching.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One aggregated price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Level price.
    pub price: Decimal,
    /// Total resting quantity at this price.
    pub total_quantity: Decimal,
}

impl PriceLevel {
    /// Create a new price level.
    #[must_use]
    pub const fn new(price: Decimal, total_quantity: Decimal) -> Self {
        Self {
            price,
            total_quantity,
        }
    }
}

/// Book side, used to pick the sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Buy interest, best (highest) price first.
    Bid,
    /// Sell interest, best (lowest) price first.
    Ask,
}

/// Full order book state for one symbol.
///
/// Normalized snapshots keep bids sorted descending and asks ascending by
/// price, with at most one level per price.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    /// Bid levels.
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    /// Ask levels.
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
}

impl OrderBookSnapshot {
    /// Build a normalized snapshot from raw levels.
    #[must_use]
    pub fn from_levels(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> Self {
        Self { bids, asks }.normalized()
    }

    /// Snapshot with no levels on either side.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    /// Sort both sides, merge duplicate prices and drop empty levels.
    #[must_use]
    pub fn normalized(self) -> Self {
        Self {
            bids: normalize_side(self.bids, Side::Bid),
            asks: normalize_side(self.asks, Side::Ask),
        }
    }

    /// Whether both sides are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Highest bid level.
    #[must_use]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Lowest ask level.
    #[must_use]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Best ask minus best bid, when both sides are quoted.
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }
}

fn normalize_side(levels: Vec<PriceLevel>, side: Side) -> Vec<PriceLevel> {
    let mut merged: BTreeMap<Decimal, Decimal> = BTreeMap::new();
    for level in levels {
        if level.total_quantity <= Decimal::ZERO {
            continue;
        }
        *merged.entry(level.price.normalize()).or_default() += level.total_quantity;
    }

    let levels = merged
        .into_iter()
        .map(|(price, total_quantity)| PriceLevel::new(price, total_quantity));

    match side {
        Side::Bid => levels.rev().collect(),
        Side::Ask => levels.collect(),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    use super::*;

    fn level(price: Decimal, qty: Decimal) -> PriceLevel {
        PriceLevel::new(price, qty)
    }

    #[test]
    fn normalizes_sort_order() {
        let snapshot = OrderBookSnapshot::from_levels(
            vec![level(dec!(99), dec!(1)), level(dec!(101), dec!(2))],
            vec![level(dec!(105), dec!(1)), level(dec!(102), dec!(3))],
        );

        assert_eq!(snapshot.best_bid().map(|l| l.price), Some(dec!(101)));
        assert_eq!(snapshot.best_ask().map(|l| l.price), Some(dec!(102)));
        assert_eq!(snapshot.spread(), Some(dec!(1)));
    }

    #[test]
    fn merges_duplicate_prices() {
        let snapshot = OrderBookSnapshot::from_levels(
            vec![level(dec!(100.0), dec!(1)), level(dec!(100.00), dec!(2.5))],
            vec![],
        );

        assert_eq!(snapshot.bids, vec![level(dec!(100), dec!(3.5))]);
    }

    #[test]
    fn drops_non_positive_quantities() {
        let snapshot = OrderBookSnapshot::from_levels(
            vec![level(dec!(100), dec!(0)), level(dec!(99), dec!(-1))],
            vec![level(dec!(101), dec!(4))],
        );

        assert!(snapshot.bids.is_empty());
        assert_eq!(snapshot.asks.len(), 1);
        assert_eq!(snapshot.spread(), None);
    }

    #[test]
    fn deserializes_numbers_and_strings() {
        let snapshot: OrderBookSnapshot = serde_json::from_str(
            r#"{"bids":[{"price":"100.5","total_quantity":2}],"asks":[{"price":101,"total_quantity":"1.25"}]}"#,
        )
        .unwrap();

        assert_eq!(snapshot.bids[0], level(dec!(100.5), dec!(2)));
        assert_eq!(snapshot.asks[0], level(dec!(101), dec!(1.25)));
    }

    #[test]
    fn missing_side_deserializes_empty() {
        let snapshot: OrderBookSnapshot =
            serde_json::from_str(r#"{"bids":[{"price":1,"total_quantity":1}]}"#).unwrap();
        assert!(snapshot.asks.is_empty());
        assert!(!snapshot.is_empty());
    }

    fn arb_level() -> impl Strategy<Value = PriceLevel> {
        (1i64..500, -5i64..50).prop_map(|(price, qty)| {
            PriceLevel::new(Decimal::new(price, 1), Decimal::new(qty, 0))
        })
    }

    proptest! {
        #[test]
        fn normalized_sides_are_strictly_ordered(
            bids in prop::collection::vec(arb_level(), 0..40),
            asks in prop::collection::vec(arb_level(), 0..40),
        ) {
            let snapshot = OrderBookSnapshot::from_levels(bids, asks);

            for pair in snapshot.bids.windows(2) {
                prop_assert!(pair[0].price > pair[1].price);
            }
            for pair in snapshot.asks.windows(2) {
                prop_assert!(pair[0].price < pair[1].price);
            }
            prop_assert!(snapshot
                .bids
                .iter()
                .chain(&snapshot.asks)
                .all(|l| l.total_quantity > Decimal::ZERO));
        }

        #[test]
        fn normalization_preserves_positive_quantity(
            bids in prop::collection::vec(arb_level(), 0..40),
        ) {
            let expected: Decimal = bids
                .iter()
                .filter(|l| l.total_quantity > Decimal::ZERO)
                .map(|l| l.total_quantity)
                .sum();
            let snapshot = OrderBookSnapshot::from_levels(bids, Vec::new());
            let actual: Decimal = snapshot.bids.iter().map(|l| l.total_quantity).sum();
            prop_assert_eq!(expected, actual);
        }

        #[test]
        fn normalization_is_idempotent(
            bids in prop::collection::vec(arb_level(), 0..20),
            asks in prop::collection::vec(arb_level(), 0..20),
        ) {
            let once = OrderBookSnapshot::from_levels(bids, asks);
            let twice = once.clone().normalized();
            prop_assert_eq!(once, twice);
        }
    }
}
