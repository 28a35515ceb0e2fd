use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::InventoryItemId;

/// Consolidated signed quantity changes keyed by inventory item.
///
/// Backed by a `BTreeMap` so iteration (and therefore lock acquisition) is in
/// ascending item-id order. Zero entries are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockDeltas(BTreeMap<InventoryItemId, Decimal>);

impl StockDeltas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` to the running change for `item`, summing shared items.
    pub fn add(&mut self, item: InventoryItemId, delta: Decimal) {
        let entry = self.0.entry(item).or_insert(Decimal::ZERO);
        *entry += delta;
        if entry.is_zero() {
            self.0.remove(&item);
        }
    }

    /// Merge another delta set into this one.
    pub fn merge(&mut self, other: &StockDeltas) {
        for (item, delta) in other.iter() {
            self.add(item, delta);
        }
    }

    pub fn get(&self, item: &InventoryItemId) -> Decimal {
        self.0.get(item).copied().unwrap_or(Decimal::ZERO)
    }

    /// Same items, opposite sign. Restocking is the negation of a consumption.
    pub fn negated(&self) -> Self {
        Self(self.0.iter().map(|(k, v)| (*k, -*v)).collect())
    }

    /// `self - other`, e.g. the change needed to move from one consumption to
    /// another.
    pub fn difference(&self, other: &StockDeltas) -> Self {
        let mut out = self.clone();
        out.merge(&other.negated());
        out
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Entries in ascending item-id order.
    pub fn iter(&self) -> impl Iterator<Item = (InventoryItemId, Decimal)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    /// Affected items in ascending id order.
    pub fn item_ids(&self) -> Vec<InventoryItemId> {
        self.0.keys().copied().collect()
    }

    pub fn all_non_positive(&self) -> bool {
        self.0.values().all(|v| *v <= Decimal::ZERO)
    }
}

impl FromIterator<(InventoryItemId, Decimal)> for StockDeltas {
    fn from_iter<T: IntoIterator<Item = (InventoryItemId, Decimal)>>(iter: T) -> Self {
        let mut out = StockDeltas::new();
        for (item, delta) in iter {
            out.add(item, delta);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mealflow_core::AggregateId;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn item(n: u128) -> InventoryItemId {
        InventoryItemId::new(AggregateId::from_uuid(Uuid::from_u128(n)))
    }

    #[test]
    fn shared_items_are_summed() {
        let deltas: StockDeltas = [(item(1), dec!(-10)), (item(2), dec!(-5)), (item(1), dec!(-2.5))]
            .into_iter()
            .collect();
        assert_eq!(deltas.get(&item(1)), dec!(-12.5));
        assert_eq!(deltas.get(&item(2)), dec!(-5));
        assert_eq!(deltas.len(), 2);
    }

    #[test]
    fn zero_entries_are_dropped() {
        let mut deltas = StockDeltas::new();
        deltas.add(item(1), dec!(-3));
        deltas.add(item(1), dec!(3));
        deltas.add(item(2), dec!(0));
        assert!(deltas.is_empty());
    }

    #[test]
    fn item_ids_are_ascending() {
        let deltas: StockDeltas = [(item(9), dec!(1)), (item(3), dec!(1)), (item(5), dec!(1))]
            .into_iter()
            .collect();
        assert_eq!(deltas.item_ids(), vec![item(3), item(5), item(9)]);
    }

    #[test]
    fn difference_gives_the_adjustment_between_two_consumptions() {
        let before: StockDeltas = [(item(1), dec!(-20)), (item(2), dec!(-4))].into_iter().collect();
        let after: StockDeltas = [(item(1), dec!(-30))].into_iter().collect();

        let change = after.difference(&before);
        assert_eq!(change.get(&item(1)), dec!(-10));
        assert_eq!(change.get(&item(2)), dec!(4));
        assert_eq!(before.negated().get(&item(2)), dec!(4));
    }
}
