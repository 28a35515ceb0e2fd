//! Pure adjustment planning.
//!
//! Given the locked (current) quantities and a delta set, decide whether the
//! whole set may be applied. Nothing is applied if any single item would go
//! negative.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use mealflow_core::{DomainError, DomainResult};

use crate::{InventoryItemId, StockDeltas};

/// The effect one delta will have on one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChange {
    pub item_id: InventoryItemId,
    pub before: Decimal,
    pub delta: Decimal,
    pub after: Decimal,
}

/// Validate `deltas` against current quantities.
///
/// `current` must return the locked quantity for an item, or `None` when the
/// item does not exist (reported as `NotFound`). Changes come back in
/// ascending item-id order, one per non-zero delta. The first item that would
/// go negative fails the whole plan with `InsufficientStock`.
pub fn plan_adjustment<F>(deltas: &StockDeltas, mut current: F) -> DomainResult<Vec<PlannedChange>>
where
    F: FnMut(&InventoryItemId) -> Option<Decimal>,
{
    let mut changes = Vec::with_capacity(deltas.len());
    for (item_id, delta) in deltas.iter() {
        let before = current(&item_id).ok_or(DomainError::NotFound)?;
        let after = before + delta;
        if after < Decimal::ZERO {
            return Err(DomainError::insufficient_stock(item_id));
        }
        changes.push(PlannedChange {
            item_id,
            before,
            delta,
            after,
        });
    }
    Ok(changes)
}
