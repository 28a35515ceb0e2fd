use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use mealflow_core::{TenantId, UserId, typed_id};

use crate::InventoryItemId;

typed_id!(
    /// Identifier of one ledger line.
    MovementId
);

/// Free-text tag explaining a movement ("order #42 creation").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementReason(String);

impl MovementReason {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    pub fn order_created(number: u64) -> Self {
        Self(format!("order #{number} creation"))
    }

    pub fn order_canceled(number: u64) -> Self {
        Self(format!("order #{number} cancellation"))
    }

    pub fn order_items_changed(number: u64) -> Self {
        Self(format!("order #{number} items changed"))
    }

    pub fn initial_stock() -> Self {
        Self("initial stock".to_string())
    }

    pub fn restock() -> Self {
        Self("manual restock".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for MovementReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One immutable ledger line. Exactly one exists per non-zero change of an
/// item's quantity; lines are never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryMovement {
    pub id: MovementId,
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub quantity_change: Decimal,
    /// Quantity of the item right after this movement was applied.
    pub quantity_after: Decimal,
    pub reason: MovementReason,
    pub actor: UserId,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_reasons_carry_the_order_number() {
        assert_eq!(MovementReason::order_created(42).as_str(), "order #42 creation");
        assert_eq!(
            MovementReason::order_canceled(7).to_string(),
            "order #7 cancellation"
        );
    }
}
