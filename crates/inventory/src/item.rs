use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use mealflow_core::{DomainError, DomainResult, Entity, TenantId, typed_id};

typed_id!(
    /// Inventory item identifier (tenant-scoped via `tenant_id`).
    InventoryItemId
);

/// A stock row: how much of one ingredient a tenant has on hand.
///
/// `quantity` only moves through the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    id: InventoryItemId,
    tenant_id: TenantId,
    name: String,
    unit: String,
    quantity: Decimal,
    min_quantity: Option<Decimal>,
}

/// Input for registering a new stock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInventoryItem {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub name: String,
    pub unit: String,
    pub initial_quantity: Decimal,
    pub min_quantity: Option<Decimal>,
}

impl InventoryItem {
    /// Validate and build a stock row.
    pub fn create(input: NewInventoryItem) -> DomainResult<Self> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if input.unit.trim().is_empty() {
            return Err(DomainError::validation("unit cannot be empty"));
        }
        if input.initial_quantity < Decimal::ZERO {
            return Err(DomainError::validation("quantity cannot be negative"));
        }
        if let Some(min) = input.min_quantity {
            if min < Decimal::ZERO {
                return Err(DomainError::validation("min_quantity cannot be negative"));
            }
        }

        Ok(Self {
            id: input.item_id,
            tenant_id: input.tenant_id,
            name: name.to_string(),
            unit: input.unit.trim().to_string(),
            quantity: input.initial_quantity,
            min_quantity: input.min_quantity,
        })
    }

    pub fn id_typed(&self) -> InventoryItemId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn min_quantity(&self) -> Option<Decimal> {
        self.min_quantity
    }

    /// At or below the configured threshold (never true without one).
    pub fn is_low_stock(&self) -> bool {
        self.min_quantity.is_some_and(|min| self.quantity <= min)
    }

    /// Overwrite the quantity with a value already validated by
    /// [`crate::plan_adjustment`]. Only the ledger calls this.
    #[doc(hidden)]
    pub fn set_planned_quantity(&mut self, change: &crate::PlannedChange) {
        debug_assert_eq!(change.item_id, self.id);
        self.quantity = change.after;
    }
}

impl Entity for InventoryItem {
    type Id = InventoryItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
