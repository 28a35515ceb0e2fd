use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use mealflow_core::{DomainError, DomainResult, TenantId};
use mealflow_inventory::InventoryItemId;

use crate::{Product, ProductId};

/// One bill-of-materials row: `quantity_per_unit` of an inventory item per
/// unit of product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeComponent {
    pub product_id: ProductId,
    pub inventory_item_id: InventoryItemId,
    /// Tenant owning the referenced inventory item.
    pub item_tenant_id: TenantId,
    pub quantity_per_unit: Decimal,
}

/// A validated recipe for one product. May be empty, in which case the
/// product cannot be produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    product_id: ProductId,
    tenant_id: TenantId,
    components: Vec<RecipeComponent>,
}

impl Recipe {
    /// Validate catalog rows for `product`.
    ///
    /// Every row must belong to the product, reference an item of the same
    /// tenant, use a positive `quantity_per_unit`, and appear once per item.
    pub fn new(product: &Product, components: Vec<RecipeComponent>) -> DomainResult<Self> {
        let mut seen = BTreeSet::new();
        for c in &components {
            if c.product_id != product.id_typed() {
                return Err(DomainError::validation(format!(
                    "recipe row for product {} attached to {}",
                    c.product_id,
                    product.id_typed()
                )));
            }
            if c.item_tenant_id != product.tenant_id() {
                return Err(DomainError::validation(format!(
                    "inventory item {} belongs to another tenant",
                    c.inventory_item_id
                )));
            }
            if c.quantity_per_unit <= Decimal::ZERO {
                return Err(DomainError::validation(format!(
                    "quantity_per_unit must be positive for item {}",
                    c.inventory_item_id
                )));
            }
            if !seen.insert(c.inventory_item_id) {
                return Err(DomainError::validation(format!(
                    "duplicate recipe row for item {}",
                    c.inventory_item_id
                )));
            }
        }

        Ok(Self {
            product_id: product.id_typed(),
            tenant_id: product.tenant_id(),
            components,
        })
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn components(&self) -> &[RecipeComponent] {
        &self.components
    }

    pub fn is_producible(&self) -> bool {
        !self.components.is_empty()
    }
}
