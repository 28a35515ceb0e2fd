use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use mealflow_core::{DomainError, DomainResult, TenantId, UserId};
use mealflow_menu::ProductId;

/// One staged line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u64,
}

/// Mutable staging area, one per (client, tenant). Not audited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    tenant_id: TenantId,
    client_id: UserId,
    lines: BTreeMap<ProductId, u64>,
}

impl Cart {
    pub fn new(tenant_id: TenantId, client_id: UserId) -> Self {
        Self {
            tenant_id,
            client_id,
            lines: BTreeMap::new(),
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn client_id(&self) -> UserId {
        self.client_id
    }

    /// Set (replace) the quantity of a line.
    pub fn set_quantity(&mut self, product_id: ProductId, quantity: u64) -> DomainResult<()> {
        if quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        self.lines.insert(product_id, quantity);
        Ok(())
    }

    /// Drop a line. Returns whether it was present.
    pub fn remove(&mut self, product_id: ProductId) -> bool {
        self.lines.remove(&product_id).is_some()
    }

    pub fn quantity_of(&self, product_id: ProductId) -> Option<u64> {
        self.lines.get(&product_id).copied()
    }

    pub fn lines(&self) -> Vec<CartLine> {
        self.lines
            .iter()
            .map(|(product_id, quantity)| CartLine {
                product_id: *product_id,
                quantity: *quantity,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Σ current price × quantity. Lines whose price is unknown are skipped.
    pub fn total<F>(&self, mut price_of: F) -> u64
    where
        F: FnMut(ProductId) -> Option<u64>,
    {
        self.lines.iter().fold(0u64, |acc, (product, qty)| {
            let line = price_of(*product).map_or(0, |p| p.saturating_mul(*qty));
            acc.saturating_add(line)
        })
    }
}
