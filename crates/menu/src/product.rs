use serde::{Deserialize, Serialize};

use mealflow_core::{DomainError, DomainResult, Entity, TenantId, typed_id};

typed_id!(
    /// Product identifier (tenant-scoped via `tenant_id`).
    ProductId
);

typed_id!(
    /// Menu category identifier.
    CategoryId
);

/// A sellable menu entry, read-only from the fulfillment core's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    tenant_id: TenantId,
    name: String,
    /// Price in smallest currency unit (e.g., cents).
    price: u64,
    is_available: bool,
    category_id: CategoryId,
}

impl Product {
    pub fn new(
        id: ProductId,
        tenant_id: TenantId,
        name: impl Into<String>,
        price: u64,
        category_id: CategoryId,
    ) -> DomainResult<Self> {
        let name = name.into();
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        Ok(Self {
            id,
            tenant_id,
            name: name.to_string(),
            price,
            is_available: true,
            category_id,
        })
    }

    pub fn with_availability(mut self, is_available: bool) -> Self {
        self.is_available = is_available;
        self
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> u64 {
        self.price
    }

    pub fn is_available(&self) -> bool {
        self.is_available
    }

    pub fn category_id(&self) -> CategoryId {
        self.category_id
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_products_are_available() {
        let p = Product::new(
            ProductId::generate(),
            TenantId::new(),
            " Espresso ",
            250,
            CategoryId::generate(),
        )
        .unwrap();
        assert_eq!(p.name(), "Espresso");
        assert!(p.is_available());
        assert!(!p.with_availability(false).is_available());
    }

    #[test]
    fn blank_name_is_rejected() {
        let err = Product::new(
            ProductId::generate(),
            TenantId::new(),
            "  ",
            100,
            CategoryId::generate(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }
}
