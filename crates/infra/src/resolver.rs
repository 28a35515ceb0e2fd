//! Recipe Resolver bound to a catalog and a ledger.
//!
//! Availability answers here are advisory: they read stock without locks.
//! The authoritative check is the ledger's locked plan at commit time.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use tracing::debug;

use mealflow_core::{DomainError, TenantId};
use mealflow_inventory::{InventoryItem, InventoryItemId, StockDeltas};
use mealflow_menu::{Product, ProductId, Recipe, max_producible, required_deltas, shortfall};

use crate::catalog::MenuCatalog;
use crate::error::FulfillmentError;
use crate::ledger::InventoryLedger;

pub struct RecipeResolver<'a, C: ?Sized, L> {
    catalog: &'a C,
    ledger: &'a L,
}

impl<'a, C, L> RecipeResolver<'a, C, L>
where
    C: MenuCatalog + ?Sized,
    L: InventoryLedger,
{
    pub fn new(catalog: &'a C, ledger: &'a L) -> Self {
        Self { catalog, ledger }
    }

    pub fn product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Product, FulfillmentError> {
        self.catalog
            .product(tenant_id, product_id)
            .ok_or(FulfillmentError::NotFound)
    }

    /// Validated recipe. Rows pointing at another tenant's items or with a
    /// non-positive `quantity_per_unit` fail validation.
    ///
    /// Item ownership is checked against the ledger, not the tenant the
    /// catalog row declares. Items the ledger does not know count as zero
    /// stock.
    pub fn recipe(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Recipe, FulfillmentError> {
        let product = self.product(tenant_id, product_id)?;
        let rows = self.catalog.recipe_components(tenant_id, product_id);
        let recipe = Recipe::new(&product, rows)?;
        for component in recipe.components() {
            let item = component.inventory_item_id;
            match self.ledger.item_owner(item)? {
                Some(owner) if owner != tenant_id => {
                    return Err(DomainError::validation(format!(
                        "recipe for product {product_id} uses inventory item {item} of another tenant"
                    ))
                    .into());
                }
                _ => {}
            }
        }
        Ok(recipe)
    }

    /// Current (unlocked) stock of a tenant.
    fn stock(&self, tenant_id: TenantId) -> Result<HashMap<InventoryItemId, Decimal>, FulfillmentError> {
        Ok(self
            .ledger
            .items(tenant_id)?
            .iter()
            .map(|i: &InventoryItem| (i.id_typed(), i.quantity()))
            .collect())
    }

    /// Whole units producible from current stock; `0` without a recipe.
    pub fn max_producible(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<u64, FulfillmentError> {
        let recipe = self.recipe(tenant_id, product_id)?;
        let stock = self.stock(tenant_id)?;
        Ok(max_producible(&recipe, |id| stock.get(id).copied()))
    }

    /// Consolidated consumption for `lines`; all deltas negative.
    pub fn required_deltas(
        &self,
        tenant_id: TenantId,
        lines: &[(ProductId, u64)],
    ) -> Result<StockDeltas, FulfillmentError> {
        let recipes = lines
            .iter()
            .map(|(product, qty)| Ok((self.recipe(tenant_id, *product)?, *qty)))
            .collect::<Result<Vec<_>, FulfillmentError>>()?;
        Ok(required_deltas(recipes.iter().map(|(r, q)| (r, *q)))?)
    }

    /// Producible units per product, for menu display. Unavailable products
    /// and products without a recipe report `0`.
    pub fn available_quantities(
        &self,
        tenant_id: TenantId,
        products: &[ProductId],
    ) -> Result<BTreeMap<ProductId, u64>, FulfillmentError> {
        let stock = self.stock(tenant_id)?;
        let mut available = BTreeMap::new();
        for product_id in products {
            let product = self.product(tenant_id, *product_id)?;
            let units = if product.is_available() {
                let recipe = self.recipe(tenant_id, *product_id)?;
                max_producible(&recipe, |id| stock.get(id).copied())
            } else {
                0
            };
            available.insert(*product_id, units);
        }
        Ok(available)
    }

    /// Check one requested line against the menu and current stock.
    ///
    /// The product must exist, be available, have a recipe, and current stock
    /// must cover `quantity` units. Returns the product and its recipe.
    pub fn check_line(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        quantity: u64,
    ) -> Result<(Product, Recipe), FulfillmentError> {
        if quantity == 0 {
            return Err(DomainError::validation("quantity must be positive").into());
        }
        let product = self.product(tenant_id, product_id)?;
        if !product.is_available() {
            return Err(DomainError::validation(format!(
                "product {} is not available",
                product.name()
            ))
            .into());
        }
        let recipe = self.recipe(tenant_id, product_id)?;
        if !recipe.is_producible() {
            return Err(DomainError::missing_recipe(product_id).into());
        }

        let stock = self.stock(tenant_id)?;
        let lookup = |id: &InventoryItemId| stock.get(id).copied();
        let producible = max_producible(&recipe, lookup);
        if producible < quantity {
            debug!(
                tenant_id = %tenant_id,
                product_id = %product_id,
                requested = quantity,
                producible,
                "line exceeds producible quantity"
            );
            let item = shortfall(&recipe, quantity, lookup).ok_or(FulfillmentError::MissingRecipe {
                product: product_id.into(),
            })?;
            return Err(DomainError::insufficient_stock(item).into());
        }

        Ok((product, recipe))
    }
}
