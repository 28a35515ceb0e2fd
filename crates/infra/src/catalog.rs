//! Read-only menu data: products and their recipe rows.

use mealflow_core::TenantId;
use mealflow_menu::{Product, ProductId, RecipeComponent};

use crate::read_model::{InMemoryTenantStore, TenantStore};

/// Source of products and bill-of-materials rows for a tenant.
pub trait MenuCatalog: Send + Sync {
    fn product(&self, tenant_id: TenantId, product_id: ProductId) -> Option<Product>;

    /// Raw recipe rows, unvalidated. No rows means the product cannot be made.
    fn recipe_components(&self, tenant_id: TenantId, product_id: ProductId) -> Vec<RecipeComponent>;

    fn products(&self, tenant_id: TenantId) -> Vec<Product>;
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryMenuCatalog {
    products: InMemoryTenantStore<ProductId, Product>,
    recipes: InMemoryTenantStore<ProductId, Vec<RecipeComponent>>,
}

impl InMemoryMenuCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_product(&self, product: Product) {
        self.products
            .upsert(product.tenant_id(), product.id_typed(), product);
    }

    /// Replace the recipe rows of a product.
    pub fn set_recipe(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        components: Vec<RecipeComponent>,
    ) {
        self.recipes.upsert(tenant_id, product_id, components);
    }
}

impl MenuCatalog for InMemoryMenuCatalog {
    fn product(&self, tenant_id: TenantId, product_id: ProductId) -> Option<Product> {
        self.products.get(tenant_id, &product_id)
    }

    fn recipe_components(&self, tenant_id: TenantId, product_id: ProductId) -> Vec<RecipeComponent> {
        self.recipes.get(tenant_id, &product_id).unwrap_or_default()
    }

    fn products(&self, tenant_id: TenantId) -> Vec<Product> {
        let mut products = self.products.list(tenant_id);
        products.sort_by_key(Product::id_typed);
        products
    }
}

impl<C> MenuCatalog for std::sync::Arc<C>
where
    C: MenuCatalog + ?Sized,
{
    fn product(&self, tenant_id: TenantId, product_id: ProductId) -> Option<Product> {
        (**self).product(tenant_id, product_id)
    }

    fn recipe_components(&self, tenant_id: TenantId, product_id: ProductId) -> Vec<RecipeComponent> {
        (**self).recipe_components(tenant_id, product_id)
    }

    fn products(&self, tenant_id: TenantId) -> Vec<Product> {
        (**self).products(tenant_id)
    }
}
