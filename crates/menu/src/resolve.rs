//! Recipe math over fixed-point stock quantities.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use mealflow_core::{DomainError, DomainResult};
use mealflow_inventory::{InventoryItemId, StockDeltas};

use crate::Recipe;

/// Whole units of `per_unit` contained in `stock`: the largest `q` with
/// `q × per_unit ≤ stock`.
///
/// `per_unit` must be positive; negative stock yields zero. Saturates at
/// `u64::MAX`.
pub fn floor_units(stock: Decimal, per_unit: Decimal) -> u64 {
    if stock <= Decimal::ZERO || per_unit <= Decimal::ZERO {
        return 0;
    }
    let Some(quotient) = stock.checked_div(per_unit) else {
        return u64::MAX;
    };
    let mut q = quotient.floor();

    // Division rounds at 28 significant digits; nudge back onto the exact floor.
    while q > Decimal::ZERO && q.checked_mul(per_unit).is_none_or(|used| used > stock) {
        q -= Decimal::ONE;
    }
    while (q + Decimal::ONE)
        .checked_mul(per_unit)
        .is_some_and(|used| used <= stock)
    {
        q += Decimal::ONE;
    }

    q.to_u64().unwrap_or(u64::MAX)
}

/// Maximum whole units of the recipe's product that current stock supports.
///
/// The minimum over ingredients of `floor(stock / quantity_per_unit)`. An empty
/// recipe yields `0`. `stock` returns `None` for an item that has no stock row,
/// which counts as nothing on hand.
pub fn max_producible<F>(recipe: &Recipe, mut stock: F) -> u64
where
    F: FnMut(&InventoryItemId) -> Option<Decimal>,
{
    recipe
        .components()
        .iter()
        .map(|c| {
            let on_hand = stock(&c.inventory_item_id).unwrap_or(Decimal::ZERO);
            floor_units(on_hand, c.quantity_per_unit)
        })
        .min()
        .unwrap_or(0)
}

/// First ingredient (in recipe order) that cannot cover `quantity` units, if
/// any. Used to name the item behind a failed availability check.
pub fn shortfall<F>(recipe: &Recipe, quantity: u64, mut stock: F) -> Option<InventoryItemId>
where
    F: FnMut(&InventoryItemId) -> Option<Decimal>,
{
    recipe.components().iter().find_map(|c| {
        let on_hand = stock(&c.inventory_item_id).unwrap_or(Decimal::ZERO);
        (floor_units(on_hand, c.quantity_per_unit) < quantity).then_some(c.inventory_item_id)
    })
}

/// Consolidated ingredient consumption for a set of `(recipe, quantity)`
/// lines. All resulting deltas are negative; ingredients shared between lines
/// are summed.
pub fn required_deltas<'r, I>(lines: I) -> DomainResult<StockDeltas>
where
    I: IntoIterator<Item = (&'r Recipe, u64)>,
{
    let mut deltas = StockDeltas::new();
    for (recipe, quantity) in lines {
        if !recipe.is_producible() {
            return Err(DomainError::missing_recipe(recipe.product_id()));
        }
        if quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        let units = Decimal::from(quantity);
        for c in recipe.components() {
            let needed = c
                .quantity_per_unit
                .checked_mul(units)
                .ok_or_else(|| DomainError::validation("quantity is too large"))?;
            deltas.add(c.inventory_item_id, -needed);
        }
    }
    Ok(deltas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use mealflow_core::TenantId;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    use crate::{CategoryId, Product, ProductId, RecipeComponent};

    fn product(tenant: TenantId, name: &str) -> Product {
        Product::new(ProductId::generate(), tenant, name, 300, CategoryId::generate()).unwrap()
    }

    fn recipe(p: &Product, rows: &[(InventoryItemId, Decimal)]) -> Recipe {
        let components = rows
            .iter()
            .map(|(item, qpu)| RecipeComponent {
                product_id: p.id_typed(),
                inventory_item_id: *item,
                item_tenant_id: p.tenant_id(),
                quantity_per_unit: *qpu,
            })
            .collect();
        Recipe::new(p, components).unwrap()
    }

    #[test]
    fn floor_units_is_exact() {
        assert_eq!(floor_units(dec!(1000), dec!(10)), 100);
        assert_eq!(floor_units(dec!(999.99), dec!(10)), 99);
        assert_eq!(floor_units(dec!(1), dec!(0.3)), 3);
        assert_eq!(floor_units(dec!(0.9), dec!(0.3)), 3);
        assert_eq!(floor_units(dec!(0), dec!(5)), 0);
    }

    #[test]
    fn max_producible_takes_the_scarcest_ingredient() {
        let tenant = TenantId::new();
        let (beans, milk) = (InventoryItemId::generate(), InventoryItemId::generate());
        let latte = product(tenant, "Latte");
        let r = recipe(&latte, &[(beans, dec!(10)), (milk, dec!(200))]);

        let stock: HashMap<_, _> = [(beans, dec!(1000)), (milk, dec!(1000))].into_iter().collect();
        assert_eq!(max_producible(&r, |id| stock.get(id).copied()), 5);
    }

    #[test]
    fn shortfall_names_the_limiting_ingredient() {
        let tenant = TenantId::new();
        let (beans, milk) = (InventoryItemId::generate(), InventoryItemId::generate());
        let latte = product(tenant, "Latte");
        let r = recipe(&latte, &[(beans, dec!(10)), (milk, dec!(200))]);
        let stock: HashMap<_, _> = [(beans, dec!(1000)), (milk, dec!(500))].into_iter().collect();

        assert_eq!(shortfall(&r, 2, |id| stock.get(id).copied()), None);
        assert_eq!(shortfall(&r, 3, |id| stock.get(id).copied()), Some(milk));
    }

    #[test]
    fn no_recipe_means_nothing_producible() {
        let p = product(TenantId::new(), "Air");
        let r = recipe(&p, &[]);
        assert_eq!(max_producible(&r, |_| Some(dec!(1000))), 0);
    }

    #[test]
    fn required_deltas_sums_shared_ingredients() {
        let tenant = TenantId::new();
        let beans = InventoryItemId::generate();
        let milk = InventoryItemId::generate();
        let coffee = product(tenant, "Coffee");
        let latte = product(tenant, "Latte");
        let rc = recipe(&coffee, &[(beans, dec!(10))]);
        let rl = recipe(&latte, &[(beans, dec!(8)), (milk, dec!(150))]);

        let deltas = required_deltas([(&rc, 3), (&rl, 2)]).unwrap();
        assert_eq!(deltas.get(&beans), dec!(-46));
        assert_eq!(deltas.get(&milk), dec!(-300));
        assert!(deltas.all_non_positive());
    }

    #[test]
    fn missing_recipe_is_reported_for_the_product() {
        let p = product(TenantId::new(), "Mystery");
        let r = recipe(&p, &[]);
        let err = required_deltas([(&r, 1)]).unwrap_err();
        assert_eq!(err, DomainError::missing_recipe(p.id_typed()));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn floor_units_is_the_largest_fitting_count(
            stock_milli in 0i64..10_000_000,
            qpu_milli in 1i64..100_000,
        ) {
            let stock = Decimal::new(stock_milli, 3);
            let qpu = Decimal::new(qpu_milli, 3);
            let q = floor_units(stock, qpu);
            let qd = Decimal::from(q);
            prop_assert!(qd * qpu <= stock);
            prop_assert!((qd + Decimal::ONE) * qpu > stock);
        }
    }
}
