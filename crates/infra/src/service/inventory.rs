//! Staff inventory management on top of the ledger.

use rust_decimal::Decimal;
use tracing::instrument;

use mealflow_auth::Capabilities;
use mealflow_inventory::{
    InventoryItem, InventoryItemId, InventoryMovement, MovementReason, NewInventoryItem,
    StockDeltas,
};

use super::FulfillmentService;
use crate::catalog::MenuCatalog;
use crate::error::FulfillmentError;
use crate::event_store::EventStore;
use crate::ledger::InventoryLedger;

const PERMISSION: &str = "inventory.adjust";

impl<S, L, C> FulfillmentService<S, L, C>
where
    S: EventStore,
    L: InventoryLedger,
    C: MenuCatalog,
{
    pub fn register_inventory_item(
        &self,
        caps: &Capabilities,
        name: &str,
        unit: &str,
        initial_quantity: Decimal,
        min_quantity: Option<Decimal>,
    ) -> Result<InventoryItem, FulfillmentError> {
        let tenant_id = caps.tenant_id();
        caps.require(caps.can_adjust_inventory(tenant_id), PERMISSION)?;
        let item = self.ledger.register_item(
            NewInventoryItem {
                tenant_id,
                item_id: InventoryItemId::generate(),
                name: name.to_string(),
                unit: unit.to_string(),
                initial_quantity,
                min_quantity,
            },
            caps.user_id(),
        )?;
        Ok(item)
    }

    /// Manual restock or write-off. All deltas apply or none do.
    #[instrument(
        skip(self, caps, deltas, reason),
        fields(tenant_id = %caps.tenant_id(), items = deltas.len(), reason = %reason),
        err
    )]
    pub fn adjust_inventory(
        &self,
        caps: &Capabilities,
        deltas: &StockDeltas,
        reason: MovementReason,
    ) -> Result<Vec<InventoryMovement>, FulfillmentError> {
        let tenant_id = caps.tenant_id();
        caps.require(caps.can_adjust_inventory(tenant_id), PERMISSION)?;
        self.retry_busy("adjust_inventory", || {
            Ok(self
                .ledger
                .adjust(tenant_id, deltas, reason.clone(), caps.user_id())?)
        })
    }

    pub fn inventory(&self, caps: &Capabilities) -> Result<Vec<InventoryItem>, FulfillmentError> {
        let tenant_id = caps.tenant_id();
        caps.require(caps.can_adjust_inventory(tenant_id), PERMISSION)?;
        Ok(self.ledger.items(tenant_id)?)
    }

    /// Items at or below their minimum quantity.
    pub fn low_stock(&self, caps: &Capabilities) -> Result<Vec<InventoryItem>, FulfillmentError> {
        let tenant_id = caps.tenant_id();
        caps.require(caps.can_adjust_inventory(tenant_id), PERMISSION)?;
        Ok(self.ledger.low_stock(tenant_id)?)
    }

    pub fn movements(
        &self,
        caps: &Capabilities,
        item_id: Option<InventoryItemId>,
    ) -> Result<Vec<InventoryMovement>, FulfillmentError> {
        let tenant_id = caps.tenant_id();
        caps.require(caps.can_adjust_inventory(tenant_id), PERMISSION)?;
        Ok(self.ledger.movements(tenant_id, item_id)?)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::service::test_support::Shop;

    #[test]
    fn manager_restocks_and_sees_movements() {
        let shop = Shop::new();
        let manager = shop.manager();
        let beans = shop
            .service
            .register_inventory_item(&manager, "Beans", "g", dec!(100), Some(dec!(50)))
            .unwrap();

        let deltas: StockDeltas = [(beans.id_typed(), dec!(250))].into_iter().collect();
        let movements = shop
            .service
            .adjust_inventory(&manager, &deltas, MovementReason::restock())
            .unwrap();

        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].quantity_after, dec!(350));
        assert_eq!(
            shop.service.movements(&manager, Some(beans.id_typed())).unwrap().len(),
            2
        );
    }

    #[test]
    fn write_off_below_zero_changes_nothing() {
        let shop = Shop::new();
        let manager = shop.manager();
        let beans = shop.stock_item("Beans", dec!(100));
        let milk = shop.stock_item("Milk", dec!(100));

        let deltas: StockDeltas = [(beans, dec!(-50)), (milk, dec!(-150))].into_iter().collect();
        let err = shop
            .service
            .adjust_inventory(&manager, &deltas, MovementReason::new("spoilage"))
            .unwrap_err();

        assert_eq!(err, FulfillmentError::InsufficientStock { item: milk.into() });
        assert_eq!(shop.quantity(beans), dec!(100));
        assert_eq!(shop.quantity(milk), dec!(100));
    }

    #[test]
    fn low_stock_lists_items_at_or_below_minimum() {
        let shop = Shop::new();
        let manager = shop.manager();
        shop.service
            .register_inventory_item(&manager, "Beans", "g", dec!(40), Some(dec!(50)))
            .unwrap();
        shop.service
            .register_inventory_item(&manager, "Milk", "ml", dec!(900), Some(dec!(50)))
            .unwrap();

        let low = shop.service.low_stock(&manager).unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].name(), "Beans");
    }

    #[test]
    fn employees_and_clients_cannot_touch_inventory() {
        let shop = Shop::new();
        let deltas: StockDeltas = [(shop.stock_item("Beans", dec!(1)), dec!(5))]
            .into_iter()
            .collect();

        for caps in [shop.employee(), shop.client()] {
            let err = shop
                .service
                .adjust_inventory(&caps, &deltas, MovementReason::restock())
                .unwrap_err();
            assert_eq!(err.code(), "forbidden");
            assert_eq!(shop.service.inventory(&caps).unwrap_err().code(), "forbidden");
        }
    }
}
