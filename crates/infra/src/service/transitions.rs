//! Order status transitions and item edits.
//!
//! Each call reloads the order inside the retry loop, so a retried attempt
//! always decides against the latest stream revision.

use chrono::Utc;
use tracing::instrument;

use mealflow_auth::Capabilities;
use mealflow_core::{Aggregate, DomainError, TenantId, UserId};
use mealflow_inventory::MovementReason;
use mealflow_menu::ProductId;
use mealflow_orders::{
    AddItem, ChangeItemQuantity, ChangeStatus, Order, OrderCommand, OrderEvent, OrderId,
    OrderItem, OrderStatus, RemoveItem,
};

use super::FulfillmentService;
use crate::catalog::MenuCatalog;
use crate::error::FulfillmentError;
use crate::event_store::EventStore;
use crate::ledger::InventoryLedger;

impl<S, L, C> FulfillmentService<S, L, C>
where
    S: EventStore,
    L: InventoryLedger,
    C: MenuCatalog,
{
    /// Move an order to `to`.
    ///
    /// Cancelling is allowed to the order's client and tenant staff; every
    /// other edge is staff only. `NEW → CANCELED` restocks exactly what the
    /// order consumed.
    #[instrument(
        skip(self, caps),
        fields(tenant_id = %caps.tenant_id(), actor = %caps.user_id()),
        err
    )]
    pub fn transition(
        &self,
        caps: &Capabilities,
        order_id: OrderId,
        to: OrderStatus,
    ) -> Result<Order, FulfillmentError> {
        let tenant_id = caps.tenant_id();
        self.retry_busy("transition", || {
            let mut order = self.orders.load(tenant_id, order_id)?;
            let (order_tenant, client) = owner(&order)?;
            if to == OrderStatus::Canceled {
                caps.require(caps.can_cancel_order(order_tenant, client), "orders.cancel")?;
            } else {
                caps.require(caps.can_advance_order(order_tenant), "orders.transition")?;
            }

            let events = order.handle(&OrderCommand::ChangeStatus(ChangeStatus {
                tenant_id,
                order_id,
                to,
                actor: caps.user_id(),
                occurred_at: Utc::now(),
            }))?;
            let reason = (to == OrderStatus::Canceled)
                .then(|| MovementReason::order_canceled(order.number()));
            self.commit(tenant_id, &mut order, events, reason, caps.user_id())?;
            Ok(order)
        })
    }

    pub fn cancel(&self, caps: &Capabilities, order_id: OrderId) -> Result<Order, FulfillmentError> {
        self.transition(caps, order_id, OrderStatus::Canceled)
    }

    /// Add a product line to a `NEW` order, consuming its ingredients.
    #[instrument(
        skip(self, caps),
        fields(tenant_id = %caps.tenant_id(), actor = %caps.user_id()),
        err
    )]
    pub fn add_order_item(
        &self,
        caps: &Capabilities,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u64,
    ) -> Result<Order, FulfillmentError> {
        let tenant_id = caps.tenant_id();
        self.retry_busy("add_order_item", || {
            let mut order = self.editable_order(caps, order_id)?;
            let resolver = self.resolver();
            let (product, _) = resolver.check_line(tenant_id, product_id, quantity)?;
            let consumption = resolver.required_deltas(tenant_id, &[(product_id, quantity)])?;

            let events = order.handle(&OrderCommand::AddItem(AddItem {
                tenant_id,
                order_id,
                item: OrderItem::new(product_id, quantity, product.price())
                    .with_consumption(consumption),
                actor: caps.user_id(),
                occurred_at: Utc::now(),
            }))?;
            self.commit_item_change(tenant_id, &mut order, events, caps.user_id())?;
            Ok(order)
        })
    }

    /// Change the quantity of a line on a `NEW` order. Stock moves by the
    /// difference: increasing consumes, decreasing restocks.
    #[instrument(
        skip(self, caps),
        fields(tenant_id = %caps.tenant_id(), actor = %caps.user_id()),
        err
    )]
    pub fn change_order_item_quantity(
        &self,
        caps: &Capabilities,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u64,
    ) -> Result<Order, FulfillmentError> {
        let tenant_id = caps.tenant_id();
        self.retry_busy("change_order_item_quantity", || {
            let mut order = self.editable_order(caps, order_id)?;
            if quantity == 0 {
                return Err(DomainError::validation("quantity must be positive").into());
            }
            let consumption = self
                .resolver()
                .required_deltas(tenant_id, &[(product_id, quantity)])?;

            let events = order.handle(&OrderCommand::ChangeItemQuantity(ChangeItemQuantity {
                tenant_id,
                order_id,
                product_id,
                quantity,
                consumption,
                actor: caps.user_id(),
                occurred_at: Utc::now(),
            }))?;
            self.commit_item_change(tenant_id, &mut order, events, caps.user_id())?;
            Ok(order)
        })
    }

    /// Remove a line from a `NEW` order and restock its consumption. The last
    /// line cannot be removed; cancel the order instead.
    #[instrument(
        skip(self, caps),
        fields(tenant_id = %caps.tenant_id(), actor = %caps.user_id()),
        err
    )]
    pub fn remove_order_item(
        &self,
        caps: &Capabilities,
        order_id: OrderId,
        product_id: ProductId,
    ) -> Result<Order, FulfillmentError> {
        let tenant_id = caps.tenant_id();
        self.retry_busy("remove_order_item", || {
            let mut order = self.editable_order(caps, order_id)?;
            let events = order.handle(&OrderCommand::RemoveItem(RemoveItem {
                tenant_id,
                order_id,
                product_id,
                actor: caps.user_id(),
                occurred_at: Utc::now(),
            }))?;
            self.commit_item_change(tenant_id, &mut order, events, caps.user_id())?;
            Ok(order)
        })
    }

    /// Load an order the caller may edit, rejecting anything past `NEW`
    /// before any recipe or stock work happens.
    fn editable_order(&self, caps: &Capabilities, order_id: OrderId) -> Result<Order, FulfillmentError> {
        let order = self.orders.load(caps.tenant_id(), order_id)?;
        let (order_tenant, client) = owner(&order)?;
        caps.require(
            caps.can_modify_order_items(order_tenant, client),
            "orders.modify_items",
        )?;
        if !order.status().allows_item_changes() {
            return Err(DomainError::validation(format!(
                "order items can only change while NEW (status: {})",
                order.status()
            ))
            .into());
        }
        Ok(order)
    }

    fn commit_item_change(
        &self,
        tenant_id: TenantId,
        order: &mut Order,
        events: Vec<OrderEvent>,
        actor: UserId,
    ) -> Result<(), FulfillmentError> {
        let reason = MovementReason::order_items_changed(order.number());
        self.commit(tenant_id, order, events, Some(reason), actor)?;
        Ok(())
    }
}

fn owner(order: &Order) -> Result<(TenantId, UserId), FulfillmentError> {
    order
        .tenant_id()
        .zip(order.client_id())
        .ok_or(FulfillmentError::NotFound)
}
