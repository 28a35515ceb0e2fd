//! Cart staging and checkout.

use chrono::Utc;
use tracing::{info, instrument};

use mealflow_auth::Capabilities;
use mealflow_core::Aggregate;
use mealflow_inventory::MovementReason;
use mealflow_menu::ProductId;
use mealflow_orders::{
    Cart, Order, OrderCommand, OrderId, OrderItem, OrderType, PlaceOrder, truncate_notes,
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
    /// Set the cart quantity of `product_id`, replacing any previous line.
    ///
    /// The product must be on the menu, available, have a recipe, and current
    /// stock must cover `quantity` units on its own.
    pub fn add_to_cart(
        &self,
        caps: &Capabilities,
        product_id: ProductId,
        quantity: u64,
    ) -> Result<Cart, FulfillmentError> {
        caps.require(caps.can_place_orders(), "orders.place")?;
        let tenant_id = caps.tenant_id();
        self.resolver().check_line(tenant_id, product_id, quantity)?;

        let mut cart = self.cart(caps);
        cart.set_quantity(product_id, quantity)?;
        self.carts.upsert(tenant_id, caps.user_id(), cart.clone());
        Ok(cart)
    }

    pub fn remove_from_cart(
        &self,
        caps: &Capabilities,
        product_id: ProductId,
    ) -> Result<Cart, FulfillmentError> {
        caps.require(caps.can_place_orders(), "orders.place")?;
        let mut cart = self.cart(caps);
        if cart.remove(product_id) {
            self.carts
                .upsert(caps.tenant_id(), caps.user_id(), cart.clone());
        }
        Ok(cart)
    }

    /// The caller's cart; an empty one if nothing was staged yet.
    pub fn cart(&self, caps: &Capabilities) -> Cart {
        self.carts
            .get(caps.tenant_id(), &caps.user_id())
            .unwrap_or_else(|| Cart::new(caps.tenant_id(), caps.user_id()))
    }

    /// Cart value at current menu prices. Products gone from the menu count
    /// as zero; checkout snapshots prices again.
    pub fn cart_total(&self, caps: &Capabilities) -> u64 {
        let tenant_id = caps.tenant_id();
        self.cart(caps)
            .total(|product_id| self.catalog.product(tenant_id, product_id).map(|p| p.price()))
    }

    /// Turn the caller's cart into a `NEW` order, consuming its ingredients.
    ///
    /// Prices are snapshotted and every line re-validated. Stock for the whole
    /// cart is checked as one consolidated delta set under the ledger locks.
    /// On any failure the cart, stock and order store are left as they were.
    #[instrument(
        skip(self, caps, notes),
        fields(tenant_id = %caps.tenant_id(), client_id = %caps.user_id()),
        err
    )]
    pub fn checkout(
        &self,
        caps: &Capabilities,
        notes: &str,
        order_type: OrderType,
    ) -> Result<Order, FulfillmentError> {
        caps.require(caps.can_place_orders(), "orders.place")?;
        let tenant_id = caps.tenant_id();
        let client_id = caps.user_id();

        let cart = self
            .carts
            .get(tenant_id, &client_id)
            .filter(|c| !c.is_empty())
            .ok_or(FulfillmentError::EmptyCart)?;
        let number = self.numbers.next(tenant_id)?;
        let notes = truncate_notes(notes, self.config.notes_max_len);

        let order = self.retry_busy("checkout", || {
            let resolver = self.resolver();
            let lines = cart.lines();
            let mut items = Vec::with_capacity(lines.len());
            for line in lines {
                let (product, _) = resolver.check_line(tenant_id, line.product_id, line.quantity)?;
                let consumption =
                    resolver.required_deltas(tenant_id, &[(line.product_id, line.quantity)])?;
                items.push(
                    OrderItem::new(line.product_id, line.quantity, product.price())
                        .with_consumption(consumption),
                );
            }

            let mut order = Order::empty(OrderId::generate());
            let events = order.handle(&OrderCommand::PlaceOrder(PlaceOrder {
                tenant_id,
                order_id: order.id_typed(),
                client_id,
                number,
                order_type,
                notes: notes.clone(),
                items,
                occurred_at: Utc::now(),
            }))?;
            self.commit(
                tenant_id,
                &mut order,
                events,
                Some(MovementReason::order_created(number)),
                client_id,
            )?;
            Ok(order)
        })?;

        self.carts.remove(tenant_id, &client_id);
        info!(
            order_id = %order.id_typed(),
            number,
            total_amount = order.total_amount(),
            "checkout completed"
        );
        Ok(order)
    }
}
