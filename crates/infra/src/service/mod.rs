//! Fulfillment services: cart, checkout, order transitions, staff inventory.
//!
//! Every state-changing operation follows one path:
//!
//! ```text
//! load order → authorize → Order::handle → ledger.begin(stock deltas)
//!   → ledger.commit_with(append events, ExpectedVersion::Exact)
//!   → apply events, refresh view (newer versions only) → notify
//! ```
//!
//! Any failure up to and including the ledger commit leaves stock, order
//! and cart untouched. Only `Busy` is retried, `busy_retries` times.

mod checkout;
mod inventory;
mod transitions;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use mealflow_auth::Capabilities;
use mealflow_core::{Aggregate, AggregateRoot, ExpectedVersion, TenantId, UserId};
use mealflow_inventory::{MovementReason, StockDeltas};
use mealflow_menu::ProductId;
use mealflow_orders::{Cart, Order, OrderEvent, OrderId};

use crate::catalog::MenuCatalog;
use crate::config::FulfillmentConfig;
use crate::error::FulfillmentError;
use crate::event_store::{EventStore, StoredEvent};
use crate::ledger::{InventoryLedger, LedgerTransaction};
use crate::notify::{DisabledNotifier, NotificationKind, Notifier, OrderNotification};
use crate::order_store::OrderRepository;
use crate::read_model::{InMemoryTenantStore, OrderView, TenantStore};
use crate::resolver::RecipeResolver;
use crate::sequence::{InMemoryOrderNumbers, OrderNumbers};

pub struct FulfillmentService<S, L, C> {
    orders: OrderRepository<S>,
    ledger: L,
    catalog: C,
    carts: Arc<dyn TenantStore<UserId, Cart>>,
    views: Arc<dyn TenantStore<OrderId, OrderView>>,
    numbers: Arc<dyn OrderNumbers>,
    notifier: Arc<dyn Notifier>,
    config: FulfillmentConfig,
}

impl<S, L, C> FulfillmentService<S, L, C> {
    /// Service with in-memory carts, views and order numbers, and
    /// notifications off until [`with_notifier`](Self::with_notifier).
    pub fn new(store: S, ledger: L, catalog: C, config: FulfillmentConfig) -> Self {
        Self {
            orders: OrderRepository::new(store),
            ledger,
            catalog,
            carts: Arc::new(InMemoryTenantStore::new()),
            views: Arc::new(InMemoryTenantStore::new()),
            numbers: Arc::new(InMemoryOrderNumbers::new()),
            notifier: Arc::new(DisabledNotifier),
            config,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_carts(mut self, carts: Arc<dyn TenantStore<UserId, Cart>>) -> Self {
        self.carts = carts;
        self
    }

    pub fn with_views(mut self, views: Arc<dyn TenantStore<OrderId, OrderView>>) -> Self {
        self.views = views;
        self
    }

    pub fn with_order_numbers(mut self, numbers: Arc<dyn OrderNumbers>) -> Self {
        self.numbers = numbers;
        self
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn config(&self) -> &FulfillmentConfig {
        &self.config
    }
}

impl<S, L, C> FulfillmentService<S, L, C>
where
    S: EventStore,
    L: InventoryLedger,
    C: MenuCatalog,
{
    pub fn resolver(&self) -> RecipeResolver<'_, C, L> {
        RecipeResolver::new(&self.catalog, &self.ledger)
    }

    /// An order visible to the caller: staff of its tenant, or its client.
    pub fn order(&self, caps: &Capabilities, order_id: OrderId) -> Result<Order, FulfillmentError> {
        let order = self.orders.load(caps.tenant_id(), order_id)?;
        ensure_visible(caps, &order)?;
        Ok(order)
    }

    /// Orders of the caller's tenant (staff) or the caller's own orders,
    /// by order number.
    pub fn list_orders(&self, caps: &Capabilities) -> Vec<OrderView> {
        let staff = caps.can_advance_order(caps.tenant_id());
        let mut views: Vec<_> = self
            .views
            .list(caps.tenant_id())
            .into_iter()
            .filter(|v| staff || v.client_id == caps.user_id())
            .collect();
        views.sort_by_key(|v| v.number);
        views
    }

    /// Producible units of every available product on the caller's menu.
    pub fn menu_availability(
        &self,
        caps: &Capabilities,
    ) -> Result<BTreeMap<ProductId, u64>, FulfillmentError> {
        let tenant_id = caps.tenant_id();
        let products: Vec<ProductId> = self
            .catalog
            .products(tenant_id)
            .iter()
            .filter(|p| p.is_available())
            .map(|p| p.id_typed())
            .collect();
        self.resolver().available_quantities(tenant_id, &products)
    }

    /// Run `op`, retrying `Busy` failures with linear backoff.
    fn retry_busy<T>(
        &self,
        operation: &'static str,
        mut op: impl FnMut() -> Result<T, FulfillmentError>,
    ) -> Result<T, FulfillmentError> {
        let mut attempt = 0u32;
        loop {
            match op() {
                Err(err) if err.is_retryable() && attempt < self.config.busy_retries => {
                    attempt += 1;
                    warn!(operation, attempt, error = %err, "inventory busy, retrying");
                    std::thread::sleep(self.config.retry_backoff * attempt);
                }
                result => return result,
            }
        }
    }

    /// Persist decided events together with their stock effect.
    ///
    /// The append runs inside the ledger commit, so a stale version or a
    /// failed ledger write leaves both stock and the order stream as they
    /// were. `reason` labels the movements and is required whenever the
    /// events move stock.
    fn commit(
        &self,
        tenant_id: TenantId,
        order: &mut Order,
        events: Vec<OrderEvent>,
        reason: Option<MovementReason>,
        actor: UserId,
    ) -> Result<Vec<StoredEvent>, FulfillmentError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let mut stock_change = StockDeltas::new();
        for event in &events {
            stock_change.merge(event.stock_change());
        }

        let order_id = order.id_typed();
        let expected = ExpectedVersion::Exact(order.version());
        let (stored, movements) = if stock_change.is_empty() {
            (self.orders.append(tenant_id, order_id, expected, &events)?, vec![])
        } else {
            let reason = reason.ok_or_else(|| {
                FulfillmentError::Store(format!(
                    "order {order_id} moves stock without a movement reason"
                ))
            })?;
            let tx = self.ledger.begin(tenant_id, &stock_change, reason, actor)?;
            tx.commit_with(|scope| {
                self.orders
                    .append_in(scope, tenant_id, order_id, expected, &events)
            })?
        };

        for event in &events {
            order.apply(event);
        }
        self.refresh_view(tenant_id, order);

        info!(
            tenant_id = %tenant_id,
            order_id = %order_id,
            number = order.number(),
            events = stored.len(),
            movements = movements.len(),
            version = order.version(),
            "order committed"
        );

        self.notify(order, &stored, &events);
        Ok(stored)
    }

    /// Store the order's view unless a later revision is already there.
    /// Concurrent commits may finish out of order.
    fn refresh_view(&self, tenant_id: TenantId, order: &Order) -> bool {
        let Some(view) = OrderView::from_order(order) else {
            return false;
        };
        let version = view.version;
        let written = self.views.upsert_if(tenant_id, order.id_typed(), view, &|current| {
            current.is_none_or(|stored| stored.version < version)
        });
        if !written {
            debug!(
                tenant_id = %tenant_id,
                order_id = %order.id_typed(),
                version,
                "newer order view already stored"
            );
        }
        written
    }

    fn notify(&self, order: &Order, stored: &[StoredEvent], events: &[OrderEvent]) {
        for (s, event) in stored.iter().zip(events) {
            let kind = match event {
                OrderEvent::OrderPlaced(e) => NotificationKind::OrderCreated {
                    client_id: e.client_id,
                    total_amount: order.total_amount(),
                },
                OrderEvent::StatusChanged(e) => NotificationKind::OrderStatusChanged {
                    previous: e.previous,
                    new: e.new,
                    actor: e.actor,
                },
                _ => continue,
            };
            let notification = OrderNotification {
                tenant_id: s.tenant_id,
                order_id: order.id_typed(),
                number: order.number(),
                sequence_number: s.sequence_number,
                occurred_at: s.occurred_at,
                kind,
            };
            if let Err(err) = self.notifier.notify(&notification) {
                warn!(
                    tenant_id = %s.tenant_id,
                    order_id = %order.id_typed(),
                    error = %err,
                    "order notification failed"
                );
            }
        }
    }
}

fn ensure_visible(caps: &Capabilities, order: &Order) -> Result<(), FulfillmentError> {
    let own = order.client_id() == Some(caps.user_id());
    let staff = order
        .tenant_id()
        .is_some_and(|tenant| caps.can_advance_order(tenant));
    if own || staff {
        Ok(())
    } else {
        Err(FulfillmentError::Forbidden("orders.view".to_string()))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use rust_decimal::Decimal;

    use mealflow_auth::{Capabilities, Principal, Role};
    use mealflow_core::{TenantId, UserId};
    use mealflow_inventory::{InventoryItemId, NewInventoryItem};
    use mealflow_menu::{CategoryId, Product, ProductId, RecipeComponent};
    use mealflow_observability::LogConfig;

    use super::FulfillmentService;
    use crate::catalog::InMemoryMenuCatalog;
    use crate::config::FulfillmentConfig;
    use crate::event_store::InMemoryEventStore;
    use crate::ledger::{InMemoryInventoryLedger, InventoryLedger};
    use crate::notify::{DisabledNotifier, Notifier};

    pub(crate) type TestService =
        FulfillmentService<InMemoryEventStore, InMemoryInventoryLedger, InMemoryMenuCatalog>;

    pub(crate) struct Shop {
        pub tenant: TenantId,
        pub service: Arc<TestService>,
    }

    impl Shop {
        pub fn new() -> Self {
            Self::with_config(FulfillmentConfig::default().with_retry_backoff(Duration::from_millis(1)))
        }

        pub fn with_config(config: FulfillmentConfig) -> Self {
            Self::build(config, Arc::new(DisabledNotifier))
        }

        pub fn with_notifier(notifier: Arc<dyn Notifier>) -> Self {
            Self::build(
                FulfillmentConfig::default().with_retry_backoff(Duration::from_millis(1)),
                notifier,
            )
        }

        fn build(config: FulfillmentConfig, notifier: Arc<dyn Notifier>) -> Self {
            let _ = mealflow_observability::init_with(&LogConfig {
                filter: "warn".to_string(),
                ..LogConfig::default()
            });
            let ledger = InMemoryInventoryLedger::new(config.lock_timeout);
            let service = FulfillmentService::new(
                InMemoryEventStore::new(),
                ledger,
                InMemoryMenuCatalog::new(),
                config,
            )
            .with_notifier(notifier);
            Self {
                tenant: TenantId::new(),
                service: Arc::new(service),
            }
        }

        /// Another tenant on the same service and backends.
        pub fn neighbour(&self) -> Self {
            Self {
                tenant: TenantId::new(),
                service: Arc::clone(&self.service),
            }
        }

        pub fn client(&self) -> Capabilities {
            Capabilities::resolve(&Principal::client(UserId::new(), self.tenant)).unwrap()
        }

        pub fn employee(&self) -> Capabilities {
            Capabilities::resolve(&Principal::employee(UserId::new(), self.tenant)).unwrap()
        }

        pub fn manager(&self) -> Capabilities {
            Capabilities::resolve(&Principal::with_roles(
                UserId::new(),
                self.tenant,
                vec![Role::COMPANY_ADMIN],
            ))
            .unwrap()
        }

        pub fn stock_item(&self, name: &str, quantity: Decimal) -> InventoryItemId {
            self.service
                .ledger()
                .register_item(
                    NewInventoryItem {
                        tenant_id: self.tenant,
                        item_id: InventoryItemId::generate(),
                        name: name.to_string(),
                        unit: "g".to_string(),
                        initial_quantity: quantity,
                        min_quantity: None,
                    },
                    UserId::new(),
                )
                .unwrap()
                .id_typed()
        }

        pub fn product(&self, name: &str, price: u64, recipe: &[(InventoryItemId, Decimal)]) -> ProductId {
            let product =
                Product::new(ProductId::generate(), self.tenant, name, price, CategoryId::generate())
                    .unwrap();
            let rows = recipe
                .iter()
                .map(|(item, qpu)| RecipeComponent {
                    product_id: product.id_typed(),
                    inventory_item_id: *item,
                    item_tenant_id: self.tenant,
                    quantity_per_unit: *qpu,
                })
                .collect();
            self.service
                .catalog()
                .set_recipe(self.tenant, product.id_typed(), rows);
            let id = product.id_typed();
            self.service.catalog().upsert_product(product);
            id
        }

        pub fn quantity(&self, item: InventoryItemId) -> Decimal {
            self.service
                .ledger()
                .item(self.tenant, item)
                .unwrap()
                .unwrap()
                .quantity()
        }
    }
}
