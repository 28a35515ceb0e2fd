//! Integration tests for the full fulfillment pipeline.
//!
//! Tests: Cart → Checkout → Ledger → EventStore → OrderView → Notifier
//!
//! Verifies:
//! - Stock never goes negative, even under concurrent checkouts
//! - Rejected calls leave stock, orders and carts untouched
//! - Cancellation restores exactly what was consumed
//! - Tenant isolation is preserved

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use mealflow_auth::{Capabilities, Principal};
    use mealflow_core::{AggregateId, AggregateRoot, ExpectedVersion, TenantId, UserId};
    use mealflow_events::{EventBus, EventEnvelope, InMemoryEventBus};
    use mealflow_inventory::{
        InventoryItem, InventoryItemId, InventoryMovement, MovementReason, NewInventoryItem,
        PlannedChange, StockDeltas,
    };
    use mealflow_menu::{CategoryId, Product, ProductId, RecipeComponent};
    use mealflow_orders::{Order, OrderStatus, OrderType};

    use crate::catalog::InMemoryMenuCatalog;
    use crate::config::{FulfillmentConfig, NotificationConfig};
    use crate::error::FulfillmentError;
    use crate::event_store::{
        EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent,
    };
    use crate::ledger::{
        CommitScope, InMemoryInventoryLedger, InMemoryLedgerTransaction, InventoryLedger,
        LedgerError, LedgerTransaction,
    };
    use crate::service::FulfillmentService;
    use crate::notify::{NotificationKind, Notifier, NotifyError, OrderNotification, notifier_for};
    use crate::service::test_support::Shop;

    type NotificationBus = InMemoryEventBus<EventEnvelope<OrderNotification>>;

    fn order_of(
        shop: &Shop,
        client: &Capabilities,
        product: ProductId,
        qty: u64,
    ) -> Result<Order, FulfillmentError> {
        shop.service.add_to_cart(client, product, qty)?;
        shop.service.checkout(client, "", OrderType::OnSite)
    }

    #[test]
    fn beans_scenario_consumes_and_rejects_overdraw() {
        let shop = Shop::new();
        let beans = shop.stock_item("Beans", dec!(1000));
        let coffee = shop.product("Coffee", 300, &[(beans, dec!(10))]);

        let order = order_of(&shop, &shop.client(), coffee, 10).unwrap();
        assert_eq!(order.total_amount(), 3000);
        assert_eq!(shop.quantity(beans), dec!(900));

        let err = order_of(&shop, &shop.client(), coffee, 101).unwrap_err();
        assert_eq!(err, FulfillmentError::InsufficientStock { item: beans.into() });
        assert_eq!(shop.quantity(beans), dec!(900));
        assert_eq!(shop.service.list_orders(&shop.employee()).len(), 1);
    }

    #[test]
    fn concurrent_checkouts_never_oversell() {
        let shop = Shop::new();
        let beans = shop.stock_item("Beans", dec!(1000));
        let coffee = shop.product("Coffee", 300, &[(beans, dec!(10))]);

        // Both carts pass the advisory check; only the ledger can arbitrate.
        let clients: Vec<_> = (0..2)
            .map(|_| {
                let caps = shop.client();
                shop.service.add_to_cart(&caps, coffee, 60).unwrap();
                caps
            })
            .collect();

        let barrier = Arc::new(Barrier::new(clients.len()));
        let handles: Vec<_> = clients
            .into_iter()
            .map(|caps| {
                let service = Arc::clone(&shop.service);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    service.checkout(&caps, "", OrderType::Takeaway)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let ok = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok, 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(FulfillmentError::InsufficientStock { item }) if *item == beans.into()
        )));
        assert_eq!(shop.quantity(beans), dec!(400));
    }

    #[test]
    fn cancel_restores_stock_once() {
        let shop = Shop::new();
        let beans = shop.stock_item("Beans", dec!(1000));
        let milk = shop.stock_item("Milk", dec!(2000));
        let latte = shop.product("Latte", 450, &[(beans, dec!(18)), (milk, dec!(150))]);
        let client = shop.client();

        shop.service.add_to_cart(&client, latte, 3).unwrap();
        let order = shop.service.checkout(&client, "", OrderType::OnSite).unwrap();
        assert_eq!(shop.quantity(beans), dec!(946));
        assert_eq!(shop.quantity(milk), dec!(1550));

        let canceled = shop.service.cancel(&client, order.id_typed()).unwrap();
        assert_eq!(canceled.status(), OrderStatus::Canceled);
        assert_eq!(shop.quantity(beans), dec!(1000));
        assert_eq!(shop.quantity(milk), dec!(2000));

        let err = shop.service.cancel(&client, order.id_typed()).unwrap_err();
        assert_eq!(err.code(), "illegal_transition");
        assert_eq!(shop.quantity(beans), dec!(1000));
    }

    #[test]
    fn racing_cancellations_restock_exactly_once() {
        let shop = Shop::new();
        let beans = shop.stock_item("Beans", dec!(1000));
        let coffee = shop.product("Coffee", 300, &[(beans, dec!(10))]);
        let client = shop.client();
        shop.service.add_to_cart(&client, coffee, 30).unwrap();
        let order = shop.service.checkout(&client, "", OrderType::OnSite).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [client, shop.employee()]
            .into_iter()
            .map(|caps| {
                let service = Arc::clone(&shop.service);
                let barrier = Arc::clone(&barrier);
                let id = order.id_typed();
                thread::spawn(move || {
                    barrier.wait();
                    service.cancel(&caps, id)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(matches!(err.code(), "conflict" | "illegal_transition"), "{err}");
        }
        assert_eq!(shop.quantity(beans), dec!(1000));
        let restocks = shop
            .service
            .ledger()
            .movements(shop.tenant, Some(beans))
            .unwrap()
            .into_iter()
            .filter(|m| m.quantity_change > Decimal::ZERO)
            .count();
        // Initial stock plus one cancellation.
        assert_eq!(restocks, 2);
    }

    #[test]
    fn product_without_recipe_cannot_be_ordered() {
        let shop = Shop::new();
        let water = shop.product("Water", 100, &[]);

        let err = order_of(&shop, &shop.client(), water, 1).unwrap_err();
        assert_eq!(err.code(), "missing_recipe");
        assert!(shop.service.cart(&shop.client()).is_empty());
    }

    /// In-memory ledger whose next `failures` commits fail before writing.
    struct FlakyLedger {
        inner: InMemoryInventoryLedger,
        failures: AtomicU32,
    }

    struct FlakyTransaction<'a> {
        inner: InMemoryLedgerTransaction<'a>,
        fail: bool,
    }

    impl LedgerTransaction for FlakyTransaction<'_> {
        fn changes(&self) -> &[PlannedChange] {
            self.inner.changes()
        }

        fn commit_with<T, E, F>(self, persist: F) -> Result<(T, Vec<InventoryMovement>), E>
        where
            E: From<LedgerError>,
            F: FnOnce(&mut CommitScope<'_>) -> Result<T, E>,
        {
            if self.fail {
                return Err(LedgerError::Store("disk full".to_string()).into());
            }
            self.inner.commit_with(persist)
        }
    }

    impl InventoryLedger for FlakyLedger {
        type Transaction<'a> = FlakyTransaction<'a>;

        fn begin(
            &self,
            tenant_id: TenantId,
            deltas: &StockDeltas,
            reason: MovementReason,
            actor: UserId,
        ) -> Result<Self::Transaction<'_>, LedgerError> {
            let inner = self.inner.begin(tenant_id, deltas, reason, actor)?;
            let fail = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            Ok(FlakyTransaction { inner, fail })
        }

        fn register_item(
            &self,
            input: NewInventoryItem,
            actor: UserId,
        ) -> Result<InventoryItem, LedgerError> {
            self.inner.register_item(input, actor)
        }

        fn item(
            &self,
            tenant_id: TenantId,
            item_id: InventoryItemId,
        ) -> Result<Option<InventoryItem>, LedgerError> {
            self.inner.item(tenant_id, item_id)
        }

        fn item_owner(&self, item_id: InventoryItemId) -> Result<Option<TenantId>, LedgerError> {
            self.inner.item_owner(item_id)
        }

        fn items(&self, tenant_id: TenantId) -> Result<Vec<InventoryItem>, LedgerError> {
            self.inner.items(tenant_id)
        }

        fn movements(
            &self,
            tenant_id: TenantId,
            item_id: Option<InventoryItemId>,
        ) -> Result<Vec<InventoryMovement>, LedgerError> {
            self.inner.movements(tenant_id, item_id)
        }
    }

    /// Event store that counts appended events.
    #[derive(Default)]
    struct CountingStore {
        inner: InMemoryEventStore,
        appended: AtomicUsize,
    }

    impl EventStore for CountingStore {
        fn append(
            &self,
            events: Vec<UncommittedEvent>,
            expected_version: ExpectedVersion,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            let stored = self.inner.append(events, expected_version)?;
            self.appended.fetch_add(stored.len(), Ordering::SeqCst);
            Ok(stored)
        }

        fn load_stream(
            &self,
            tenant_id: TenantId,
            aggregate_id: AggregateId,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_stream(tenant_id, aggregate_id)
        }
    }

    #[test]
    fn failed_ledger_commit_leaves_no_order_behind() {
        let tenant = TenantId::new();
        let ledger = FlakyLedger {
            inner: InMemoryInventoryLedger::default(),
            failures: AtomicU32::new(1),
        };
        let beans = ledger
            .register_item(
                NewInventoryItem {
                    tenant_id: tenant,
                    item_id: InventoryItemId::generate(),
                    name: "Beans".to_string(),
                    unit: "g".to_string(),
                    initial_quantity: dec!(1000),
                    min_quantity: None,
                },
                UserId::new(),
            )
            .unwrap()
            .id_typed();

        let catalog = InMemoryMenuCatalog::new();
        let coffee =
            Product::new(ProductId::generate(), tenant, "Coffee", 300, CategoryId::generate())
                .unwrap();
        let coffee_id = coffee.id_typed();
        catalog.set_recipe(
            tenant,
            coffee_id,
            vec![RecipeComponent {
                product_id: coffee_id,
                inventory_item_id: beans,
                item_tenant_id: tenant,
                quantity_per_unit: dec!(10),
            }],
        );
        catalog.upsert_product(coffee);

        let store = Arc::new(CountingStore::default());
        let service = FulfillmentService::new(
            Arc::clone(&store),
            ledger,
            catalog,
            FulfillmentConfig::default(),
        );
        let client = Capabilities::resolve(&Principal::client(UserId::new(), tenant)).unwrap();
        let staff = Capabilities::resolve(&Principal::employee(UserId::new(), tenant)).unwrap();
        let beans_left = || service.ledger().item(tenant, beans).unwrap().unwrap().quantity();

        service.add_to_cart(&client, coffee_id, 10).unwrap();
        let err = service.checkout(&client, "", OrderType::OnSite).unwrap_err();

        assert_eq!(err.code(), "store_error");
        assert_eq!(store.appended.load(Ordering::SeqCst), 0);
        assert_eq!(beans_left(), dec!(1000));
        assert_eq!(service.cart(&client).quantity_of(coffee_id), Some(10));
        assert!(service.list_orders(&staff).is_empty());

        let order = service.checkout(&client, "", OrderType::OnSite).unwrap();
        assert_eq!(beans_left(), dec!(900));
        service.cancel(&client, order.id_typed()).unwrap();
        assert_eq!(beans_left(), dec!(1000));

        let changes: Vec<_> = service
            .ledger()
            .movements(tenant, Some(beans))
            .unwrap()
            .iter()
            .map(|m| m.quantity_change)
            .collect();
        assert_eq!(changes, vec![dec!(1000), dec!(-100), dec!(100)]);
        assert_eq!(store.appended.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_checkout_keeps_the_cart() {
        let shop = Shop::new();
        let beans = shop.stock_item("Beans", dec!(100));
        let coffee = shop.product("Coffee", 300, &[(beans, dec!(10))]);
        let client = shop.client();
        shop.service.add_to_cart(&client, coffee, 10).unwrap();

        let manager = shop.manager();
        let write_off: StockDeltas = [(beans, dec!(-95))].into_iter().collect();
        shop.service
            .adjust_inventory(&manager, &write_off, MovementReason::new("spilled"))
            .unwrap();

        let err = shop.service.checkout(&client, "", OrderType::OnSite).unwrap_err();
        assert_eq!(err.code(), "insufficient_stock");
        assert_eq!(shop.service.cart(&client).quantity_of(coffee), Some(10));
        assert_eq!(shop.quantity(beans), dec!(5));
    }

    #[test]
    fn notifications_follow_committed_orders() {
        let bus: Arc<NotificationBus> = Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();
        let shop = Shop::with_notifier(notifier_for(&NotificationConfig::default(), bus.clone()));
        let beans = shop.stock_item("Beans", dec!(1000));
        let coffee = shop.product("Coffee", 300, &[(beans, dec!(10))]);

        let order = order_of(&shop, &shop.client(), coffee, 2).unwrap();
        shop.service
            .transition(&shop.employee(), order.id_typed(), OrderStatus::InProgress)
            .unwrap();
        // Rejected calls notify nothing.
        let _ = order_of(&shop, &shop.client(), coffee, 1000);

        let received: Vec<_> = sub.drain().into_iter().map(|e| e.into_payload()).collect();
        assert_eq!(received.len(), 2);
        assert!(matches!(
            received[0].kind,
            NotificationKind::OrderCreated { total_amount: 600, .. }
        ));
        assert!(matches!(
            received[1].kind,
            NotificationKind::OrderStatusChanged {
                previous: OrderStatus::New,
                new: OrderStatus::InProgress,
                ..
            }
        ));
        assert_eq!(received[1].sequence_number, 2);
    }

    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        fn notify(&self, _: &OrderNotification) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery("gateway down".to_string()))
        }
    }

    #[test]
    fn notification_failure_does_not_undo_the_order() {
        let shop = Shop::with_notifier(Arc::new(FailingNotifier));
        let beans = shop.stock_item("Beans", dec!(1000));
        let coffee = shop.product("Coffee", 300, &[(beans, dec!(10))]);

        let order = order_of(&shop, &shop.client(), coffee, 5).unwrap();
        assert_eq!(shop.quantity(beans), dec!(950));
        assert!(shop.service.order(&shop.employee(), order.id_typed()).is_ok());
    }

    #[test]
    fn tenants_do_not_see_each_other() {
        let a = Shop::new();
        let b = a.neighbour();
        let beans = a.stock_item("Beans", dec!(1000));
        let coffee = a.product("Coffee", 300, &[(beans, dec!(10))]);
        let order = order_of(&a, &a.client(), coffee, 1).unwrap();

        assert_eq!(
            b.service.order(&b.employee(), order.id_typed()).unwrap_err(),
            FulfillmentError::NotFound
        );
        assert_eq!(b.service.cancel(&b.employee(), order.id_typed()).unwrap_err().code(), "not_found");
        assert!(b.service.list_orders(&b.employee()).is_empty());
        assert_eq!(
            b.service.add_to_cart(&b.client(), coffee, 1).unwrap_err().code(),
            "not_found"
        );
        assert!(b.service.ledger().items(b.tenant).unwrap().is_empty());
        assert_eq!(a.quantity(beans), dec!(990));
    }

    #[test]
    fn clients_only_see_their_own_orders() {
        let shop = Shop::new();
        let beans = shop.stock_item("Beans", dec!(1000));
        let coffee = shop.product("Coffee", 300, &[(beans, dec!(10))]);
        let first = shop.client();
        let second = shop.client();

        shop.service.add_to_cart(&first, coffee, 1).unwrap();
        let order = shop.service.checkout(&first, "", OrderType::OnSite).unwrap();
        shop.service.add_to_cart(&second, coffee, 2).unwrap();
        shop.service.checkout(&second, "", OrderType::OnSite).unwrap();

        assert_eq!(shop.service.list_orders(&first).len(), 1);
        assert_eq!(shop.service.list_orders(&shop.employee()).len(), 2);
        assert_eq!(
            shop.service.order(&second, order.id_typed()).unwrap_err().code(),
            "forbidden"
        );
    }

    #[test]
    fn order_view_tracks_the_stream() {
        let shop = Shop::new();
        let beans = shop.stock_item("Beans", dec!(1000));
        let coffee = shop.product("Coffee", 300, &[(beans, dec!(10))]);
        let client = shop.client();
        let order = order_of(&shop, &client, coffee, 2).unwrap();
        shop.service
            .change_order_item_quantity(&shop.employee(), order.id_typed(), coffee, 4)
            .unwrap();

        let views = shop.service.list_orders(&shop.employee());
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].total_amount, 1200);
        assert_eq!(views[0].version, 2);
        assert_eq!(views[0].lines[0].quantity, 4);
        assert_eq!(shop.service.list_orders(&client), views);
        assert!(shop.service.list_orders(&shop.client()).is_empty());
    }

    #[test]
    fn menu_availability_reflects_stock() {
        let shop = Shop::new();
        let beans = shop.stock_item("Beans", dec!(95));
        let milk = shop.stock_item("Milk", dec!(450));
        let coffee = shop.product("Coffee", 300, &[(beans, dec!(10))]);
        let latte = shop.product("Latte", 450, &[(beans, dec!(10)), (milk, dec!(200))]);
        let water = shop.product("Water", 100, &[]);

        let menu = shop.service.menu_availability(&shop.client()).unwrap();
        assert_eq!(menu[&coffee], 9);
        assert_eq!(menu[&latte], 2);
        assert_eq!(menu[&water], 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 32, ..ProptestConfig::default() })]

        #[test]
        fn totals_and_stock_stay_consistent_across_edits(
            initial in 1u64..20,
            edits in proptest::collection::vec(1u64..70, 0..8),
        ) {
            let shop = Shop::new();
            let beans = shop.stock_item("Beans", dec!(500));
            let coffee = shop.product("Coffee", 275, &[(beans, dec!(10))]);
            let client = shop.client();
            let order = order_of(&shop, &client, coffee, initial).unwrap();

            let mut expected_qty = initial;
            for qty in edits {
                match shop.service.change_order_item_quantity(&client, order.id_typed(), coffee, qty) {
                    Ok(o) => {
                        expected_qty = qty;
                        let lines: u64 = o.items().iter().map(|i| i.line_total()).sum();
                        prop_assert_eq!(o.total_amount(), lines);
                    }
                    Err(e) => prop_assert_eq!(e.code(), "insufficient_stock"),
                }
                let remaining = shop.quantity(beans);
                prop_assert!(remaining >= Decimal::ZERO);
                prop_assert_eq!(remaining, dec!(500) - Decimal::from(expected_qty * 10));
            }

            let reloaded = shop.service.order(&client, order.id_typed()).unwrap();
            prop_assert_eq!(reloaded.total_amount(), expected_qty * 275);
            prop_assert!(reloaded.version() >= 1);
        }
    }
}
