//! Order persistence over the event store.
//!
//! ```text
//! load:   load stream (tenant-scoped) → validate → rehydrate Order
//! append: OrderEvent → UncommittedEvent → append with ExpectedVersion
//! ```
//!
//! Deciding events is left to the caller so stock effects can be staged
//! between `Order::handle` and `append`.

use serde::de::DeserializeOwned;
use uuid::Uuid;

use mealflow_core::{Aggregate, AggregateId, ExpectedVersion, TenantId};
use mealflow_orders::{Order, OrderEvent, OrderId};

use crate::error::FulfillmentError;
use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
use crate::ledger::CommitScope;

pub const ORDER_AGGREGATE_TYPE: &str = "orders.order";

#[derive(Debug)]
pub struct OrderRepository<S> {
    store: S,
}

impl<S> OrderRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: EventStore> OrderRepository<S> {
    /// Rehydrated order, or `NotFound` if it was never placed in `tenant_id`.
    pub fn load(&self, tenant_id: TenantId, order_id: OrderId) -> Result<Order, FulfillmentError> {
        let order = self.load_or_empty(tenant_id, order_id)?;
        if !order.is_created() {
            return Err(FulfillmentError::NotFound);
        }
        Ok(order)
    }

    /// Rehydrated order; an empty aggregate (version 0) for an unknown id.
    pub fn load_or_empty(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Order, FulfillmentError> {
        let aggregate_id = order_id.as_aggregate_id();
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;

        let mut order = Order::empty(order_id);
        apply_history(&mut order, &history)?;
        Ok(order)
    }

    /// Append decided events. A stale `expected` version fails with
    /// `Conflict` and nothing is written.
    pub fn append(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        expected: ExpectedVersion,
        events: &[OrderEvent],
    ) -> Result<Vec<StoredEvent>, FulfillmentError> {
        let uncommitted = encode(tenant_id, order_id, events)?;
        if uncommitted.is_empty() {
            return Ok(vec![]);
        }
        Ok(self.store.append(uncommitted, expected)?)
    }

    /// [`append`](Self::append) inside a ledger commit.
    pub fn append_in(
        &self,
        scope: &mut CommitScope<'_>,
        tenant_id: TenantId,
        order_id: OrderId,
        expected: ExpectedVersion,
        events: &[OrderEvent],
    ) -> Result<Vec<StoredEvent>, FulfillmentError> {
        let uncommitted = encode(tenant_id, order_id, events)?;
        if uncommitted.is_empty() {
            return Ok(vec![]);
        }
        Ok(self.store.append_in(scope, uncommitted, expected)?)
    }
}

fn encode(
    tenant_id: TenantId,
    order_id: OrderId,
    events: &[OrderEvent],
) -> Result<Vec<UncommittedEvent>, FulfillmentError> {
    if let Some(e) = events.iter().find(|e| e.tenant_id() != tenant_id) {
        return Err(FulfillmentError::TenantIsolation(format!(
            "event for tenant {} appended to tenant {}",
            e.tenant_id(),
            tenant_id
        )));
    }

    Ok(events
        .iter()
        .map(|ev| {
            UncommittedEvent::from_typed(
                tenant_id,
                order_id.as_aggregate_id(),
                ORDER_AGGREGATE_TYPE,
                Uuid::now_v7(),
                ev,
            )
        })
        .collect::<Result<Vec<_>, _>>()?)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), FulfillmentError> {
    // Guard against a backend returning foreign or out-of-order events.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(FulfillmentError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(FulfillmentError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.aggregate_type != ORDER_AGGREGATE_TYPE {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "expected '{ORDER_AGGREGATE_TYPE}', found '{}'",
                e.aggregate_type
            ))
            .into());
        }
        if e.sequence_number <= last {
            return Err(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))
            .into());
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), FulfillmentError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| FulfillmentError::Store(format!("failed to deserialize order event: {e}")))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mealflow_core::{AggregateRoot, UserId};
    use mealflow_menu::ProductId;
    use mealflow_orders::{
        ChangeStatus, OrderCommand, OrderItem, OrderStatus, OrderType, PlaceOrder,
    };

    use crate::event_store::InMemoryEventStore;

    fn place(tenant: TenantId, order_id: OrderId) -> OrderCommand {
        OrderCommand::PlaceOrder(PlaceOrder {
            tenant_id: tenant,
            order_id,
            client_id: UserId::new(),
            number: 1,
            order_type: OrderType::OnSite,
            notes: String::new(),
            items: vec![OrderItem::new(ProductId::generate(), 2, 150)],
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn appended_events_rehydrate_the_order() {
        let repo = OrderRepository::new(InMemoryEventStore::new());
        let tenant = TenantId::new();
        let order_id = OrderId::generate();

        let fresh = repo.load_or_empty(tenant, order_id).unwrap();
        let events = fresh.handle(&place(tenant, order_id)).unwrap();
        repo.append(tenant, order_id, ExpectedVersion::Exact(0), &events)
            .unwrap();

        let order = repo.load(tenant, order_id).unwrap();
        assert_eq!(order.version(), 1);
        assert_eq!(order.total_amount(), 300);
        assert_eq!(order.status(), OrderStatus::New);
    }

    #[test]
    fn unknown_order_is_not_found() {
        let repo = OrderRepository::new(InMemoryEventStore::new());
        let err = repo.load(TenantId::new(), OrderId::generate()).unwrap_err();
        assert_eq!(err, FulfillmentError::NotFound);
    }

    #[test]
    fn stale_writer_gets_conflict() {
        let repo = OrderRepository::new(InMemoryEventStore::new());
        let tenant = TenantId::new();
        let order_id = OrderId::generate();
        let events = Order::empty(order_id).handle(&place(tenant, order_id)).unwrap();
        repo.append(tenant, order_id, ExpectedVersion::Exact(0), &events)
            .unwrap();

        let order = repo.load(tenant, order_id).unwrap();
        let advance = OrderCommand::ChangeStatus(ChangeStatus {
            tenant_id: tenant,
            order_id,
            to: OrderStatus::InProgress,
            actor: UserId::new(),
            occurred_at: Utc::now(),
        });
        let first = order.handle(&advance).unwrap();
        let second = order.handle(&advance).unwrap();

        repo.append(tenant, order_id, ExpectedVersion::Exact(order.version()), &first)
            .unwrap();
        let err = repo
            .append(tenant, order_id, ExpectedVersion::Exact(order.version()), &second)
            .unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[test]
    fn other_tenant_cannot_see_the_order() {
        let repo = OrderRepository::new(InMemoryEventStore::new());
        let tenant = TenantId::new();
        let order_id = OrderId::generate();
        let events = Order::empty(order_id).handle(&place(tenant, order_id)).unwrap();
        repo.append(tenant, order_id, ExpectedVersion::Exact(0), &events)
            .unwrap();

        assert_eq!(
            repo.load(TenantId::new(), order_id).unwrap_err(),
            FulfillmentError::NotFound
        );
    }
}
