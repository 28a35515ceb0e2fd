//! Outbound order notifications.
//!
//! Delivery happens after the order transaction committed. A failed delivery
//! is logged and never rolls anything back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use mealflow_core::{TenantId, UserId};
use mealflow_events::{EventBus, EventEnvelope};
use mealflow_orders::{OrderId, OrderStatus};

use crate::config::{NotificationChannel, NotificationConfig};
use crate::order_store::ORDER_AGGREGATE_TYPE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationKind {
    OrderCreated {
        client_id: UserId,
        total_amount: u64,
    },
    OrderStatusChanged {
        previous: OrderStatus,
        new: OrderStatus,
        actor: UserId,
    },
}

impl NotificationKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            NotificationKind::OrderCreated { .. } => "orders.notification.order_created",
            NotificationKind::OrderStatusChanged { .. } => "orders.notification.status_changed",
        }
    }
}

/// Plain-data notification handed to the notification service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderNotification {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub number: u64,
    /// Stream position of the event behind this notification.
    pub sequence_number: u64,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: NotificationKind,
}

impl OrderNotification {
    pub fn to_envelope(&self) -> EventEnvelope<OrderNotification> {
        EventEnvelope::new(
            Uuid::now_v7(),
            self.tenant_id,
            self.order_id.as_aggregate_id(),
            ORDER_AGGREGATE_TYPE,
            self.kind.event_type(),
            self.sequence_number,
            self.clone(),
        )
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &OrderNotification) -> Result<(), NotifyError>;
}

/// Publishes notifications as envelopes on an event bus.
#[derive(Debug)]
pub struct BusNotifier<B> {
    bus: B,
}

impl<B> BusNotifier<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

impl<B> Notifier for BusNotifier<B>
where
    B: EventBus<EventEnvelope<OrderNotification>>,
{
    fn notify(&self, notification: &OrderNotification) -> Result<(), NotifyError> {
        self.bus
            .publish(notification.to_envelope())
            .map_err(|e| NotifyError::Delivery(format!("{e:?}")))
    }
}

/// Writes one structured log line per notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, n: &OrderNotification) -> Result<(), NotifyError> {
        info!(
            tenant_id = %n.tenant_id,
            order_id = %n.order_id,
            number = n.number,
            event_type = n.kind.event_type(),
            "order notification"
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledNotifier;

impl Notifier for DisabledNotifier {
    fn notify(&self, _: &OrderNotification) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Build the notifier described by `config`.
pub fn notifier_for<B>(config: &NotificationConfig, bus: B) -> Arc<dyn Notifier>
where
    B: EventBus<EventEnvelope<OrderNotification>> + 'static,
{
    match (config.enabled, config.channel) {
        (false, _) => Arc::new(DisabledNotifier),
        (true, NotificationChannel::Log) => Arc::new(LogNotifier),
        (true, NotificationChannel::Bus) => Arc::new(BusNotifier::new(bus)),
    }
}
