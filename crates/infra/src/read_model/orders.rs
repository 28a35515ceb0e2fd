use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mealflow_core::{AggregateRoot, TenantId, UserId};
use mealflow_menu::ProductId;
use mealflow_orders::{Order, OrderId, OrderStatus, OrderType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineView {
    pub product_id: ProductId,
    pub quantity: u64,
    pub unit_price: u64,
    pub line_total: u64,
}

/// Flattened order for listings and reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderView {
    pub order_id: OrderId,
    pub tenant_id: TenantId,
    pub client_id: UserId,
    pub number: u64,
    pub status: OrderStatus,
    pub order_type: OrderType,
    pub notes: String,
    pub lines: Vec<OrderLineView>,
    pub total_amount: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_modified_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl OrderView {
    /// `None` for an order that was never placed.
    pub fn from_order(order: &Order) -> Option<Self> {
        let (tenant_id, client_id) = order.tenant_id().zip(order.client_id())?;
        Some(Self {
            order_id: order.id_typed(),
            tenant_id,
            client_id,
            number: order.number(),
            status: order.status(),
            order_type: order.order_type(),
            notes: order.notes().to_string(),
            lines: order
                .items()
                .iter()
                .map(|i| OrderLineView {
                    product_id: i.product_id,
                    quantity: i.quantity,
                    unit_price: i.unit_price,
                    line_total: i.line_total(),
                })
                .collect(),
            total_amount: order.total_amount(),
            created_at: order.created_at(),
            completed_at: order.completed_at(),
            last_modified_at: order.last_modified_at(),
            version: order.version(),
        })
    }
}
