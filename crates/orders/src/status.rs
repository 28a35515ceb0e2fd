use core::str::FromStr;

use serde::{Deserialize, Serialize};

use mealflow_core::{DomainError, DomainResult};

/// Order status lifecycle.
///
/// ```text
/// NEW → IN_PROGRESS → READY → DONE
///  └──→ CANCELED
/// ```
///
/// `DONE` and `CANCELED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    InProgress,
    Ready,
    #[serde(alias = "COMPLETED")]
    Done,
    Canceled,
}

/// What an edge does to stock when the order consumed at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockEffect {
    None,
    /// Give back everything the order still holds.
    RestockConsumed,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::New,
        OrderStatus::InProgress,
        OrderStatus::Ready,
        OrderStatus::Done,
        OrderStatus::Canceled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::InProgress => "IN_PROGRESS",
            OrderStatus::Ready => "READY",
            OrderStatus::Done => "DONE",
            OrderStatus::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Done | OrderStatus::Canceled)
    }

    /// Items may only be touched before work on the order starts.
    pub fn allows_item_changes(self) -> bool {
        self == OrderStatus::New
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::New, OrderStatus::InProgress)
                | (OrderStatus::InProgress, OrderStatus::Ready)
                | (OrderStatus::Ready, OrderStatus::Done)
                | (OrderStatus::New, OrderStatus::Canceled)
        )
    }

    /// Validate an edge, returning its stock effect.
    pub fn transition(self, next: OrderStatus) -> DomainResult<StockEffect> {
        if !self.can_transition_to(next) {
            return Err(DomainError::illegal_transition(self, next));
        }
        Ok(match (self, next) {
            (OrderStatus::New, OrderStatus::Canceled) => StockEffect::RestockConsumed,
            _ => StockEffect::None,
        })
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NEW" => Ok(OrderStatus::New),
            "IN_PROGRESS" => Ok(OrderStatus::InProgress),
            "READY" => Ok(OrderStatus::Ready),
            "DONE" | "COMPLETED" => Ok(OrderStatus::Done),
            "CANCELED" | "CANCELLED" => Ok(OrderStatus::Canceled),
            other => Err(DomainError::validation(format!("unknown order status: {other}"))),
        }
    }
}

/// How the order is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    #[default]
    OnSite,
    Takeaway,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::OnSite => "ON_SITE",
            OrderType::Takeaway => "TAKEAWAY",
        }
    }
}

impl FromStr for OrderType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ON_SITE" | "ONSITE" => Ok(OrderType::OnSite),
            "TAKEAWAY" => Ok(OrderType::Takeaway),
            other => Err(DomainError::validation(format!("unknown order type: {other}"))),
        }
    }
}
