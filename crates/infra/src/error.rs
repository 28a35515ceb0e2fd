//! Service-boundary error for the fulfillment core.
//!
//! Every rejected call leaves cart, stock and order exactly as before; the
//! error is surfaced verbatim with a stable [`code`](FulfillmentError::code).

use thiserror::Error;

use mealflow_auth::AuthzError;
use mealflow_core::{AggregateId, DomainError};

use crate::event_store::EventStoreError;
use crate::ledger::LedgerError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FulfillmentError {
    #[error("insufficient stock for inventory item {item}")]
    InsufficientStock { item: AggregateId },

    #[error("product {product} has no recipe")]
    MissingRecipe { product: AggregateId },

    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    #[error("cart is empty")]
    EmptyCart,

    #[error("validation failed: {0}")]
    Validation(String),

    /// Inventory rows stayed locked past the timeout. Retryable.
    #[error("busy: {0}")]
    Busy(String),

    /// The order changed since it was loaded.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found")]
    NotFound,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("storage error: {0}")]
    Store(String),
}

impl FulfillmentError {
    pub fn code(&self) -> &'static str {
        match self {
            FulfillmentError::InsufficientStock { .. } => "insufficient_stock",
            FulfillmentError::MissingRecipe { .. } => "missing_recipe",
            FulfillmentError::IllegalTransition { .. } => "illegal_transition",
            FulfillmentError::EmptyCart => "empty_cart",
            FulfillmentError::Validation(_) => "validation_error",
            FulfillmentError::Busy(_) => "busy",
            FulfillmentError::Conflict(_) => "conflict",
            FulfillmentError::NotFound => "not_found",
            FulfillmentError::Forbidden(_) => "forbidden",
            FulfillmentError::TenantIsolation(_) => "tenant_isolation",
            FulfillmentError::Store(_) => "store_error",
        }
    }

    /// Only `Busy` is retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FulfillmentError::Busy(_))
    }
}

impl From<DomainError> for FulfillmentError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg)
            | DomainError::InvariantViolation(msg)
            | DomainError::InvalidId(msg) => FulfillmentError::Validation(msg),
            DomainError::NotFound => FulfillmentError::NotFound,
            DomainError::Conflict(msg) => FulfillmentError::Conflict(msg),
            DomainError::Unauthorized => FulfillmentError::Forbidden("unauthorized".to_string()),
            DomainError::InsufficientStock { item } => FulfillmentError::InsufficientStock { item },
            DomainError::MissingRecipe { product } => FulfillmentError::MissingRecipe { product },
            DomainError::IllegalTransition { from, to } => {
                FulfillmentError::IllegalTransition { from, to }
            }
            DomainError::EmptyCart => FulfillmentError::EmptyCart,
        }
    }
}

impl From<LedgerError> for FulfillmentError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::Domain(err) => err.into(),
            LedgerError::Busy(msg) => FulfillmentError::Busy(msg),
            LedgerError::TenantIsolation(msg) => FulfillmentError::TenantIsolation(msg),
            LedgerError::Store(msg) => FulfillmentError::Store(msg),
        }
    }
}

impl From<EventStoreError> for FulfillmentError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => FulfillmentError::Conflict(msg),
            EventStoreError::TenantIsolation(msg) => FulfillmentError::TenantIsolation(msg),
            other => FulfillmentError::Store(other.to_string()),
        }
    }
}

impl From<AuthzError> for FulfillmentError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::TenantMismatch => {
                FulfillmentError::TenantIsolation("principal tenant mismatch".to_string())
            }
            AuthzError::Forbidden(what) => FulfillmentError::Forbidden(what),
        }
    }
}
