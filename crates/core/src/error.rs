//! Domain error model.

use thiserror::Error;

use crate::id::AggregateId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, stock, state machine). Infrastructure concerns such as lock
/// contention belong to the infra layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Authorization failure at the domain boundary.
    #[error("unauthorized")]
    Unauthorized,

    /// Applying a consumption would drive an inventory item below zero.
    #[error("insufficient stock for inventory item {item}")]
    InsufficientStock { item: AggregateId },

    /// A product has no bill-of-materials and can never be produced.
    #[error("product {product} has no recipe")]
    MissingRecipe { product: AggregateId },

    /// The requested order status change is not an edge of the state machine.
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    /// Checkout was attempted on a cart without lines.
    #[error("cart is empty")]
    EmptyCart,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn insufficient_stock(item: impl Into<AggregateId>) -> Self {
        Self::InsufficientStock { item: item.into() }
    }

    pub fn missing_recipe(product: impl Into<AggregateId>) -> Self {
        Self::MissingRecipe {
            product: product.into(),
        }
    }

    pub fn illegal_transition(from: impl core::fmt::Display, to: impl core::fmt::Display) -> Self {
        Self::IllegalTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Stable, machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) | DomainError::InvalidId(_) => "validation_error",
            DomainError::InvariantViolation(_) => "invariant_violation",
            DomainError::NotFound => "not_found",
            DomainError::Conflict(_) => "conflict",
            DomainError::Unauthorized => "forbidden",
            DomainError::InsufficientStock { .. } => "insufficient_stock",
            DomainError::MissingRecipe { .. } => "missing_recipe",
            DomainError::IllegalTransition { .. } => "illegal_transition",
            DomainError::EmptyCart => "empty_cart",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let item = AggregateId::new();
        assert_eq!(DomainError::insufficient_stock(item).code(), "insufficient_stock");
        assert_eq!(DomainError::missing_recipe(item).code(), "missing_recipe");
        assert_eq!(DomainError::illegal_transition("NEW", "DONE").code(), "illegal_transition");
        assert_eq!(DomainError::EmptyCart.code(), "empty_cart");
        assert_eq!(DomainError::validation("quantity").code(), "validation_error");
    }

    #[test]
    fn illegal_transition_renders_both_states() {
        let err = DomainError::illegal_transition("DONE", "CANCELED");
        assert_eq!(err.to_string(), "illegal transition from DONE to CANCELED");
    }
}
