//! Infrastructure layer: event store, inventory ledger, menu catalog, and the
//! fulfillment services that tie them together.

pub mod catalog;
pub mod config;
pub mod error;
pub mod event_store;
pub mod ledger;
pub mod notify;
pub mod order_store;
pub mod read_model;
pub mod resolver;
pub mod sequence;
pub mod service;

pub use catalog::{InMemoryMenuCatalog, MenuCatalog};
pub use config::{FulfillmentConfig, NotificationChannel, NotificationConfig};
pub use error::FulfillmentError;
pub use ledger::{
    CommitScope, InMemoryInventoryLedger, InventoryLedger, LedgerError, LedgerTransaction,
};
pub use notify::{Notifier, OrderNotification, notifier_for};
pub use service::FulfillmentService;

#[cfg(test)]
mod integration_tests;
