//! Append-only order event streams.
//!
//! One stream per order, keyed by `(tenant_id, order_id)`. Appends are guarded
//! by `ExpectedVersion`, so two writers racing on the same order cannot both
//! commit.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
