//! Tenant-isolated stores for carts and order views.

pub mod orders;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod tenant_store;

pub use orders::{OrderLineView, OrderView};
#[cfg(feature = "postgres")]
pub use postgres::PostgresOrderViews;
pub use tenant_store::{InMemoryTenantStore, TenantStore};
