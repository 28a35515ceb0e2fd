//! Inventory domain module.
//!
//! Stock rows, the append-only movement ledger and the pure planning step
//! that decides whether a set of deltas may be applied. Locking and storage
//! live in `mealflow-infra`.

pub mod deltas;
pub mod item;
pub mod movement;
pub mod plan;

pub use deltas::StockDeltas;
pub use item::{InventoryItem, InventoryItemId, NewInventoryItem};
pub use movement::{InventoryMovement, MovementId, MovementReason};
pub use plan::{plan_adjustment, PlannedChange};
