//! Orders domain module (event-sourced).
//!
//! The order aggregate with its status state machine, and the client cart
//! that checkout turns into an order. Deterministic domain logic only; stock
//! effects are carried on events and applied by the infra services.

pub mod cart;
pub mod order;
pub mod status;

pub use cart::{Cart, CartLine};
pub use order::{
    AddItem, ChangeItemQuantity, ChangeStatus, ItemAdded, ItemQuantityChanged, ItemRemoved, Order,
    OrderCommand, OrderEvent, OrderId, OrderItem, OrderPlaced, PlaceOrder, RemoveItem,
    StatusChanged, StatusRecord, truncate_notes,
};
pub use status::{OrderStatus, OrderType, StockEffect};
