//! Menu domain module.
//!
//! Products and their bills of materials as handed to us by the menu service,
//! plus the pure recipe math: how many units can be produced from current
//! stock, and which ingredient deltas a set of order lines requires.

pub mod product;
pub mod recipe;
pub mod resolve;

pub use product::{CategoryId, Product, ProductId};
pub use recipe::{Recipe, RecipeComponent};
pub use resolve::{floor_units, max_producible, required_deltas, shortfall};
