//! `mealflow-auth` — authorization boundary for the fulfillment core.
//!
//! Identity is established by an external session service; this crate only
//! turns the `(tenant, user, roles)` it hands us into capabilities.

pub mod authorize;
pub mod capabilities;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{authorize, permissions_for_roles, AuthzError};
pub use capabilities::Capabilities;
pub use permissions::Permission;
pub use principal::{Principal, TenantMembership};
pub use roles::Role;
