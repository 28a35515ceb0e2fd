use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier (e.g. "orders.transition").
///
/// The wildcard `"*"` grants everything within the principal's tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission(Cow::Borrowed("*"));
    /// Fill a cart and check out.
    pub const ORDERS_PLACE: Permission = Permission(Cow::Borrowed("orders.place"));
    /// Cancel (and edit while NEW) one's own orders.
    pub const ORDERS_CANCEL_OWN: Permission = Permission(Cow::Borrowed("orders.cancel_own"));
    /// Drive any order of the tenant through the state machine.
    pub const ORDERS_TRANSITION: Permission = Permission(Cow::Borrowed("orders.transition"));
    /// Register items and restock through the ledger.
    pub const INVENTORY_ADJUST: Permission = Permission(Cow::Borrowed("inventory.adjust"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
