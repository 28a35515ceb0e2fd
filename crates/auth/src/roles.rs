use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role identifier used for RBAC.
///
/// Roles are opaque strings supplied by the identity service. Only
/// [`crate::permissions_for_roles`] interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    /// Customer placing orders at a company.
    pub const CLIENT: Role = Role(Cow::Borrowed("client"));
    /// Kitchen/floor staff of a company.
    pub const EMPLOYEE: Role = Role(Cow::Borrowed("employee"));
    /// Company administrator.
    pub const COMPANY_ADMIN: Role = Role(Cow::Borrowed("company_admin"));
    /// Platform administrator.
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
