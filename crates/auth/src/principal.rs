use serde::{Deserialize, Serialize};

use mealflow_core::{TenantId, UserId};

use crate::{Permission, Role};

/// A principal's membership in a tenant: which roles and explicit
/// permissions it holds there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantMembership {
    pub tenant_id: TenantId,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

/// An authenticated caller, as supplied by the identity/session service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub active_tenant_id: TenantId,
    pub membership: TenantMembership,
}

impl Principal {
    /// Convenience constructor for a caller with roles only.
    pub fn with_roles(user_id: UserId, tenant_id: TenantId, roles: Vec<Role>) -> Self {
        Self {
            user_id,
            active_tenant_id: tenant_id,
            membership: TenantMembership {
                tenant_id,
                roles,
                permissions: Vec::new(),
            },
        }
    }

    pub fn client(user_id: UserId, tenant_id: TenantId) -> Self {
        Self::with_roles(user_id, tenant_id, vec![Role::CLIENT])
    }

    pub fn employee(user_id: UserId, tenant_id: TenantId) -> Self {
        Self::with_roles(user_id, tenant_id, vec![Role::EMPLOYEE])
    }
}
