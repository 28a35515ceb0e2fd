use std::collections::HashSet;

use thiserror::Error;

use crate::{Permission, Principal, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Role → permission policy.
///
/// This is the only place role names are interpreted.
pub fn permissions_for_roles(roles: &[Role]) -> Vec<Permission> {
    let mut granted = Vec::new();
    for role in roles {
        match role.as_str() {
            "admin" => return vec![Permission::WILDCARD],
            "company_admin" => granted.extend([
                Permission::ORDERS_TRANSITION,
                Permission::INVENTORY_ADJUST,
            ]),
            "employee" => granted.push(Permission::ORDERS_TRANSITION),
            "client" => granted.extend([Permission::ORDERS_PLACE, Permission::ORDERS_CANCEL_OWN]),
            _ => {}
        }
    }
    granted
}

/// Effective permissions of a principal: explicit grants plus role grants.
pub(crate) fn effective_permissions(principal: &Principal) -> HashSet<String> {
    principal
        .membership
        .permissions
        .iter()
        .cloned()
        .chain(permissions_for_roles(&principal.membership.roles))
        .map(|p| p.as_str().to_string())
        .collect()
}

/// Authorize a principal within its active tenant context.
///
/// Pure policy check: no IO, no business logic.
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.active_tenant_id != principal.membership.tenant_id {
        return Err(AuthzError::TenantMismatch);
    }

    let perms = effective_permissions(principal);
    if perms.contains("*") || perms.contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}
