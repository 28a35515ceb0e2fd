//! Capabilities resolved once per request.
//!
//! Services ask questions such as "may this caller cancel that order?" and
//! never look at role names themselves.

use std::collections::HashSet;

use mealflow_core::{TenantId, UserId};
use tracing::debug;

use crate::authorize::effective_permissions;
use crate::{AuthzError, Permission, Principal};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    user_id: UserId,
    tenant_id: TenantId,
    permissions: HashSet<String>,
}

impl Capabilities {
    /// Resolve the capabilities of `principal` in its active tenant.
    pub fn resolve(principal: &Principal) -> Result<Self, AuthzError> {
        if principal.active_tenant_id != principal.membership.tenant_id {
            return Err(AuthzError::TenantMismatch);
        }
        let permissions = effective_permissions(principal);
        debug!(
            user_id = %principal.user_id,
            tenant_id = %principal.active_tenant_id,
            permissions = ?permissions,
            "resolved capabilities"
        );
        Ok(Self {
            user_id: principal.user_id,
            tenant_id: principal.active_tenant_id,
            permissions,
        })
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    fn has(&self, permission: &Permission) -> bool {
        self.permissions.contains("*") || self.permissions.contains(permission.as_str())
    }

    pub fn can_place_orders(&self) -> bool {
        self.has(&Permission::ORDERS_PLACE)
    }

    /// Advancing an order (NEW → IN_PROGRESS → READY → DONE) is staff work.
    pub fn can_advance_order(&self, order_tenant: TenantId) -> bool {
        order_tenant == self.tenant_id && self.has(&Permission::ORDERS_TRANSITION)
    }

    /// Staff may cancel any order of their tenant; clients only their own.
    pub fn can_cancel_order(&self, order_tenant: TenantId, order_client: UserId) -> bool {
        if order_tenant != self.tenant_id {
            return false;
        }
        self.has(&Permission::ORDERS_TRANSITION)
            || (order_client == self.user_id && self.has(&Permission::ORDERS_CANCEL_OWN))
    }

    /// Same audience as cancellation: the owner or tenant staff.
    pub fn can_modify_order_items(&self, order_tenant: TenantId, order_client: UserId) -> bool {
        self.can_cancel_order(order_tenant, order_client)
    }

    pub fn can_adjust_inventory(&self, tenant_id: TenantId) -> bool {
        tenant_id == self.tenant_id && self.has(&Permission::INVENTORY_ADJUST)
    }

    /// Require a capability, turning `false` into a `Forbidden` error.
    pub fn require(&self, allowed: bool, what: &'static str) -> Result<(), AuthzError> {
        if allowed {
            Ok(())
        } else {
            Err(AuthzError::Forbidden(what.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;

    #[test]
    fn client_cancels_only_own_orders() {
        let tenant = TenantId::new();
        let me = UserId::new();
        let caps = Capabilities::resolve(&Principal::client(me, tenant)).unwrap();

        assert!(caps.can_place_orders());
        assert!(caps.can_cancel_order(tenant, me));
        assert!(!caps.can_cancel_order(tenant, UserId::new()));
        assert!(!caps.can_advance_order(tenant));
    }

    #[test]
    fn employee_drives_orders_of_own_tenant_only() {
        let tenant = TenantId::new();
        let caps = Capabilities::resolve(&Principal::employee(UserId::new(), tenant)).unwrap();

        assert!(caps.can_advance_order(tenant));
        assert!(caps.can_cancel_order(tenant, UserId::new()));
        assert!(!caps.can_advance_order(TenantId::new()));
        assert!(!caps.can_adjust_inventory(tenant));
    }

    #[test]
    fn company_admin_adjusts_inventory() {
        let tenant = TenantId::new();
        let principal = Principal::with_roles(UserId::new(), tenant, vec![Role::COMPANY_ADMIN]);
        let caps = Capabilities::resolve(&principal).unwrap();
        assert!(caps.can_adjust_inventory(tenant));
        assert!(caps.require(caps.can_place_orders(), "orders.place").is_err());
    }
}
