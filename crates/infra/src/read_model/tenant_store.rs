use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use mealflow_core::TenantId;

/// Tenant-isolated key/value store.
///
/// Backs carts and order views. Nothing here is part of the audit trail:
/// views are rebuilt from order streams, carts are staging areas.
pub trait TenantStore<K, V>: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V>;
    fn upsert(&self, tenant_id: TenantId, key: K, value: V);
    /// Write `value` only if `replaces` accepts the current entry (`None`
    /// when absent). Check and write are atomic. Returns whether it wrote.
    fn upsert_if(
        &self,
        tenant_id: TenantId,
        key: K,
        value: V,
        replaces: &dyn Fn(Option<&V>) -> bool,
    ) -> bool;
    fn remove(&self, tenant_id: TenantId, key: &K) -> Option<V>;
    fn list(&self, tenant_id: TenantId) -> Vec<V>;
    fn clear_tenant(&self, tenant_id: TenantId);
}

impl<K, V, S> TenantStore<K, V> for Arc<S>
where
    S: TenantStore<K, V> + ?Sized,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        (**self).get(tenant_id, key)
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        (**self).upsert(tenant_id, key, value)
    }

    fn upsert_if(
        &self,
        tenant_id: TenantId,
        key: K,
        value: V,
        replaces: &dyn Fn(Option<&V>) -> bool,
    ) -> bool {
        (**self).upsert_if(tenant_id, key, value, replaces)
    }

    fn remove(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        (**self).remove(tenant_id, key)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        (**self).list(tenant_id)
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        (**self).clear_tenant(tenant_id)
    }
}

/// In-memory tenant-isolated store for tests/dev.
#[derive(Debug)]
pub struct InMemoryTenantStore<K, V> {
    inner: RwLock<HashMap<(TenantId, K), V>>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TenantStore<K, V> for InMemoryTenantStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&(tenant_id, key.clone())).cloned()
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((tenant_id, key), value);
        }
    }

    fn upsert_if(
        &self,
        tenant_id: TenantId,
        key: K,
        value: V,
        replaces: &dyn Fn(Option<&V>) -> bool,
    ) -> bool {
        let Ok(mut map) = self.inner.write() else {
            return false;
        };
        let key = (tenant_id, key);
        if !replaces(map.get(&key)) {
            return false;
        }
        map.insert(key, value);
        true
    }

    fn remove(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        let mut map = self.inner.write().ok()?;
        map.remove(&(tenant_id, key.clone()))
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        let Ok(map) = self.inner.read() else {
            return vec![];
        };
        map.iter()
            .filter(|((t, _), _)| *t == tenant_id)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut map) = self.inner.write() {
            map.retain(|(t, _k), _v| *t != tenant_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_do_not_leak_across_tenants() {
        let store = InMemoryTenantStore::<u32, &'static str>::new();
        let a = TenantId::new();
        let b = TenantId::new();

        store.upsert(a, 1, "cart-a");
        store.upsert(b, 1, "cart-b");

        assert_eq!(store.get(a, &1), Some("cart-a"));
        assert_eq!(store.remove(b, &1), Some("cart-b"));
        assert_eq!(store.get(b, &1), None);
        assert_eq!(store.list(a), vec!["cart-a"]);

        store.clear_tenant(a);
        assert!(store.list(a).is_empty());
    }

    #[test]
    fn upsert_if_keeps_the_newer_entry() {
        let store = InMemoryTenantStore::<u32, u64>::new();
        let tenant = TenantId::new();
        let newer = |version: u64| move |current: Option<&u64>| current.is_none_or(|c| *c < version);

        assert!(store.upsert_if(tenant, 7, 3, &newer(3)));
        assert!(!store.upsert_if(tenant, 7, 2, &newer(2)));
        assert!(!store.upsert_if(tenant, 7, 3, &newer(3)));
        assert_eq!(store.get(tenant, &7), Some(3));

        assert!(store.upsert_if(tenant, 7, 4, &newer(4)));
        assert_eq!(store.get(tenant, &7), Some(4));
    }
}
