//! Row lock table for the in-memory ledger.
//!
//! Locks are exclusive per `(tenant, item)`, taken one by one in ascending
//! item order, and released together when the guard drops. Every caller uses
//! the same order, so waiters cannot form a cycle.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use mealflow_core::TenantId;
use mealflow_inventory::InventoryItemId;

use super::LedgerError;

type RowKey = (TenantId, InventoryItemId);

#[derive(Debug, Default)]
pub(crate) struct RowLocks {
    held: Mutex<HashSet<RowKey>>,
    released: Condvar,
}

/// Held row locks; released on drop.
#[derive(Debug)]
pub(crate) struct RowGuard<'a> {
    locks: &'a RowLocks,
    keys: Vec<RowKey>,
}

impl RowLocks {
    /// Lock `items` (ascending) for `tenant_id`, waiting at most `timeout`
    /// overall.
    pub(crate) fn acquire<'a>(
        &'a self,
        tenant_id: TenantId,
        items: &[InventoryItemId],
        timeout: Duration,
    ) -> Result<RowGuard<'a>, LedgerError> {
        debug_assert!(items.windows(2).all(|w| w[0] < w[1]));

        let deadline = Instant::now() + timeout;
        let mut guard = RowGuard {
            locks: self,
            keys: Vec::with_capacity(items.len()),
        };
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);

        for item in items {
            let key = (tenant_id, *item);
            while held.contains(&key) {
                let now = Instant::now();
                if now >= deadline {
                    drop(held);
                    return Err(LedgerError::Busy(format!(
                        "lock on item {item} not acquired within {} ms",
                        timeout.as_millis()
                    )));
                }
                debug!(tenant_id = %tenant_id, item_id = %item, "waiting for row lock");
                held = self
                    .released
                    .wait_timeout(held, deadline - now)
                    .map(|(g, _)| g)
                    .unwrap_or_else(|e| e.into_inner().0);
            }
            held.insert(key);
            guard.keys.push(key);
        }

        Ok(guard)
    }

    #[cfg(test)]
    fn is_locked(&self, tenant_id: TenantId, item: InventoryItemId) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(tenant_id, item))
    }
}

impl Drop for RowGuard<'_> {
    fn drop(&mut self) {
        if self.keys.is_empty() {
            return;
        }
        let mut held = self.locks.held.lock().unwrap_or_else(PoisonError::into_inner);
        for key in &self.keys {
            held.remove(key);
        }
        drop(held);
        self.locks.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn guard_releases_on_drop() {
        let locks = RowLocks::default();
        let tenant = TenantId::new();
        let item = InventoryItemId::generate();

        let guard = locks.acquire(tenant, &[item], Duration::from_millis(10)).unwrap();
        assert!(locks.is_locked(tenant, item));
        drop(guard);
        assert!(!locks.is_locked(tenant, item));
    }

    #[test]
    fn contended_lock_times_out_as_busy_and_keeps_nothing() {
        let locks = RowLocks::default();
        let tenant = TenantId::new();
        let mut items = vec![InventoryItemId::generate(), InventoryItemId::generate()];
        items.sort();

        let _held = locks.acquire(tenant, &items[1..], Duration::from_millis(10)).unwrap();
        let err = locks
            .acquire(tenant, &items, Duration::from_millis(20))
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!locks.is_locked(tenant, items[0]));
    }

    #[test]
    fn same_item_in_other_tenant_is_independent() {
        let locks = RowLocks::default();
        let item = InventoryItemId::generate();
        let _a = locks.acquire(TenantId::new(), &[item], Duration::from_millis(10)).unwrap();
        assert!(locks.acquire(TenantId::new(), &[item], Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn waiter_proceeds_once_holder_releases() {
        let locks = Arc::new(RowLocks::default());
        let tenant = TenantId::new();
        let item = InventoryItemId::generate();

        let guard = locks.acquire(tenant, &[item], Duration::from_millis(10)).unwrap();
        let waiter = {
            let locks = locks.clone();
            thread::spawn(move || {
                locks
                    .acquire(tenant, &[item], Duration::from_secs(5))
                    .map(|_| ())
                    .is_ok()
            })
        };
        thread::sleep(Duration::from_millis(20));
        drop(guard);
        assert!(waiter.join().unwrap());
    }
}
