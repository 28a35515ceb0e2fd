use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use mealflow_core::{DomainError, TenantId, UserId};
use mealflow_inventory::{
    InventoryItem, InventoryItemId, InventoryMovement, MovementId, MovementReason,
    NewInventoryItem, PlannedChange, StockDeltas, plan_adjustment,
};

use super::locks::{RowGuard, RowLocks};
use super::{CommitScope, InventoryLedger, LedgerError, LedgerTransaction};

#[derive(Debug, Default)]
struct LedgerState {
    items: HashMap<InventoryItemId, InventoryItem>,
    movements: Vec<InventoryMovement>,
}

/// In-memory inventory ledger.
///
/// Intended for tests/dev. Row locks live in a lock table; quantities and
/// movements change together under one write guard, so readers never see a
/// half-applied adjustment.
#[derive(Debug)]
pub struct InMemoryInventoryLedger {
    state: RwLock<LedgerState>,
    locks: RowLocks,
    lock_timeout: Duration,
}

impl Default for InMemoryInventoryLedger {
    fn default() -> Self {
        Self::new(Duration::from_millis(2000))
    }
}

impl InMemoryInventoryLedger {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            locks: RowLocks::default(),
            lock_timeout,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, LedgerState>, LedgerError> {
        self.state
            .read()
            .map_err(|_| LedgerError::Store("ledger lock poisoned".to_string()))
    }

    /// Every delta must name an existing item of `tenant_id`.
    fn check_ownership(&self, tenant_id: TenantId, deltas: &StockDeltas) -> Result<(), LedgerError> {
        let state = self.read()?;
        for item_id in deltas.item_ids() {
            match state.items.get(&item_id) {
                None => return Err(DomainError::not_found().into()),
                Some(item) if item.tenant_id() != tenant_id => {
                    return Err(LedgerError::TenantIsolation(format!(
                        "inventory item {item_id} belongs to another tenant"
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Locked, validated adjustment against [`InMemoryInventoryLedger`].
#[derive(Debug)]
pub struct InMemoryLedgerTransaction<'a> {
    ledger: &'a InMemoryInventoryLedger,
    tenant_id: TenantId,
    changes: Vec<PlannedChange>,
    reason: MovementReason,
    actor: UserId,
    committed: bool,
    _rows: RowGuard<'a>,
}

impl LedgerTransaction for InMemoryLedgerTransaction<'_> {
    fn changes(&self) -> &[PlannedChange] {
        &self.changes
    }

    fn commit_with<T, E, F>(mut self, persist: F) -> Result<(T, Vec<InventoryMovement>), E>
    where
        E: From<LedgerError>,
        F: FnOnce(&mut CommitScope<'_>) -> Result<T, E>,
    {
        if self.changes.is_empty() {
            let value = persist(&mut CommitScope::local())?;
            self.committed = true;
            return Ok((value, vec![]));
        }

        let mut state = self
            .ledger
            .state
            .write()
            .map_err(|_| LedgerError::Store("ledger lock poisoned".to_string()))?;

        // Rows are locked, so nothing may have moved since planning.
        for change in &self.changes {
            let current = state.items.get(&change.item_id).map(InventoryItem::quantity);
            if current != Some(change.before) {
                return Err(LedgerError::Store(format!(
                    "inventory item {} changed while locked",
                    change.item_id
                ))
                .into());
            }
        }

        // Nothing below can fail, so a successful persist is never orphaned.
        let value = persist(&mut CommitScope::local())?;

        let now = Utc::now();
        let mut movements = Vec::with_capacity(self.changes.len());
        for change in &self.changes {
            if let Some(item) = state.items.get_mut(&change.item_id) {
                item.set_planned_quantity(change);
            }
            movements.push(InventoryMovement {
                id: MovementId::generate(),
                tenant_id: self.tenant_id,
                item_id: change.item_id,
                quantity_change: change.delta,
                quantity_after: change.after,
                reason: self.reason.clone(),
                actor: self.actor,
                created_at: now,
            });
        }
        state.movements.extend(movements.iter().cloned());
        drop(state);

        self.committed = true;
        info!(
            tenant_id = %self.tenant_id,
            reason = %self.reason,
            movements = movements.len(),
            "inventory adjusted"
        );
        Ok((value, movements))
    }
}

impl Drop for InMemoryLedgerTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.changes.is_empty() {
            debug!(tenant_id = %self.tenant_id, reason = %self.reason, "ledger transaction rolled back");
        }
    }
}

impl InventoryLedger for InMemoryInventoryLedger {
    type Transaction<'a> = InMemoryLedgerTransaction<'a>;

    fn begin(
        &self,
        tenant_id: TenantId,
        deltas: &StockDeltas,
        reason: MovementReason,
        actor: UserId,
    ) -> Result<Self::Transaction<'_>, LedgerError> {
        self.check_ownership(tenant_id, deltas)?;

        let rows = self
            .locks
            .acquire(tenant_id, &deltas.item_ids(), self.lock_timeout)?;

        let changes = {
            let state = self.read()?;
            plan_adjustment(deltas, |id| state.items.get(id).map(InventoryItem::quantity))
        };
        let changes = match changes {
            Ok(changes) => changes,
            Err(err) => {
                warn!(tenant_id = %tenant_id, reason = %reason, error = %err, "stock adjustment rejected");
                return Err(err.into());
            }
        };

        Ok(InMemoryLedgerTransaction {
            ledger: self,
            tenant_id,
            changes,
            reason,
            actor,
            committed: false,
            _rows: rows,
        })
    }

    fn register_item(
        &self,
        input: NewInventoryItem,
        actor: UserId,
    ) -> Result<InventoryItem, LedgerError> {
        let item = InventoryItem::create(input)?;

        let mut state = self
            .state
            .write()
            .map_err(|_| LedgerError::Store("ledger lock poisoned".to_string()))?;

        if state.items.contains_key(&item.id_typed()) {
            return Err(DomainError::conflict(format!(
                "inventory item {} already exists",
                item.id_typed()
            ))
            .into());
        }
        let duplicate = state.items.values().any(|existing| {
            existing.tenant_id() == item.tenant_id()
                && existing.name().eq_ignore_ascii_case(item.name())
        });
        if duplicate {
            return Err(DomainError::validation(format!(
                "inventory item named '{}' already exists",
                item.name()
            ))
            .into());
        }

        if item.quantity() > Decimal::ZERO {
            state.movements.push(InventoryMovement {
                id: MovementId::generate(),
                tenant_id: item.tenant_id(),
                item_id: item.id_typed(),
                quantity_change: item.quantity(),
                quantity_after: item.quantity(),
                reason: MovementReason::initial_stock(),
                actor,
                created_at: Utc::now(),
            });
        }
        state.items.insert(item.id_typed(), item.clone());

        info!(tenant_id = %item.tenant_id(), item_id = %item.id_typed(), name = item.name(), "inventory item registered");
        Ok(item)
    }

    fn item(
        &self,
        tenant_id: TenantId,
        item_id: InventoryItemId,
    ) -> Result<Option<InventoryItem>, LedgerError> {
        let state = self.read()?;
        Ok(state
            .items
            .get(&item_id)
            .filter(|i| i.tenant_id() == tenant_id)
            .cloned())
    }

    fn item_owner(&self, item_id: InventoryItemId) -> Result<Option<TenantId>, LedgerError> {
        let state = self.read()?;
        Ok(state.items.get(&item_id).map(InventoryItem::tenant_id))
    }

    fn items(&self, tenant_id: TenantId) -> Result<Vec<InventoryItem>, LedgerError> {
        let state = self.read()?;
        let mut items: Vec<_> = state
            .items
            .values()
            .filter(|i| i.tenant_id() == tenant_id)
            .cloned()
            .collect();
        items.sort_by_key(InventoryItem::id_typed);
        Ok(items)
    }

    fn movements(
        &self,
        tenant_id: TenantId,
        item_id: Option<InventoryItemId>,
    ) -> Result<Vec<InventoryMovement>, LedgerError> {
        let state = self.read()?;
        Ok(state
            .movements
            .iter()
            .filter(|m| m.tenant_id == tenant_id && item_id.is_none_or(|id| m.item_id == id))
            .cloned()
            .collect())
    }
}
