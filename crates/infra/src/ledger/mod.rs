//! Inventory ledger: the authoritative store of stock quantities.
//!
//! Every adjustment runs the same steps:
//!
//! 1. lock the affected rows in ascending item-id order,
//! 2. re-read the locked quantities and plan the whole delta set,
//! 3. apply all updates and append one movement per non-zero delta,
//! 4. commit, or roll back everything.
//!
//! Steps 1-2 happen in [`InventoryLedger::begin`]; the returned
//! [`LedgerTransaction`] keeps the rows locked until steps 3-4 in
//! [`LedgerTransaction::commit_with`], which also runs the caller's
//! persistence (order events) inside the same unit of work. Dropping the
//! transaction rolls it back.

use std::marker::PhantomData;

use thiserror::Error;

use mealflow_core::{DomainError, TenantId, UserId};
use mealflow_inventory::{
    InventoryItem, InventoryItemId, InventoryMovement, MovementReason, NewInventoryItem,
    PlannedChange, StockDeltas,
};

pub mod in_memory;
mod locks;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::{InMemoryInventoryLedger, InMemoryLedgerTransaction};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresInventoryLedger, PostgresLedgerTransaction};

/// Ledger operation error.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Deterministic failures: insufficient stock, unknown item, validation.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Row locks could not be acquired in time. Retryable.
    #[error("inventory rows busy: {0}")]
    Busy(String),

    /// An item of another tenant was referenced.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// Backend failure.
    #[error("ledger storage error: {0}")]
    Store(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Busy(_))
    }
}

/// Backend handle shared by everything written in one ledger commit.
///
/// Stores that can join it write through the ledger's own database
/// transaction. In-process stores ignore it and write on their own.
pub struct CommitScope<'a> {
    #[cfg(feature = "postgres")]
    pg: Option<&'a mut sqlx::Transaction<'static, sqlx::Postgres>>,
    _tx: PhantomData<&'a mut ()>,
}

impl<'a> CommitScope<'a> {
    /// A scope with nothing to join.
    pub fn local() -> Self {
        Self {
            #[cfg(feature = "postgres")]
            pg: None,
            _tx: PhantomData,
        }
    }

    #[cfg(feature = "postgres")]
    pub(crate) fn postgres(tx: &'a mut sqlx::Transaction<'static, sqlx::Postgres>) -> Self {
        Self {
            pg: Some(tx),
            _tx: PhantomData,
        }
    }

    /// The open ledger transaction, when the ledger is Postgres-backed.
    #[cfg(feature = "postgres")]
    pub(crate) fn postgres_transaction(
        &mut self,
    ) -> Option<&mut sqlx::Transaction<'static, sqlx::Postgres>> {
        self.pg.as_deref_mut()
    }
}

impl std::fmt::Debug for CommitScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        #[cfg(feature = "postgres")]
        let shared = self.pg.is_some();
        #[cfg(not(feature = "postgres"))]
        let shared = false;
        f.debug_struct("CommitScope").field("shared", &shared).finish()
    }
}

/// An adjustment that holds its row locks until committed or dropped.
pub trait LedgerTransaction {
    /// Planned per-item effects, in ascending item-id order.
    fn changes(&self) -> &[PlannedChange];

    /// Apply the planned changes and run `persist` as one unit of work.
    ///
    /// `persist` runs after the locked quantities are re-verified and before
    /// anything becomes visible. If it fails, no quantity changes and no
    /// movement is written. If the ledger fails, whatever `persist` wrote
    /// through `scope` is rolled back with it.
    fn commit_with<T, E, F>(self, persist: F) -> Result<(T, Vec<InventoryMovement>), E>
    where
        Self: Sized,
        E: From<LedgerError>,
        F: FnOnce(&mut CommitScope<'_>) -> Result<T, E>;

    /// Apply the planned changes and append their movements atomically.
    fn commit(self) -> Result<Vec<InventoryMovement>, LedgerError>
    where
        Self: Sized,
    {
        self.commit_with(|_| Ok::<_, LedgerError>(()))
            .map(|((), movements)| movements)
    }
}

/// Tenant-scoped inventory ledger.
pub trait InventoryLedger: Send + Sync {
    type Transaction<'a>: LedgerTransaction
    where
        Self: 'a;

    /// Lock and validate `deltas`. Fails with `InsufficientStock` if any item
    /// would go negative, `Busy` if the locks are not acquired in time. An
    /// empty delta set yields an empty transaction.
    fn begin(
        &self,
        tenant_id: TenantId,
        deltas: &StockDeltas,
        reason: MovementReason,
        actor: UserId,
    ) -> Result<Self::Transaction<'_>, LedgerError>;

    /// Begin and commit in one step.
    fn adjust(
        &self,
        tenant_id: TenantId,
        deltas: &StockDeltas,
        reason: MovementReason,
        actor: UserId,
    ) -> Result<Vec<InventoryMovement>, LedgerError> {
        self.begin(tenant_id, deltas, reason, actor)?.commit()
    }

    /// Create a stock row. A positive starting quantity is recorded as an
    /// initial-stock movement.
    fn register_item(
        &self,
        input: NewInventoryItem,
        actor: UserId,
    ) -> Result<InventoryItem, LedgerError>;

    fn item(
        &self,
        tenant_id: TenantId,
        item_id: InventoryItemId,
    ) -> Result<Option<InventoryItem>, LedgerError>;

    /// Owning tenant of an item, whoever asks. Used to reject recipes that
    /// reference another tenant's stock.
    fn item_owner(&self, item_id: InventoryItemId) -> Result<Option<TenantId>, LedgerError>;

    fn items(&self, tenant_id: TenantId) -> Result<Vec<InventoryItem>, LedgerError>;

    /// Movements of a tenant, oldest first, optionally for one item.
    fn movements(
        &self,
        tenant_id: TenantId,
        item_id: Option<InventoryItemId>,
    ) -> Result<Vec<InventoryMovement>, LedgerError>;

    fn low_stock(&self, tenant_id: TenantId) -> Result<Vec<InventoryItem>, LedgerError> {
        Ok(self
            .items(tenant_id)?
            .into_iter()
            .filter(InventoryItem::is_low_stock)
            .collect())
    }
}
