//! Postgres-backed inventory ledger.
//!
//! Row locks are real `SELECT … FOR UPDATE` locks taken in ascending id order
//! inside one database transaction. `SET LOCAL lock_timeout` bounds the wait.
//! Schema: `migrations/0001_fulfillment.sql`. Order events join the same
//! transaction through [`CommitScope`], see `event_store::postgres`.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | LedgerError | Scenario |
//! |----------------------|-------------|----------|
//! | `55P03` (lock_not_available) | `Busy` | `lock_timeout` expired |
//! | `40P01` (deadlock_detected) | `Busy` | deadlock victim |
//! | `40001` (serialization_failure) | `Busy` | serialization conflict |
//! | `23505` (unique violation) | `Domain(Validation)` | duplicate item name |
//! | `23514` (check violation) | `Store` | `quantity >= 0` violated (planning bug) |
//! | other | `Store` | network, pool, decoding |
//!
//! ## Runtime
//!
//! The [`InventoryLedger`] trait is synchronous. Calls are driven with
//! `Handle::block_on` on the handle passed to [`PostgresInventoryLedger::new`],
//! so they must not run on a runtime worker thread (use `spawn_blocking`).

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{Span, debug, info, instrument, warn};
use uuid::Uuid;

use mealflow_core::{DomainError, TenantId, UserId};
use mealflow_inventory::{
    InventoryItem, InventoryItemId, InventoryMovement, MovementId, MovementReason,
    NewInventoryItem, PlannedChange, StockDeltas, plan_adjustment,
};

use super::{CommitScope, InventoryLedger, LedgerError, LedgerTransaction};

/// Postgres inventory ledger.
#[derive(Debug, Clone)]
pub struct PostgresInventoryLedger {
    pool: PgPool,
    runtime: Handle,
    lock_timeout: Duration,
}

impl PostgresInventoryLedger {
    pub fn new(pool: PgPool, runtime: Handle, lock_timeout: Duration) -> Self {
        Self {
            pool,
            runtime,
            lock_timeout,
        }
    }

    /// Lock the rows of `deltas` and plan the adjustment.
    #[instrument(
        skip(self, deltas),
        fields(tenant_id = %tenant_id.as_uuid(), item_count = deltas.len()),
        err
    )]
    async fn begin_async(
        &self,
        tenant_id: TenantId,
        deltas: &StockDeltas,
    ) -> Result<(Transaction<'static, Postgres>, Vec<PlannedChange>), LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Transaction-local, same as SET LOCAL.
        let timeout_ms = self.lock_timeout.as_millis().max(1);
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{timeout_ms}ms"))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        let ids: Vec<Uuid> = deltas
            .item_ids()
            .iter()
            .map(|id| *id.as_aggregate_id().as_uuid())
            .collect();

        debug!(tenant_id = %tenant_id, rows = ids.len(), "locking inventory rows");
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, quantity
            FROM inventory_items
            WHERE id = ANY($1)
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_rows", e))?;

        let mut locked = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get("id").map_err(|e| map_sqlx_error("read_id", e))?;
            let owner: Uuid = row
                .try_get("tenant_id")
                .map_err(|e| map_sqlx_error("read_tenant_id", e))?;
            let quantity: Decimal = row
                .try_get("quantity")
                .map_err(|e| map_sqlx_error("read_quantity", e))?;
            if owner != *tenant_id.as_uuid() {
                return Err(LedgerError::TenantIsolation(format!(
                    "inventory item {id} belongs to another tenant"
                )));
            }
            locked.push((id, quantity));
        }

        let changes = plan_adjustment(deltas, |item| {
            let uuid = item.as_aggregate_id();
            locked
                .iter()
                .find(|(id, _)| id == uuid.as_uuid())
                .map(|(_, qty)| *qty)
        });
        match changes {
            Ok(changes) => Ok((tx, changes)),
            Err(err) => {
                warn!(tenant_id = %tenant_id, error = %err, "stock adjustment rejected");
                Err(err.into())
            }
        }
    }

    async fn register_item_async(
        &self,
        item: &InventoryItem,
        actor: UserId,
    ) -> Result<(), LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let existing = sqlx::query(
            r#"
            SELECT 1 FROM inventory_items
            WHERE tenant_id = $1 AND lower(name) = lower($2)
            "#,
        )
        .bind(item.tenant_id().as_uuid())
        .bind(item.name())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("check_name", e))?;
        if existing.is_some() {
            return Err(DomainError::validation(format!(
                "inventory item named '{}' already exists",
                item.name()
            ))
            .into());
        }

        sqlx::query(
            r#"
            INSERT INTO inventory_items (id, tenant_id, name, unit, quantity, min_quantity)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(item.id_typed().as_aggregate_id().as_uuid())
        .bind(item.tenant_id().as_uuid())
        .bind(item.name())
        .bind(item.unit())
        .bind(item.quantity())
        .bind(item.min_quantity())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_item", e))?;

        if item.quantity() > Decimal::ZERO {
            insert_movement(
                &mut tx,
                &InventoryMovement {
                    id: MovementId::generate(),
                    tenant_id: item.tenant_id(),
                    item_id: item.id_typed(),
                    quantity_change: item.quantity(),
                    quantity_after: item.quantity(),
                    reason: MovementReason::initial_stock(),
                    actor,
                    created_at: Utc::now(),
                },
            )
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn load_items(
        &self,
        tenant_id: TenantId,
        item_id: Option<InventoryItemId>,
    ) -> Result<Vec<InventoryItem>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, name, unit, quantity, min_quantity
            FROM inventory_items
            WHERE tenant_id = $1 AND ($2::uuid IS NULL OR id = $2)
            ORDER BY id
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(item_id.map(|id| *id.as_aggregate_id().as_uuid()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_items", e))?;

        rows.iter().map(item_from_row).collect()
    }

    async fn load_movements(
        &self,
        tenant_id: TenantId,
        item_id: Option<InventoryItemId>,
    ) -> Result<Vec<InventoryMovement>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, inventory_item_id, quantity_change, quantity_after,
                   reason, actor, created_at
            FROM inventory_movements
            WHERE tenant_id = $1 AND ($2::uuid IS NULL OR inventory_item_id = $2)
            ORDER BY created_at, id
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(item_id.map(|id| *id.as_aggregate_id().as_uuid()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_movements", e))?;

        rows.iter().map(movement_from_row).collect()
    }
}

/// Locked adjustment against [`PostgresInventoryLedger`].
///
/// Dropping it without `commit` rolls the database transaction back.
pub struct PostgresLedgerTransaction<'a> {
    ledger: &'a PostgresInventoryLedger,
    tx: Option<Transaction<'static, Postgres>>,
    tenant_id: TenantId,
    changes: Vec<PlannedChange>,
    reason: MovementReason,
    actor: UserId,
}

impl std::fmt::Debug for PostgresLedgerTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresLedgerTransaction")
            .field("tenant_id", &self.tenant_id)
            .field("changes", &self.changes)
            .field("reason", &self.reason)
            .field("open", &self.tx.is_some())
            .finish()
    }
}

impl PostgresLedgerTransaction<'_> {
    /// Write the planned quantities and their movements. Nothing is
    /// committed here.
    #[instrument(
        skip(self, tx),
        fields(
            tenant_id = %self.tenant_id.as_uuid(),
            reason = %self.reason,
            changes = self.changes.len(),
            committed_movements = tracing::field::Empty
        ),
        err
    )]
    async fn apply_async(
        &self,
        tx: &mut Transaction<'static, Postgres>,
    ) -> Result<Vec<InventoryMovement>, LedgerError> {
        let now = Utc::now();
        let mut movements = Vec::with_capacity(self.changes.len());

        for change in &self.changes {
            sqlx::query(
                r#"
                UPDATE inventory_items
                SET quantity = $1, updated_at = NOW()
                WHERE id = $2 AND tenant_id = $3
                "#,
            )
            .bind(change.after)
            .bind(change.item_id.as_aggregate_id().as_uuid())
            .bind(self.tenant_id.as_uuid())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("update_quantity", e))?;

            let movement = InventoryMovement {
                id: MovementId::generate(),
                tenant_id: self.tenant_id,
                item_id: change.item_id,
                quantity_change: change.delta,
                quantity_after: change.after,
                reason: self.reason.clone(),
                actor: self.actor,
                created_at: now,
            };
            insert_movement(tx, &movement).await?;
            movements.push(movement);
        }

        Span::current().record("committed_movements", movements.len());
        Ok(movements)
    }
}

impl LedgerTransaction for PostgresLedgerTransaction<'_> {
    fn changes(&self) -> &[PlannedChange] {
        &self.changes
    }

    fn commit_with<T, E, F>(mut self, persist: F) -> Result<(T, Vec<InventoryMovement>), E>
    where
        E: From<LedgerError>,
        F: FnOnce(&mut CommitScope<'_>) -> Result<T, E>,
    {
        let Some(mut tx) = self.tx.take() else {
            let value = persist(&mut CommitScope::local())?;
            return Ok((value, vec![]));
        };

        // Any early return drops `tx`, which rolls back movements and
        // whatever `persist` wrote through the scope.
        let movements = self.ledger.runtime.block_on(self.apply_async(&mut tx))?;
        let value = persist(&mut CommitScope::postgres(&mut tx))?;
        self.ledger
            .runtime
            .block_on(tx.commit())
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        info!(
            tenant_id = %self.tenant_id,
            reason = %self.reason,
            movements = movements.len(),
            "inventory adjusted"
        );
        Ok((value, movements))
    }
}

impl Drop for PostgresLedgerTransaction<'_> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            debug!(tenant_id = %self.tenant_id, reason = %self.reason, "ledger transaction rolled back");
        }
    }
}

impl InventoryLedger for PostgresInventoryLedger {
    type Transaction<'a> = PostgresLedgerTransaction<'a>;

    fn begin(
        &self,
        tenant_id: TenantId,
        deltas: &StockDeltas,
        reason: MovementReason,
        actor: UserId,
    ) -> Result<Self::Transaction<'_>, LedgerError> {
        if deltas.is_empty() {
            return Ok(PostgresLedgerTransaction {
                ledger: self,
                tx: None,
                tenant_id,
                changes: vec![],
                reason,
                actor,
            });
        }

        let (tx, changes) = self.runtime.block_on(self.begin_async(tenant_id, deltas))?;
        Ok(PostgresLedgerTransaction {
            ledger: self,
            tx: Some(tx),
            tenant_id,
            changes,
            reason,
            actor,
        })
    }

    fn register_item(
        &self,
        input: NewInventoryItem,
        actor: UserId,
    ) -> Result<InventoryItem, LedgerError> {
        let item = InventoryItem::create(input)?;
        self.runtime.block_on(self.register_item_async(&item, actor))?;
        info!(tenant_id = %item.tenant_id(), item_id = %item.id_typed(), name = item.name(), "inventory item registered");
        Ok(item)
    }

    fn item(
        &self,
        tenant_id: TenantId,
        item_id: InventoryItemId,
    ) -> Result<Option<InventoryItem>, LedgerError> {
        Ok(self
            .runtime
            .block_on(self.load_items(tenant_id, Some(item_id)))?
            .into_iter()
            .next())
    }

    fn item_owner(&self, item_id: InventoryItemId) -> Result<Option<TenantId>, LedgerError> {
        let owner: Option<Uuid> = self
            .runtime
            .block_on(
                sqlx::query_scalar("SELECT tenant_id FROM inventory_items WHERE id = $1")
                    .bind(item_id.as_aggregate_id().as_uuid())
                    .fetch_optional(&self.pool),
            )
            .map_err(|e| map_sqlx_error("item_owner", e))?;
        Ok(owner.map(TenantId::from_uuid))
    }

    fn items(&self, tenant_id: TenantId) -> Result<Vec<InventoryItem>, LedgerError> {
        self.runtime.block_on(self.load_items(tenant_id, None))
    }

    fn movements(
        &self,
        tenant_id: TenantId,
        item_id: Option<InventoryItemId>,
    ) -> Result<Vec<InventoryMovement>, LedgerError> {
        self.runtime.block_on(self.load_movements(tenant_id, item_id))
    }
}

async fn insert_movement(
    tx: &mut Transaction<'static, Postgres>,
    movement: &InventoryMovement,
) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        INSERT INTO inventory_movements (
            id, tenant_id, inventory_item_id, quantity_change, quantity_after,
            reason, actor, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(movement.id.as_aggregate_id().as_uuid())
    .bind(movement.tenant_id.as_uuid())
    .bind(movement.item_id.as_aggregate_id().as_uuid())
    .bind(movement.quantity_change)
    .bind(movement.quantity_after)
    .bind(movement.reason.as_str())
    .bind(movement.actor.as_uuid())
    .bind(movement.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_movement", e))?;
    Ok(())
}

fn item_from_row(row: &sqlx::postgres::PgRow) -> Result<InventoryItem, LedgerError> {
    let read = |e| map_sqlx_error("read_item_row", e);
    let input = NewInventoryItem {
        item_id: InventoryItemId::new(mealflow_core::AggregateId::from_uuid(
            row.try_get("id").map_err(read)?,
        )),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(read)?),
        name: row.try_get("name").map_err(read)?,
        unit: row.try_get("unit").map_err(read)?,
        initial_quantity: row.try_get("quantity").map_err(read)?,
        min_quantity: row.try_get("min_quantity").map_err(read)?,
    };
    InventoryItem::create(input)
        .map_err(|e| LedgerError::Store(format!("invalid inventory row: {e}")))
}

fn movement_from_row(row: &sqlx::postgres::PgRow) -> Result<InventoryMovement, LedgerError> {
    let read = |e| map_sqlx_error("read_movement_row", e);
    let reason: String = row.try_get("reason").map_err(read)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(read)?;
    Ok(InventoryMovement {
        id: MovementId::new(mealflow_core::AggregateId::from_uuid(
            row.try_get("id").map_err(read)?,
        )),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(read)?),
        item_id: InventoryItemId::new(mealflow_core::AggregateId::from_uuid(
            row.try_get("inventory_item_id").map_err(read)?,
        )),
        quantity_change: row.try_get("quantity_change").map_err(read)?,
        quantity_after: row.try_get("quantity_after").map_err(read)?,
        reason: MovementReason::new(reason),
        actor: UserId::from_uuid(row.try_get("actor").map_err(read)?),
        created_at,
    })
}

/// Map SQLx errors to LedgerError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("55P03") | Some("40P01") | Some("40001") => LedgerError::Busy(msg),
                Some("23505") => DomainError::validation(msg).into(),
                _ => LedgerError::Store(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            LedgerError::Busy(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            LedgerError::Store(format!("connection pool closed in {operation}"))
        }
        _ => LedgerError::Store(format!("sqlx error in {operation}: {err}")),
    }
}
