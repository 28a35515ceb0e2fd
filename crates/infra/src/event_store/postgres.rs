//! Postgres-backed event store.
//!
//! Streams live in the `events` table (`migrations/0001_fulfillment.sql`),
//! keyed by `(tenant_id, aggregate_id, sequence_number)`. Every query filters
//! on `tenant_id`.
//!
//! ## Joining the ledger
//!
//! [`EventStore::append_in`] writes through the transaction carried by a
//! Postgres [`CommitScope`], so order events and the stock movements they
//! caused commit or roll back together. Without a shared transaction the
//! store opens its own.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | EventStoreError | Scenario |
//! |----------------------|-----------------|----------|
//! | `23505` (unique violation) | `Concurrency` | another writer took the sequence number |
//! | `23514` (check violation) | `InvalidAppend` | `sequence_number <= 0` |
//! | other | `InvalidAppend` | network, pool, decoding |
//!
//! ## Runtime
//!
//! Same as the Postgres ledger: calls block on the handle passed to
//! [`PostgresEventStore::new`] and must not run on a runtime worker thread.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{Span, instrument};
use uuid::Uuid;

use mealflow_core::{AggregateId, ExpectedVersion, TenantId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
use crate::ledger::CommitScope;

/// Postgres append-only event store.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    runtime: Handle,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self { pool, runtime }
    }

    #[instrument(
        skip(self),
        fields(
            tenant_id = %tenant_id.as_uuid(),
            aggregate_id = %aggregate_id.as_uuid(),
            event_count = tracing::field::Empty
        ),
        err
    )]
    async fn load_stream_async(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                tenant_id,
                aggregate_id,
                aggregate_type,
                sequence_number,
                event_type,
                event_version,
                occurred_at,
                payload
            FROM events
            WHERE tenant_id = $1 AND aggregate_id = $2
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(aggregate_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        let events = rows
            .iter()
            .map(stored_event_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Span::current().record("event_count", events.len());
        Ok(events)
    }

    async fn append_async(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let stored = append_on(&mut tx, events, expected_version).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(stored)
    }
}

impl EventStore for PostgresEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }
        self.runtime.block_on(self.append_async(events, expected_version))
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.runtime
            .block_on(self.load_stream_async(tenant_id, aggregate_id))
    }

    fn append_in(
        &self,
        scope: &mut CommitScope<'_>,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }
        match scope.postgres_transaction() {
            Some(tx) => self
                .runtime
                .block_on(append_on(tx, events, expected_version)),
            None => self.append(events, expected_version),
        }
    }
}

/// Version-checked insert of one batch on an open transaction. The caller
/// commits.
#[instrument(
    skip(tx, events),
    fields(
        event_count = events.len(),
        expected_version = ?expected_version,
        committed_events = tracing::field::Empty
    ),
    err
)]
async fn append_on(
    tx: &mut Transaction<'static, Postgres>,
    events: Vec<UncommittedEvent>,
    expected_version: ExpectedVersion,
) -> Result<Vec<StoredEvent>, EventStoreError> {
    let Some(first) = events.first() else {
        return Ok(vec![]);
    };
    let tenant_id = first.tenant_id;
    let aggregate_id = first.aggregate_id;
    let aggregate_type = first.aggregate_type.clone();

    for (idx, e) in events.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(EventStoreError::TenantIsolation(format!(
                "batch contains multiple tenant_ids (index {idx})"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch contains multiple aggregate_ids (index {idx})"
            )));
        }
        if e.aggregate_type != aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "batch contains multiple aggregate_types (index {idx})"
            )));
        }
    }

    let (current_version, existing_type) =
        check_stream_version(tx, tenant_id, aggregate_id).await?;
    if let Some(existing) = existing_type {
        if existing != aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "stream aggregate_type is '{existing}', attempted append with '{aggregate_type}'"
            )));
        }
    }
    if !expected_version.matches(current_version) {
        return Err(EventStoreError::Concurrency(format!(
            "expected {expected_version:?}, found {current_version}"
        )));
    }

    let mut stored_events = Vec::with_capacity(events.len());
    let mut next_sequence = current_version + 1;
    for event in events {
        sqlx::query(
            r#"
            INSERT INTO events (
                event_id,
                tenant_id,
                aggregate_id,
                aggregate_type,
                sequence_number,
                event_type,
                event_version,
                occurred_at,
                payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.event_id)
        .bind(tenant_id.as_uuid())
        .bind(aggregate_id.as_uuid())
        .bind(&aggregate_type)
        .bind(next_sequence as i64)
        .bind(&event.event_type)
        .bind(event.event_version as i32)
        .bind(event.occurred_at)
        .bind(&event.payload)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_event", e))?;

        stored_events.push(StoredEvent {
            event_id: event.event_id,
            tenant_id: event.tenant_id,
            aggregate_id: event.aggregate_id,
            aggregate_type: event.aggregate_type,
            sequence_number: next_sequence,
            event_type: event.event_type,
            event_version: event.event_version,
            occurred_at: event.occurred_at,
            payload: event.payload,
        });
        next_sequence += 1;
    }

    Span::current().record("committed_events", stored_events.len());
    Ok(stored_events)
}

/// `(current_version, aggregate_type)`; `(0, None)` for a new stream.
async fn check_stream_version(
    tx: &mut Transaction<'static, Postgres>,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
) -> Result<(u64, Option<String>), EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(MAX(sequence_number), 0) AS current_version,
            MAX(aggregate_type) AS aggregate_type
        FROM events
        WHERE tenant_id = $1 AND aggregate_id = $2
        "#,
    )
    .bind(tenant_id.as_uuid())
    .bind(aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_stream_version", e))?;

    let current: i64 = row
        .try_get("current_version")
        .map_err(|e| map_sqlx_error("read_current_version", e))?;
    let aggregate_type: Option<String> = row
        .try_get("aggregate_type")
        .map_err(|e| map_sqlx_error("read_aggregate_type", e))?;
    Ok((current.max(0) as u64, aggregate_type))
}

fn stored_event_from_row(row: &sqlx::postgres::PgRow) -> Result<StoredEvent, EventStoreError> {
    let read = |e| map_sqlx_error("read_event_row", e);
    let sequence_number: i64 = row.try_get("sequence_number").map_err(read)?;
    let event_version: i32 = row.try_get("event_version").map_err(read)?;
    let occurred_at: DateTime<Utc> = row.try_get("occurred_at").map_err(read)?;
    let payload: JsonValue = row.try_get("payload").map_err(read)?;
    let tenant: Uuid = row.try_get("tenant_id").map_err(read)?;
    let aggregate: Uuid = row.try_get("aggregate_id").map_err(read)?;

    Ok(StoredEvent {
        event_id: row.try_get("event_id").map_err(read)?,
        tenant_id: TenantId::from_uuid(tenant),
        aggregate_id: AggregateId::from_uuid(aggregate),
        aggregate_type: row.try_get("aggregate_type").map_err(read)?,
        sequence_number: u64::try_from(sequence_number).map_err(|_| {
            EventStoreError::InvalidAppend(format!("negative sequence_number {sequence_number}"))
        })?,
        event_type: row.try_get("event_type").map_err(read)?,
        event_version: u32::try_from(event_version).map_err(|_| {
            EventStoreError::InvalidAppend(format!("negative event_version {event_version}"))
        })?,
        occurred_at,
        payload,
    })
}

/// Map SQLx errors to EventStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => EventStoreError::Concurrency(msg),
                _ => EventStoreError::InvalidAppend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::InvalidAppend(format!("connection pool closed in {operation}"))
        }
        _ => EventStoreError::InvalidAppend(format!("sqlx error in {operation}: {err}")),
    }
}
