//! Postgres order projection over `orders` and `order_items`.
//!
//! Rows are derived from order streams and rewritten whole on every refresh.
//! `upsert_if` reads the current row `FOR UPDATE`, so a refresh that lost a
//! race never overwrites a newer revision. Storage failures are logged and
//! read as "absent" or "not written"; the event stream stays authoritative
//! and the next commit of the order rewrites its rows.

use std::future::Future;

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};
use tokio::runtime::Handle;
use tracing::warn;
use uuid::Uuid;

use mealflow_core::{AggregateId, TenantId, UserId};
use mealflow_menu::ProductId;
use mealflow_orders::{OrderId, OrderStatus, OrderType};

use super::orders::{OrderLineView, OrderView};
use super::tenant_store::TenantStore;

const SELECT_ORDERS: &str = r#"
    SELECT id, tenant_id, client_id, number, status, order_type, notes,
           total_amount, created_at, completed_at, last_modified_at, version
    FROM orders
    WHERE tenant_id = $1 AND ($2::uuid IS NULL OR id = $2)
    ORDER BY number
"#;

const SELECT_ORDER_FOR_UPDATE: &str = r#"
    SELECT id, tenant_id, client_id, number, status, order_type, notes,
           total_amount, created_at, completed_at, last_modified_at, version
    FROM orders
    WHERE tenant_id = $1 AND id = $2
    FOR UPDATE
"#;

/// Order views persisted in Postgres.
#[derive(Debug, Clone)]
pub struct PostgresOrderViews {
    pool: PgPool,
    runtime: Handle,
}

impl PostgresOrderViews {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self { pool, runtime }
    }

    fn run<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, sqlx::Error>>,
    ) -> Option<T> {
        match self.runtime.block_on(fut) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(operation, error = %err, "order view store failed");
                None
            }
        }
    }

    async fn load(
        &self,
        tenant_id: TenantId,
        order_id: Option<OrderId>,
    ) -> Result<Vec<OrderView>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        load_views(&mut conn, SELECT_ORDERS, tenant_id, order_id).await
    }

    /// Rewrite the rows of `view`; with `replaces`, only if it accepts the
    /// locked current view.
    async fn write(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        view: OrderView,
        replaces: Option<&dyn Fn(Option<&OrderView>) -> bool>,
    ) -> Result<bool, sqlx::Error> {
        let order_uuid = *order_id.as_aggregate_id().as_uuid();
        let mut tx = self.pool.begin().await?;

        if let Some(replaces) = replaces {
            let current =
                load_views(&mut tx, SELECT_ORDER_FOR_UPDATE, tenant_id, Some(order_id)).await?;
            if !replaces(current.first()) {
                return Ok(false);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, tenant_id, client_id, number, status, order_type, notes,
                total_amount, created_at, completed_at, last_modified_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                notes = EXCLUDED.notes,
                total_amount = EXCLUDED.total_amount,
                completed_at = EXCLUDED.completed_at,
                last_modified_at = EXCLUDED.last_modified_at,
                version = EXCLUDED.version
            WHERE orders.tenant_id = EXCLUDED.tenant_id
            "#,
        )
        .bind(order_uuid)
        .bind(tenant_id.as_uuid())
        .bind(view.client_id.as_uuid())
        .bind(to_i64(view.number)?)
        .bind(view.status.as_str())
        .bind(view.order_type.as_str())
        .bind(&view.notes)
        .bind(to_i64(view.total_amount)?)
        .bind(view.created_at)
        .bind(view.completed_at)
        .bind(view.last_modified_at)
        .bind(to_i64(view.version)?)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM order_items WHERE tenant_id = $1 AND order_id = $2")
            .bind(tenant_id.as_uuid())
            .bind(order_uuid)
            .execute(&mut *tx)
            .await?;

        for (position, line) in view.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (
                    tenant_id, order_id, position, product_id, quantity, unit_price, line_total
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(order_uuid)
            .bind(to_i64(position as u64)?)
            .bind(*line.product_id.as_aggregate_id().as_uuid())
            .bind(to_i64(line.quantity)?)
            .bind(to_i64(line.unit_price)?)
            .bind(to_i64(line.line_total)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn delete(
        &self,
        tenant_id: TenantId,
        order_id: Option<OrderId>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM orders WHERE tenant_id = $1 AND ($2::uuid IS NULL OR id = $2)")
            .bind(tenant_id.as_uuid())
            .bind(order_id.map(|id| *id.as_aggregate_id().as_uuid()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl TenantStore<OrderId, OrderView> for PostgresOrderViews {
    fn get(&self, tenant_id: TenantId, key: &OrderId) -> Option<OrderView> {
        self.run("get", self.load(tenant_id, Some(*key)))?
            .into_iter()
            .next()
    }

    fn upsert(&self, tenant_id: TenantId, key: OrderId, value: OrderView) {
        self.run("upsert", self.write(tenant_id, key, value, None));
    }

    fn upsert_if(
        &self,
        tenant_id: TenantId,
        key: OrderId,
        value: OrderView,
        replaces: &dyn Fn(Option<&OrderView>) -> bool,
    ) -> bool {
        self.run("upsert_if", self.write(tenant_id, key, value, Some(replaces)))
            .unwrap_or(false)
    }

    fn remove(&self, tenant_id: TenantId, key: &OrderId) -> Option<OrderView> {
        let existing = self.get(tenant_id, key)?;
        self.run("remove", self.delete(tenant_id, Some(*key)))?;
        Some(existing)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<OrderView> {
        self.run("list", self.load(tenant_id, None)).unwrap_or_default()
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        self.run("clear_tenant", self.delete(tenant_id, None));
    }
}

async fn load_views(
    conn: &mut PgConnection,
    select: &str,
    tenant_id: TenantId,
    order_id: Option<OrderId>,
) -> Result<Vec<OrderView>, sqlx::Error> {
    let order_uuid = order_id.map(|id| *id.as_aggregate_id().as_uuid());
    let rows = sqlx::query(select)
        .bind(tenant_id.as_uuid())
        .bind(order_uuid)
        .fetch_all(&mut *conn)
        .await?;
    let mut views = rows
        .iter()
        .map(view_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    if views.is_empty() {
        return Ok(views);
    }

    let lines = sqlx::query(
        r#"
        SELECT order_id, product_id, quantity, unit_price, line_total
        FROM order_items
        WHERE tenant_id = $1 AND ($2::uuid IS NULL OR order_id = $2)
        ORDER BY order_id, position
        "#,
    )
    .bind(tenant_id.as_uuid())
    .bind(order_uuid)
    .fetch_all(&mut *conn)
    .await?;

    for row in &lines {
        let order: Uuid = row.try_get("order_id")?;
        let line = OrderLineView {
            product_id: ProductId::new(AggregateId::from_uuid(row.try_get("product_id")?)),
            quantity: to_u64(row.try_get("quantity")?)?,
            unit_price: to_u64(row.try_get("unit_price")?)?,
            line_total: to_u64(row.try_get("line_total")?)?,
        };
        if let Some(view) = views
            .iter_mut()
            .find(|v| *v.order_id.as_aggregate_id().as_uuid() == order)
        {
            view.lines.push(line);
        }
    }
    Ok(views)
}

fn view_from_row(row: &sqlx::postgres::PgRow) -> Result<OrderView, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let order_type: String = row.try_get("order_type")?;
    let created_at: Option<DateTime<Utc>> = row.try_get("created_at")?;
    let completed_at: Option<DateTime<Utc>> = row.try_get("completed_at")?;
    let last_modified_at: Option<DateTime<Utc>> = row.try_get("last_modified_at")?;

    Ok(OrderView {
        order_id: OrderId::new(AggregateId::from_uuid(row.try_get("id")?)),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        client_id: UserId::from_uuid(row.try_get("client_id")?),
        number: to_u64(row.try_get("number")?)?,
        status: status
            .parse::<OrderStatus>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        order_type: order_type
            .parse::<OrderType>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        notes: row.try_get("notes")?,
        lines: vec![],
        total_amount: to_u64(row.try_get("total_amount")?)?,
        created_at,
        completed_at,
        last_modified_at,
        version: to_u64(row.try_get("version")?)?,
    })
}

fn to_i64(value: u64) -> Result<i64, sqlx::Error> {
    i64::try_from(value).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

fn to_u64(value: i64) -> Result<u64, sqlx::Error> {
    u64::try_from(value).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}
