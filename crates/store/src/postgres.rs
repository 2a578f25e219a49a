//! Postgres-backed store implementation.
//!
//! Persists the product catalog, the movement ledger, and assembly orders in
//! PostgreSQL. Commit workflows map onto database transactions; the movement
//! table is append-only apart from the `reversed_by` back-reference column.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate product/edge/order insert |
//! | Database (other) | Any other | `Storage` | Check/foreign-key violations, other database errors |
//! | PoolClosed / RowNotFound / Other | N/A | `Storage` | Network errors, connection failures, etc. |
//!
//! ## Sync Bridge
//!
//! The store traits are synchronous, but Postgres operations require async.
//! Every call resolves the current tokio runtime handle and uses `block_on`,
//! so the store must be used from a context where blocking is permissible.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::instrument;
use uuid::Uuid;

use tallerp_catalog::{
    Assembler, AssemblyWork, BomEdge, Product, ProductKind, RequiredWork, WorkRequirement,
};
use tallerp_core::{
    AggregateRoot, AssemblerId, EventGroupId, ExpectedVersion, MovementId, OrderId, ProductId,
    UserId, WorkId,
};
use tallerp_ledger::{InventoryMovement, MovementKind, NewMovement};
use tallerp_orders::{AssemblyOrder, OrderStatus};

use super::r#trait::{CatalogReader, InventoryStore, StoreError, StoreReader, StoreTx};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    id                  UUID PRIMARY KEY,
    sku                 TEXT NOT NULL UNIQUE,
    name                TEXT NOT NULL,
    kind                TEXT NOT NULL,
    stock               NUMERIC NOT NULL,
    low_stock_threshold NUMERIC NOT NULL
);

CREATE TABLE IF NOT EXISTS bom_edges (
    product_id   UUID NOT NULL REFERENCES products(id),
    component_id UUID NOT NULL REFERENCES products(id),
    quantity     NUMERIC NOT NULL CHECK (quantity > 0),
    PRIMARY KEY (product_id, component_id)
);

CREATE TABLE IF NOT EXISTS assembly_works (
    id         UUID PRIMARY KEY,
    name       TEXT NOT NULL,
    unit_price NUMERIC NOT NULL
);

CREATE TABLE IF NOT EXISTS work_requirements (
    product_id UUID NOT NULL REFERENCES products(id),
    work_id    UUID NOT NULL REFERENCES assembly_works(id),
    quantity   NUMERIC NOT NULL CHECK (quantity > 0),
    PRIMARY KEY (product_id, work_id)
);

CREATE TABLE IF NOT EXISTS assemblers (
    id   UUID PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS inventory_movements (
    id          UUID PRIMARY KEY,
    product_id  UUID NOT NULL REFERENCES products(id),
    kind        TEXT NOT NULL,
    quantity    NUMERIC NOT NULL CHECK (quantity > 0),
    actor       UUID NOT NULL,
    note        TEXT,
    group_id    UUID,
    reverses    UUID,
    reversed_by UUID,
    occurred_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_movements_product ON inventory_movements (product_id, id);
CREATE INDEX IF NOT EXISTS idx_movements_group ON inventory_movements (group_id);

CREATE TABLE IF NOT EXISTS assembly_orders (
    id      UUID PRIMARY KEY,
    status  TEXT NOT NULL,
    version BIGINT NOT NULL,
    body    JSONB NOT NULL
);
"#;

fn runtime_handle() -> Result<Handle, StoreError> {
    Handle::try_current().map_err(|_| {
        StoreError::Storage(
            "PostgresStore requires an async runtime (tokio). Ensure you're calling from within a tokio runtime context."
                .to_string(),
        )
    })
}

fn map_sqlx_error(operation: &str, error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &error {
        if db.code().as_deref() == Some("23505") {
            return StoreError::Conflict(format!("{operation}: {}", db.message()));
        }
    }
    StoreError::Storage(format!("{operation}: {error}"))
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Serialization(format!("column {column}: {e}")))
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    let kind: String = get(row, "kind")?;
    Ok(Product {
        id: ProductId::from(get::<Uuid>(row, "id")?),
        sku: get(row, "sku")?,
        name: get(row, "name")?,
        kind: ProductKind::parse(&kind).map_err(|e| StoreError::Serialization(e.to_string()))?,
        stock: get(row, "stock")?,
        low_stock_threshold: get(row, "low_stock_threshold")?,
    })
}

fn movement_from_row(row: &PgRow) -> Result<InventoryMovement, StoreError> {
    let kind: String = get(row, "kind")?;
    Ok(InventoryMovement {
        id: MovementId::from(get::<Uuid>(row, "id")?),
        product_id: ProductId::from(get::<Uuid>(row, "product_id")?),
        kind: MovementKind::parse(&kind).map_err(|e| StoreError::Serialization(e.to_string()))?,
        quantity: get(row, "quantity")?,
        actor: UserId::from(get::<Uuid>(row, "actor")?),
        note: get(row, "note")?,
        group: get::<Option<Uuid>>(row, "group_id")?.map(EventGroupId::from),
        reverses: get::<Option<Uuid>>(row, "reverses")?.map(MovementId::from),
        reversed_by: get::<Option<Uuid>>(row, "reversed_by")?.map(MovementId::from),
        occurred_at: get(row, "occurred_at")?,
    })
}

fn order_from_row(row: &PgRow) -> Result<AssemblyOrder, StoreError> {
    let body: serde_json::Value = get(row, "body")?;
    serde_json::from_value(body)
        .map_err(|e| StoreError::Serialization(format!("order body: {e}")))
}

async fn fetch_product<'e, E>(executor: E, id: ProductId) -> Result<Option<Product>, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(
        "SELECT id, sku, name, kind, stock, low_stock_threshold FROM products WHERE id = $1",
    )
    .bind(id.as_uuid())
    .fetch_optional(executor)
    .await
    .map_err(|e| map_sqlx_error("fetch_product", e))?;
    row.as_ref().map(product_from_row).transpose()
}

async fn fetch_components<'e, E>(executor: E, id: ProductId) -> Result<Vec<BomEdge>, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query(
        "SELECT product_id, component_id, quantity FROM bom_edges WHERE product_id = $1 ORDER BY component_id",
    )
    .bind(id.as_uuid())
    .fetch_all(executor)
    .await
    .map_err(|e| map_sqlx_error("fetch_components", e))?;

    rows.iter()
        .map(|row| {
            Ok(BomEdge {
                product_id: ProductId::from(get::<Uuid>(row, "product_id")?),
                component_id: ProductId::from(get::<Uuid>(row, "component_id")?),
                quantity: get(row, "quantity")?,
            })
        })
        .collect()
}

async fn fetch_required_work<'e, E>(
    executor: E,
    id: ProductId,
) -> Result<Vec<RequiredWork>, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query(
        r#"
        SELECT w.id, w.name, w.unit_price, r.quantity
        FROM work_requirements r
        JOIN assembly_works w ON w.id = r.work_id
        WHERE r.product_id = $1
        ORDER BY w.id
        "#,
    )
    .bind(id.as_uuid())
    .fetch_all(executor)
    .await
    .map_err(|e| map_sqlx_error("fetch_required_work", e))?;

    rows.iter()
        .map(|row| {
            Ok(RequiredWork {
                work: AssemblyWork {
                    id: WorkId::from(get::<Uuid>(row, "id")?),
                    name: get(row, "name")?,
                    unit_price: get(row, "unit_price")?,
                },
                quantity: get(row, "quantity")?,
            })
        })
        .collect()
}

async fn fetch_assembler<'e, E>(
    executor: E,
    id: AssemblerId,
) -> Result<Option<Assembler>, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let row = sqlx::query("SELECT id, name FROM assemblers WHERE id = $1")
        .bind(id.as_uuid())
        .fetch_optional(executor)
        .await
        .map_err(|e| map_sqlx_error("fetch_assembler", e))?;

    row.map(|row| {
        Ok(Assembler {
            id: AssemblerId::from(get::<Uuid>(&row, "id")?),
            name: get(&row, "name")?,
        })
    })
    .transpose()
}

const MOVEMENT_COLUMNS: &str =
    "id, product_id, kind, quantity, actor, note, group_id, reverses, reversed_by, occurred_at";

async fn fetch_movement<'e, E>(
    executor: E,
    id: MovementId,
) -> Result<Option<InventoryMovement>, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(&format!(
        "SELECT {MOVEMENT_COLUMNS} FROM inventory_movements WHERE id = $1"
    ))
    .bind(id.as_uuid())
    .fetch_optional(executor)
    .await
    .map_err(|e| map_sqlx_error("fetch_movement", e))?;
    row.as_ref().map(movement_from_row).transpose()
}

async fn fetch_movements_in_group<'e, E>(
    executor: E,
    group: EventGroupId,
) -> Result<Vec<InventoryMovement>, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query(&format!(
        "SELECT {MOVEMENT_COLUMNS} FROM inventory_movements WHERE group_id = $1 ORDER BY id"
    ))
    .bind(group.as_uuid())
    .fetch_all(executor)
    .await
    .map_err(|e| map_sqlx_error("fetch_movements_in_group", e))?;
    rows.iter().map(movement_from_row).collect()
}

async fn fetch_movements_for_product<'e, E>(
    executor: E,
    id: ProductId,
) -> Result<Vec<InventoryMovement>, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query(&format!(
        "SELECT {MOVEMENT_COLUMNS} FROM inventory_movements WHERE product_id = $1 ORDER BY id"
    ))
    .bind(id.as_uuid())
    .fetch_all(executor)
    .await
    .map_err(|e| map_sqlx_error("fetch_movements_for_product", e))?;
    rows.iter().map(movement_from_row).collect()
}

async fn fetch_order<'e, E>(executor: E, id: OrderId) -> Result<Option<AssemblyOrder>, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let row = sqlx::query("SELECT body FROM assembly_orders WHERE id = $1")
        .bind(id.as_uuid())
        .fetch_optional(executor)
        .await
        .map_err(|e| map_sqlx_error("fetch_order", e))?;
    row.as_ref().map(order_from_row).transpose()
}

async fn fetch_orders_with_status<'e, E>(
    executor: E,
    status: OrderStatus,
) -> Result<Vec<AssemblyOrder>, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query("SELECT body FROM assembly_orders WHERE status = $1 ORDER BY id")
        .bind(status.as_str())
        .fetch_all(executor)
        .await
        .map_err(|e| map_sqlx_error("fetch_orders_with_status", e))?;
    rows.iter().map(order_from_row).collect()
}

async fn fetch_low_stock<'e, E>(executor: E) -> Result<Vec<Product>, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query(
        "SELECT id, sku, name, kind, stock, low_stock_threshold FROM products WHERE stock < low_stock_threshold ORDER BY sku",
    )
    .fetch_all(executor)
    .await
    .map_err(|e| map_sqlx_error("fetch_low_stock", e))?;
    rows.iter().map(product_from_row).collect()
}

/// Postgres-backed transactional store.
///
/// Uses the SQLx connection pool, which is thread-safe; each transaction holds
/// one pooled connection for its lifetime.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect to the given database URL.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

impl InventoryStore for PostgresStore {
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        let handle = runtime_handle()?;
        let tx = handle
            .block_on(self.pool.begin())
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(Box::new(PostgresTx {
            handle,
            tx: Mutex::new(Some(tx)),
        }))
    }

    fn snapshot(&self) -> Result<Box<dyn StoreReader + '_>, StoreError> {
        let handle = runtime_handle()?;
        Ok(Box::new(PostgresSnapshot {
            pool: Arc::clone(&self.pool),
            handle,
        }))
    }
}

/// Read-only view executing against the pool (latest committed state).
pub struct PostgresSnapshot {
    pool: Arc<PgPool>,
    handle: Handle,
}

impl CatalogReader for PostgresSnapshot {
    fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        self.handle.block_on(fetch_product(&*self.pool, id))
    }

    fn components_of(&self, id: ProductId) -> Result<Vec<BomEdge>, StoreError> {
        self.handle.block_on(fetch_components(&*self.pool, id))
    }

    fn required_work_of(&self, id: ProductId) -> Result<Vec<RequiredWork>, StoreError> {
        self.handle.block_on(fetch_required_work(&*self.pool, id))
    }
}

impl StoreReader for PostgresSnapshot {
    fn assembler(&self, id: AssemblerId) -> Result<Option<Assembler>, StoreError> {
        self.handle.block_on(fetch_assembler(&*self.pool, id))
    }

    fn movement(&self, id: MovementId) -> Result<Option<InventoryMovement>, StoreError> {
        self.handle.block_on(fetch_movement(&*self.pool, id))
    }

    fn movements_in_group(
        &self,
        group: EventGroupId,
    ) -> Result<Vec<InventoryMovement>, StoreError> {
        self.handle
            .block_on(fetch_movements_in_group(&*self.pool, group))
    }

    fn movements_for_product(&self, id: ProductId) -> Result<Vec<InventoryMovement>, StoreError> {
        self.handle
            .block_on(fetch_movements_for_product(&*self.pool, id))
    }

    fn order(&self, id: OrderId) -> Result<Option<AssemblyOrder>, StoreError> {
        self.handle.block_on(fetch_order(&*self.pool, id))
    }

    fn orders_with_status(&self, status: OrderStatus) -> Result<Vec<AssemblyOrder>, StoreError> {
        self.handle
            .block_on(fetch_orders_with_status(&*self.pool, status))
    }

    fn low_stock_products(&self) -> Result<Vec<Product>, StoreError> {
        self.handle.block_on(fetch_low_stock(&*self.pool))
    }
}

/// One database transaction.
///
/// The inner `Mutex` exists only to give the synchronous read traits interior
/// mutability over the sqlx connection; a transaction is not shared between
/// threads.
pub struct PostgresTx {
    handle: Handle,
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl PostgresTx {
    fn with_conn<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&Handle, &mut sqlx::PgConnection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self
            .tx
            .lock()
            .map_err(|_| StoreError::Storage("transaction lock poisoned".to_string()))?;
        let tx = guard.as_mut().ok_or_else(|| {
            StoreError::Storage(format!("{operation}: transaction already completed"))
        })?;
        f(&self.handle, &mut **tx)
    }
}

impl CatalogReader for PostgresTx {
    fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        self.with_conn("product", |handle, conn| {
            handle.block_on(fetch_product(&mut *conn, id))
        })
    }

    fn components_of(&self, id: ProductId) -> Result<Vec<BomEdge>, StoreError> {
        self.with_conn("components_of", |handle, conn| {
            handle.block_on(fetch_components(&mut *conn, id))
        })
    }

    fn required_work_of(&self, id: ProductId) -> Result<Vec<RequiredWork>, StoreError> {
        self.with_conn("required_work_of", |handle, conn| {
            handle.block_on(fetch_required_work(&mut *conn, id))
        })
    }
}

impl StoreReader for PostgresTx {
    fn assembler(&self, id: AssemblerId) -> Result<Option<Assembler>, StoreError> {
        self.with_conn("assembler", |handle, conn| {
            handle.block_on(fetch_assembler(&mut *conn, id))
        })
    }

    fn movement(&self, id: MovementId) -> Result<Option<InventoryMovement>, StoreError> {
        self.with_conn("movement", |handle, conn| {
            handle.block_on(fetch_movement(&mut *conn, id))
        })
    }

    fn movements_in_group(
        &self,
        group: EventGroupId,
    ) -> Result<Vec<InventoryMovement>, StoreError> {
        self.with_conn("movements_in_group", |handle, conn| {
            handle.block_on(fetch_movements_in_group(&mut *conn, group))
        })
    }

    fn movements_for_product(&self, id: ProductId) -> Result<Vec<InventoryMovement>, StoreError> {
        self.with_conn("movements_for_product", |handle, conn| {
            handle.block_on(fetch_movements_for_product(&mut *conn, id))
        })
    }

    fn order(&self, id: OrderId) -> Result<Option<AssemblyOrder>, StoreError> {
        self.with_conn("order", |handle, conn| {
            handle.block_on(fetch_order(&mut *conn, id))
        })
    }

    fn orders_with_status(&self, status: OrderStatus) -> Result<Vec<AssemblyOrder>, StoreError> {
        self.with_conn("orders_with_status", |handle, conn| {
            handle.block_on(fetch_orders_with_status(&mut *conn, status))
        })
    }

    fn low_stock_products(&self) -> Result<Vec<Product>, StoreError> {
        self.with_conn("low_stock_products", |handle, conn| {
            handle.block_on(fetch_low_stock(&mut *conn))
        })
    }
}

impl StoreTx for PostgresTx {
    fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        self.with_conn("insert_product", |handle, conn| {
            handle.block_on(async {
                sqlx::query(
                    r#"
                    INSERT INTO products (id, sku, name, kind, stock, low_stock_threshold)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(product.id.as_uuid())
                .bind(&product.sku)
                .bind(&product.name)
                .bind(product.kind.as_str())
                .bind(product.stock)
                .bind(product.low_stock_threshold)
                .execute(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("insert_product", e))?;
                Ok(())
            })
        })
    }

    fn insert_assembler(&mut self, assembler: &Assembler) -> Result<(), StoreError> {
        self.with_conn("insert_assembler", |handle, conn| {
            handle.block_on(async {
                sqlx::query("INSERT INTO assemblers (id, name) VALUES ($1, $2)")
                    .bind(assembler.id.as_uuid())
                    .bind(&assembler.name)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| map_sqlx_error("insert_assembler", e))?;
                Ok(())
            })
        })
    }

    fn insert_work(&mut self, work: &AssemblyWork) -> Result<(), StoreError> {
        self.with_conn("insert_work", |handle, conn| {
            handle.block_on(async {
                sqlx::query(
                    "INSERT INTO assembly_works (id, name, unit_price) VALUES ($1, $2, $3)",
                )
                .bind(work.id.as_uuid())
                .bind(&work.name)
                .bind(work.unit_price)
                .execute(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("insert_work", e))?;
                Ok(())
            })
        })
    }

    fn insert_component(&mut self, edge: &BomEdge) -> Result<(), StoreError> {
        self.with_conn("insert_component", |handle, conn| {
            handle.block_on(async {
                sqlx::query(
                    "INSERT INTO bom_edges (product_id, component_id, quantity) VALUES ($1, $2, $3)",
                )
                .bind(edge.product_id.as_uuid())
                .bind(edge.component_id.as_uuid())
                .bind(edge.quantity)
                .execute(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("insert_component", e))?;
                Ok(())
            })
        })
    }

    fn insert_work_requirement(
        &mut self,
        requirement: &WorkRequirement,
    ) -> Result<(), StoreError> {
        self.with_conn("insert_work_requirement", |handle, conn| {
            handle.block_on(async {
                sqlx::query(
                    "INSERT INTO work_requirements (product_id, work_id, quantity) VALUES ($1, $2, $3)",
                )
                .bind(requirement.product_id.as_uuid())
                .bind(requirement.work_id.as_uuid())
                .bind(requirement.quantity)
                .execute(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("insert_work_requirement", e))?;
                Ok(())
            })
        })
    }

    fn adjust_stock(
        &mut self,
        product_id: ProductId,
        delta: Decimal,
    ) -> Result<Decimal, StoreError> {
        self.with_conn("adjust_stock", |handle, conn| {
            handle.block_on(async {
                let row = sqlx::query(
                    "UPDATE products SET stock = stock + $2 WHERE id = $1 RETURNING stock",
                )
                .bind(product_id.as_uuid())
                .bind(delta)
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("adjust_stock", e))?;

                let row = row.ok_or_else(|| {
                    StoreError::Storage(format!(
                        "stock adjusted for unknown product {product_id}"
                    ))
                })?;
                get(&row, "stock")
            })
        })
    }

    fn record_movement(
        &mut self,
        movement: NewMovement,
    ) -> Result<InventoryMovement, StoreError> {
        let recorded = InventoryMovement {
            id: MovementId::new(),
            product_id: movement.product_id,
            kind: movement.kind,
            quantity: movement.quantity,
            actor: movement.actor,
            note: movement.note,
            group: movement.group,
            reverses: movement.reverses,
            reversed_by: None,
            occurred_at: Utc::now(),
        };

        self.with_conn("record_movement", |handle, conn| {
            handle.block_on(async {
                sqlx::query(
                    r#"
                    INSERT INTO inventory_movements
                        (id, product_id, kind, quantity, actor, note, group_id, reverses, reversed_by, occurred_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    "#,
                )
                .bind(recorded.id.as_uuid())
                .bind(recorded.product_id.as_uuid())
                .bind(recorded.kind.as_str())
                .bind(recorded.quantity)
                .bind(recorded.actor.as_uuid())
                .bind(&recorded.note)
                .bind(recorded.group.map(|g| *g.as_uuid()))
                .bind(recorded.reverses.map(|m| *m.as_uuid()))
                .bind(Option::<Uuid>::None)
                .bind(recorded.occurred_at)
                .execute(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("record_movement", e))?;
                Ok(())
            })
        })?;

        Ok(recorded)
    }

    fn mark_reversed(
        &mut self,
        original: MovementId,
        reversal: MovementId,
    ) -> Result<(), StoreError> {
        self.with_conn("mark_reversed", |handle, conn| {
            handle.block_on(async {
                let result =
                    sqlx::query("UPDATE inventory_movements SET reversed_by = $2 WHERE id = $1")
                        .bind(original.as_uuid())
                        .bind(reversal.as_uuid())
                        .execute(&mut *conn)
                        .await
                        .map_err(|e| map_sqlx_error("mark_reversed", e))?;

                if result.rows_affected() == 0 {
                    return Err(StoreError::Storage(format!(
                        "mark_reversed on unknown movement {original}"
                    )));
                }
                Ok(())
            })
        })
    }

    fn insert_order(&mut self, order: &AssemblyOrder) -> Result<(), StoreError> {
        let body = serde_json::to_value(order)
            .map_err(|e| StoreError::Serialization(format!("order body: {e}")))?;

        self.with_conn("insert_order", |handle, conn| {
            handle.block_on(async {
                sqlx::query(
                    "INSERT INTO assembly_orders (id, status, version, body) VALUES ($1, $2, $3, $4)",
                )
                .bind(order.id_typed().as_uuid())
                .bind(order.status().as_str())
                .bind(order.version() as i64)
                .bind(&body)
                .execute(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("insert_order", e))?;
                Ok(())
            })
        })
    }

    fn update_order(
        &mut self,
        order: &AssemblyOrder,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_value(order)
            .map_err(|e| StoreError::Serialization(format!("order body: {e}")))?;
        let id = order.id_typed();

        self.with_conn("update_order", |handle, conn| {
            handle.block_on(async {
                let result = match expected {
                    ExpectedVersion::Exact(version) => {
                        sqlx::query(
                            "UPDATE assembly_orders SET status = $2, version = $3, body = $4 WHERE id = $1 AND version = $5",
                        )
                        .bind(id.as_uuid())
                        .bind(order.status().as_str())
                        .bind(order.version() as i64)
                        .bind(&body)
                        .bind(version as i64)
                        .execute(&mut *conn)
                        .await
                    }
                    ExpectedVersion::Any => {
                        sqlx::query(
                            "UPDATE assembly_orders SET status = $2, version = $3, body = $4 WHERE id = $1",
                        )
                        .bind(id.as_uuid())
                        .bind(order.status().as_str())
                        .bind(order.version() as i64)
                        .bind(&body)
                        .execute(&mut *conn)
                        .await
                    }
                }
                .map_err(|e| map_sqlx_error("update_order", e))?;

                if result.rows_affected() == 0 {
                    return Err(StoreError::Concurrency(format!(
                        "order {id}: expected {expected:?}, row not updated"
                    )));
                }
                Ok(())
            })
        })
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut guard = self
            .tx
            .lock()
            .map_err(|_| StoreError::Storage("transaction lock poisoned".to_string()))?;
        let tx = guard
            .take()
            .ok_or_else(|| StoreError::Storage("commit: transaction already completed".to_string()))?;
        self.handle
            .block_on(tx.commit())
            .map_err(|e| map_sqlx_error("commit", e))
    }
}
