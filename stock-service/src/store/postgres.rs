use super::{CommitOutcome, CommitPlan, MovementCheck, StockStore};
use crate::error::{LedgerError, LedgerResult};
use crate::model::{Contact, Order, OrderItem, StockChange, StockRecord};
use crate::reservation::{apply_contact_patch, consume_all, items_from_map, merge_items, stock_movements, ItemMap};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

pub(crate) const STOCK_COLUMNS: &str = "company_id, product_id, name, qty_available, low_threshold, updated_at";
pub(crate) const ORDER_COLUMNS: &str = "company_id, order_id, company_name, email, region, items, created_at, updated_at";

/// Conditional decrement/increment: the row only changes when the result stays non-negative.
pub(crate) const APPLY_MOVEMENT_SQL: &str =
    "UPDATE stock_records SET qty_available = qty_available + $1, updated_at = $4 \
     WHERE company_id = $2 AND product_id = $3 AND qty_available + $1 >= 0 \
     RETURNING company_id, product_id, name, qty_available, low_threshold, updated_at";

/// Serialises writers of one (company, product) key even while no row exists yet.
pub(crate) const LOCK_STOCK_KEY_SQL: &str = "SELECT pg_advisory_xact_lock(hashtext($1), hashtext($2))";

const CURRENT_QTY_SQL: &str =
    "SELECT qty_available FROM stock_records WHERE company_id = $1 AND product_id = $2";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub fn pool(&self) -> &PgPool { &self.pool }
}

/// Serialization failures and deadlocks are contention, not storage faults.
pub(crate) fn storage_error(err: sqlx::Error) -> LedgerError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some("40001") | Some("40P01") => return LedgerError::Conflict(db.message().to_string()),
            Some("23505") => return LedgerError::Conflict(format!("duplicate key: {}", db.message())),
            Some("22003") => return LedgerError::validation("quantity_overflow", "quantity out of range"),
            _ => {}
        }
    }
    LedgerError::Storage(err.to_string())
}

fn stock_from_row(row: &PgRow) -> Result<StockRecord, sqlx::Error> {
    Ok(StockRecord {
        company_id: row.try_get("company_id")?,
        product_id: row.try_get("product_id")?,
        name: row.try_get("name")?,
        qty_available: row.try_get("qty_available")?,
        low_threshold: row.try_get("low_threshold")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn order_from_row(row: &PgRow) -> Result<Order, sqlx::Error> {
    let Json(items): Json<Vec<OrderItem>> = row.try_get("items")?;
    Ok(Order {
        company_id: row.try_get("company_id")?,
        order_id: row.try_get("order_id")?,
        contact: Contact {
            company_name: row.try_get("company_name")?,
            email: row.try_get("email")?,
            region: row.try_get("region")?,
        },
        items,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn lock_order(
    tx: &mut Transaction<'_, Postgres>,
    company_id: &str,
    order_id: Uuid,
) -> LedgerResult<Order> {
    let row = sqlx::query(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE company_id = $1 AND order_id = $2 FOR UPDATE"
    ))
    .bind(company_id)
    .bind(order_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(storage_error)?;
    match row {
        Some(row) => order_from_row(&row).map_err(storage_error),
        None => Err(LedgerError::order_not_found(company_id, order_id)),
    }
}

/// Apply every movement inside `tx`. Products are visited in key order so concurrent commits
/// lock rows in the same sequence. Any shortage or missing record fails the whole call; the
/// caller drops the transaction, rolling back rows already updated.
async fn apply_movements(
    tx: &mut Transaction<'_, Postgres>,
    company_id: &str,
    movements: &ItemMap,
    now: DateTime<Utc>,
) -> LedgerResult<(Vec<StockChange>, Vec<StockRecord>)> {
    let mut changes = Vec::with_capacity(movements.len());
    let mut records = Vec::with_capacity(movements.len());
    let mut check = MovementCheck::default();
    for (product_id, delta) in movements {
        let updated = sqlx::query(APPLY_MOVEMENT_SQL)
            .bind(delta)
            .bind(company_id)
            .bind(product_id)
            .bind(now)
            .fetch_optional(&mut **tx)
            .await
            .map_err(storage_error)?;
        match updated {
            Some(row) => {
                let record = stock_from_row(&row).map_err(storage_error)?;
                changes.push(StockChange {
                    product_id: product_id.clone(),
                    name: record.name.clone(),
                    before: record.qty_available - delta,
                    after: record.qty_available,
                    low_threshold: record.low_threshold,
                });
                records.push(record);
            }
            None => {
                let current: Option<i64> = sqlx::query_scalar(CURRENT_QTY_SQL)
                    .bind(company_id)
                    .bind(product_id)
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(storage_error)?;
                match current {
                    Some(available) => check.short(product_id, *delta, available),
                    None => check.missing(product_id),
                }
            }
        }
    }
    check.into_result(company_id)?;
    Ok((changes, records))
}

async fn insert_order(tx: &mut Transaction<'_, Postgres>, order: &Order) -> LedgerResult<()> {
    sqlx::query(&format!(
        "INSERT INTO orders ({ORDER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
    ))
    .bind(&order.company_id)
    .bind(order.order_id)
    .bind(&order.contact.company_name)
    .bind(&order.contact.email)
    .bind(&order.contact.region)
    .bind(Json(&order.items))
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(storage_error)?;
    Ok(())
}

#[async_trait]
impl StockStore for PgStore {
    async fn put_stock(&self, record: StockRecord) -> LedgerResult<Option<StockRecord>> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        sqlx::query(LOCK_STOCK_KEY_SQL)
            .bind(&record.company_id)
            .bind(&record.product_id)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        let previous = sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_records WHERE company_id = $1 AND product_id = $2 FOR UPDATE"
        ))
        .bind(&record.company_id)
        .bind(&record.product_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_error)?
        .map(|row| stock_from_row(&row))
        .transpose()
        .map_err(storage_error)?;

        sqlx::query(&format!(
            "INSERT INTO stock_records ({STOCK_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (company_id, product_id) DO UPDATE SET name = EXCLUDED.name, \
             qty_available = EXCLUDED.qty_available, low_threshold = EXCLUDED.low_threshold, \
             updated_at = EXCLUDED.updated_at"
        ))
        .bind(&record.company_id)
        .bind(&record.product_id)
        .bind(&record.name)
        .bind(record.qty_available)
        .bind(record.low_threshold)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        tx.commit().await.map_err(storage_error)?;
        Ok(previous)
    }

    async fn get_stock(&self, company_id: &str, product_id: &str) -> LedgerResult<Option<StockRecord>> {
        sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_records WHERE company_id = $1 AND product_id = $2"
        ))
        .bind(company_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?
        .map(|row| stock_from_row(&row))
        .transpose()
        .map_err(storage_error)
    }

    async fn list_stock(&self, company_id: &str) -> LedgerResult<Vec<StockRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_records WHERE company_id = $1 ORDER BY product_id"
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        rows.iter().map(stock_from_row).collect::<Result<_, _>>().map_err(storage_error)
    }

    async fn commit(&self, company_id: &str, plan: CommitPlan) -> LedgerResult<CommitOutcome> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let now = Utc::now();

        let outcome = match plan {
            CommitPlan::Reserve { items } => {
                let (changes, records) = apply_movements(&mut tx, company_id, &consume_all(&items), now).await?;
                CommitOutcome { order: None, changes, records }
            }
            CommitPlan::Adjust { product_id, delta } => {
                let movements = ItemMap::from([(product_id, delta)]);
                let (changes, records) = apply_movements(&mut tx, company_id, &movements, now).await?;
                CommitOutcome { order: None, changes, records }
            }
            CommitPlan::CreateOrder(order) => {
                let movements = consume_all(&merge_items(&order.items));
                let (changes, records) = apply_movements(&mut tx, company_id, &movements, now).await?;
                insert_order(&mut tx, &order).await?;
                CommitOutcome { order: Some(order), changes, records }
            }
            CommitPlan::ReplaceOrder { order_id, items, contact, updated_at } => {
                let mut order = lock_order(&mut tx, company_id, order_id).await?;
                order.contact = apply_contact_patch(&order.contact, &contact)?;
                let movements = stock_movements(&merge_items(&order.items), &items);
                let (changes, records) = apply_movements(&mut tx, company_id, &movements, now).await?;
                order.items = items_from_map(&items);
                order.updated_at = updated_at;
                sqlx::query(
                    "UPDATE orders SET items = $1, company_name = $2, email = $3, region = $4, updated_at = $5 \
                     WHERE company_id = $6 AND order_id = $7",
                )
                .bind(Json(&order.items))
                .bind(&order.contact.company_name)
                .bind(&order.contact.email)
                .bind(&order.contact.region)
                .bind(order.updated_at)
                .bind(company_id)
                .bind(order_id)
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
                CommitOutcome { order: Some(order), changes, records }
            }
            CommitPlan::DeleteOrder { order_id } => {
                let order = lock_order(&mut tx, company_id, order_id).await?;
                let movements = stock_movements(&merge_items(&order.items), &ItemMap::new());
                let (changes, records) = apply_movements(&mut tx, company_id, &movements, now).await?;
                sqlx::query("DELETE FROM orders WHERE company_id = $1 AND order_id = $2")
                    .bind(company_id)
                    .bind(order_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_error)?;
                CommitOutcome { order: Some(order), changes, records }
            }
        };

        tx.commit().await.map_err(storage_error)?;
        Ok(outcome)
    }

    async fn get_order(&self, company_id: &str, order_id: Uuid) -> LedgerResult<Option<Order>> {
        sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE company_id = $1 AND order_id = $2"
        ))
        .bind(company_id)
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?
        .map(|row| order_from_row(&row))
        .transpose()
        .map_err(storage_error)
    }

    async fn list_orders(&self, company_id: &str) -> LedgerResult<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE company_id = $1 ORDER BY created_at DESC, order_id"
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        rows.iter().map(order_from_row).collect::<Result<_, _>>().map_err(storage_error)
    }
}
