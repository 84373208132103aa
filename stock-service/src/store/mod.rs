pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::{LedgerError, LedgerResult};
use crate::model::{ContactPatch, Order, Shortage, StockChange, StockRecord};
use crate::reservation::ItemMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A unit of work that moves stock and, optionally, writes an order. Stores execute a plan as
/// one indivisible step: every stock movement and the order write succeed together or nothing
/// is changed.
#[derive(Debug, Clone)]
pub enum CommitPlan {
    /// Consume every listed quantity.
    Reserve { items: ItemMap },
    /// Consume the order's quantities and insert the order.
    CreateOrder(Order),
    /// Swap an existing order's lines, moving stock by the difference to what it held. The
    /// contact patch is merged onto the stored contact inside the same commit.
    ReplaceOrder {
        order_id: Uuid,
        items: ItemMap,
        contact: ContactPatch,
        updated_at: DateTime<Utc>,
    },
    /// Remove an order and give back everything it held.
    DeleteOrder { order_id: Uuid },
    /// Signed change of a single record.
    Adjust { product_id: String, delta: i64 },
}

impl CommitPlan {
    pub fn operation(&self) -> &'static str {
        match self {
            CommitPlan::Reserve { .. } => "reserve",
            CommitPlan::CreateOrder(_) => "create_order",
            CommitPlan::ReplaceOrder { .. } => "update_order",
            CommitPlan::DeleteOrder { .. } => "delete_order",
            CommitPlan::Adjust { .. } => "adjust",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    /// Order as written (create/update) or as it was before removal (delete).
    pub order: Option<Order>,
    pub changes: Vec<StockChange>,
    /// Post-commit state of every touched record, in the same order as `changes`.
    pub records: Vec<StockRecord>,
}

#[async_trait]
pub trait StockStore: Send + Sync {
    /// Create or overwrite a record, returning the one it replaced.
    async fn put_stock(&self, record: StockRecord) -> LedgerResult<Option<StockRecord>>;

    async fn get_stock(&self, company_id: &str, product_id: &str) -> LedgerResult<Option<StockRecord>>;

    /// All records of a company, ordered by product id.
    async fn list_stock(&self, company_id: &str) -> LedgerResult<Vec<StockRecord>>;

    async fn commit(&self, company_id: &str, plan: CommitPlan) -> LedgerResult<CommitOutcome>;

    async fn get_order(&self, company_id: &str, order_id: Uuid) -> LedgerResult<Option<Order>>;

    /// All orders of a company, newest first.
    async fn list_orders(&self, company_id: &str) -> LedgerResult<Vec<Order>>;
}

/// Collects the outcome of checking each movement of a plan against current stock.
#[derive(Debug, Default)]
pub(crate) struct MovementCheck {
    missing: Option<String>,
    shortages: Vec<Shortage>,
}

impl MovementCheck {
    pub(crate) fn missing(&mut self, product_id: &str) {
        if self.missing.is_none() {
            self.missing = Some(product_id.to_string());
        }
    }

    pub(crate) fn short(&mut self, product_id: &str, delta: i64, available: i64) {
        self.shortages.push(Shortage { product_id: product_id.to_string(), requested: -delta, available });
    }

    /// An absent record outranks shortages: the plan references stock that was never
    /// initialised, so quantities are meaningless.
    pub(crate) fn into_result(self, company_id: &str) -> LedgerResult<()> {
        if let Some(product_id) = self.missing {
            return Err(LedgerError::stock_not_found(company_id, &product_id));
        }
        if !self.shortages.is_empty() {
            return Err(LedgerError::InsufficientStock(self.shortages));
        }
        Ok(())
    }
}
