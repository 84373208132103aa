use crate::error::{LedgerError, LedgerResult};
use crate::model::{OrderItem, StockChange, StockRecord};
use crate::reservation::{normalize_items, validate_company_id, validate_product_id};
use crate::store::{CommitOutcome, CommitPlan, StockStore};
use chrono::Utc;
use common_events::{EventSink, LowStockEvent};
use common_observability::StockMetrics;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Input for creating or overwriting a stock record.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStock {
    pub product_id: String,
    #[serde(default)]
    pub name: String,
    pub qty_available: i64,
    #[serde(default)]
    pub low_threshold: i64,
}

/// Per-company stock counters. Every mutation goes through [`StockStore::commit`] so the
/// read-check-write happens inside the store; the ledger validates input, times the commit and
/// turns downward threshold crossings into low-stock events.
pub struct StockLedger {
    store: Arc<dyn StockStore>,
    events: Arc<dyn EventSink>,
    metrics: StockMetrics,
}

impl StockLedger {
    pub fn new(store: Arc<dyn StockStore>, events: Arc<dyn EventSink>, metrics: StockMetrics) -> Self {
        Self { store, events, metrics }
    }

    pub fn store(&self) -> &Arc<dyn StockStore> { &self.store }

    pub fn metrics(&self) -> &StockMetrics { &self.metrics }

    /// Create or overwrite a record (last writer wins).
    pub async fn initialize(&self, company_id: &str, input: NewStock) -> LedgerResult<StockRecord> {
        let company_id = validate_company_id(company_id)?;
        let product_id = validate_product_id(&input.product_id)?;
        if input.qty_available < 0 {
            return Err(LedgerError::validation("invalid_quantity", "qtyAvailable cannot be negative"));
        }
        if input.low_threshold < 0 {
            return Err(LedgerError::validation("invalid_threshold", "lowThreshold cannot be negative"));
        }
        let name = match input.name.trim() {
            "" => product_id.clone(),
            trimmed => trimmed.to_string(),
        };
        let record = StockRecord {
            company_id: company_id.clone(),
            product_id,
            name,
            qty_available: input.qty_available,
            low_threshold: input.low_threshold,
            updated_at: Utc::now(),
        };
        let previous = self.store.put_stock(record.clone()).await?;
        info!(
            company_id = %record.company_id,
            product_id = %record.product_id,
            qty = record.qty_available,
            threshold = record.low_threshold,
            replaced = previous.is_some(),
            "Stock record initialised"
        );
        let was_above = previous.as_ref().map_or(true, |p| !p.is_low());
        if record.is_low() && was_above {
            self.emit(LowStockEvent::new(
                &record.company_id,
                &record.product_id,
                &record.name,
                record.qty_available,
                record.low_threshold,
                "stock initialised",
            ))
            .await;
        }
        Ok(record)
    }

    /// Atomically add `delta` (may be negative) to one record.
    pub async fn adjust(&self, company_id: &str, product_id: &str, delta: i64) -> LedgerResult<StockRecord> {
        let company_id = validate_company_id(company_id)?;
        let product_id = validate_product_id(product_id)?;
        if delta == 0 {
            return Err(LedgerError::validation("invalid_amount", "amount must be a non-zero integer"));
        }
        let outcome = self
            .commit(&company_id, CommitPlan::Adjust { product_id: product_id.clone(), delta }, "stock adjusted")
            .await?;
        self.metrics.stock_adjustments.inc();
        outcome
            .records
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::Storage(format!("store returned no record for adjusted {product_id}")))
    }

    /// All-or-nothing decrement of every listed product. Duplicate lines are merged.
    pub async fn reserve(&self, company_id: &str, items: &[OrderItem]) -> LedgerResult<Vec<StockChange>> {
        let company_id = validate_company_id(company_id)?;
        let items = normalize_items(items)?;
        let outcome = self.commit(&company_id, CommitPlan::Reserve { items }, "stock reserved").await?;
        Ok(outcome.changes)
    }

    pub async fn get(&self, company_id: &str, product_id: &str) -> LedgerResult<StockRecord> {
        let company_id = validate_company_id(company_id)?;
        let product_id = validate_product_id(product_id)?;
        self.store
            .get_stock(&company_id, &product_id)
            .await?
            .ok_or_else(|| LedgerError::stock_not_found(&company_id, &product_id))
    }

    pub async fn list(&self, company_id: &str) -> LedgerResult<Vec<StockRecord>> {
        let company_id = validate_company_id(company_id)?;
        self.store.list_stock(&company_id).await
    }

    /// Run one atomic plan against the store, then signal every threshold crossing it caused.
    pub(crate) async fn commit(&self, company_id: &str, plan: CommitPlan, reason: &str) -> LedgerResult<CommitOutcome> {
        let operation = plan.operation();
        let started = Instant::now();
        let result = self.store.commit(company_id, plan).await;
        self.metrics.commit_duration_seconds.observe(started.elapsed().as_secs_f64());
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                debug!(company_id = %company_id, operation, error = %err, "Ledger commit rejected");
                return Err(err);
            }
        };
        debug!(company_id = %company_id, operation, touched = outcome.changes.len(), "Ledger commit applied");
        self.notify_crossings(company_id, &outcome.changes, reason).await;
        Ok(outcome)
    }

    async fn notify_crossings(&self, company_id: &str, changes: &[StockChange], reason: &str) {
        for change in changes.iter().filter(|c| c.crossed_low_threshold()) {
            self.emit(LowStockEvent::new(
                company_id,
                &change.product_id,
                &change.name,
                change.after,
                change.low_threshold,
                reason,
            ))
            .await;
        }
    }

    /// Delivery problems never fail the operation that caused the event.
    async fn emit(&self, event: LowStockEvent) {
        self.metrics.low_stock_events.inc();
        info!(
            company_id = %event.company_id,
            product_id = %event.product_id,
            qty = event.qty_available,
            threshold = event.low_threshold,
            "Low stock threshold crossed"
        );
        if let Err(err) = self.events.publish(event).await {
            self.metrics.event_emit_failures.inc();
            warn!(error = %err, "Failed to hand low-stock event to sink");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Order;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use common_events::RecordingEventSink;
    use uuid::Uuid;

    /// Lets another writer adjust the same record right after every adjustment commits.
    struct InterleavingStore {
        inner: MemoryStore,
        competing_delta: i64,
    }

    #[async_trait]
    impl StockStore for InterleavingStore {
        async fn put_stock(&self, record: StockRecord) -> LedgerResult<Option<StockRecord>> {
            self.inner.put_stock(record).await
        }
        async fn get_stock(&self, company_id: &str, product_id: &str) -> LedgerResult<Option<StockRecord>> {
            self.inner.get_stock(company_id, product_id).await
        }
        async fn list_stock(&self, company_id: &str) -> LedgerResult<Vec<StockRecord>> {
            self.inner.list_stock(company_id).await
        }
        async fn commit(&self, company_id: &str, plan: CommitPlan) -> LedgerResult<CommitOutcome> {
            let competing = match &plan {
                CommitPlan::Adjust { product_id, .. } => Some(product_id.clone()),
                _ => None,
            };
            let outcome = self.inner.commit(company_id, plan).await?;
            if let Some(product_id) = competing {
                let other = CommitPlan::Adjust { product_id, delta: self.competing_delta };
                self.inner.commit(company_id, other).await?;
            }
            Ok(outcome)
        }
        async fn get_order(&self, company_id: &str, order_id: Uuid) -> LedgerResult<Option<Order>> {
            self.inner.get_order(company_id, order_id).await
        }
        async fn list_orders(&self, company_id: &str) -> LedgerResult<Vec<Order>> {
            self.inner.list_orders(company_id).await
        }
    }

    fn ledger() -> (StockLedger, Arc<RecordingEventSink>) {
        let sink = Arc::new(RecordingEventSink::new());
        let ledger = StockLedger::new(Arc::new(MemoryStore::new()), sink.clone(), StockMetrics::new());
        (ledger, sink)
    }

    fn stock(product: &str, qty: i64, threshold: i64) -> NewStock {
        NewStock { product_id: product.into(), name: format!("{product} kit"), qty_available: qty, low_threshold: threshold }
    }

    #[tokio::test]
    async fn adjust_arithmetic_and_floor() {
        let (ledger, _) = ledger();
        ledger.initialize("c1", stock("P1", 10, 0)).await.unwrap();
        assert_eq!(ledger.adjust("c1", "P1", 5).await.unwrap().qty_available, 15);
        assert_eq!(ledger.adjust("c1", "P1", -15).await.unwrap().qty_available, 0);
        let err = ledger.adjust("c1", "P1", -1).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientStock(_)));
        assert_eq!(ledger.get("c1", "P1").await.unwrap().qty_available, 0);
    }

    #[tokio::test]
    async fn adjust_returns_its_own_post_state() {
        let store = Arc::new(InterleavingStore { inner: MemoryStore::new(), competing_delta: -7 });
        let ledger = StockLedger::new(store.clone(), Arc::new(RecordingEventSink::new()), StockMetrics::new());
        ledger.initialize("c1", stock("P1", 50, 0)).await.unwrap();

        let returned = ledger.adjust("c1", "P1", 10).await.unwrap();
        assert_eq!(returned.qty_available, 60);
        assert_eq!(returned.product_id, "P1");
        assert_eq!(ledger.get("c1", "P1").await.unwrap().qty_available, 53, "competing write landed afterwards");
    }

    #[tokio::test]
    async fn adjust_validates_input() {
        let (ledger, _) = ledger();
        ledger.initialize("c1", stock("P1", 10, 0)).await.unwrap();
        assert!(matches!(ledger.adjust("c1", "P1", 0).await, Err(LedgerError::Validation { code: "invalid_amount", .. })));
        assert!(matches!(ledger.adjust("c1", "P9", 3).await, Err(LedgerError::NotFound { .. })));
        assert!(matches!(ledger.adjust(" ", "P1", 3).await, Err(LedgerError::Validation { code: "invalid_company_id", .. })));
    }

    #[tokio::test]
    async fn initialize_rejects_negative_values() {
        let (ledger, _) = ledger();
        assert!(ledger.initialize("c1", stock("P1", -1, 0)).await.is_err());
        assert!(ledger.initialize("c1", stock("P1", 1, -1)).await.is_err());
        assert!(ledger.initialize("c1", stock("  ", 1, 0)).await.is_err());
    }

    #[tokio::test]
    async fn initialize_defaults_name_and_overwrites() {
        let (ledger, _) = ledger();
        let first = ledger
            .initialize("c1", NewStock { product_id: "P1".into(), name: " ".into(), qty_available: 3, low_threshold: 0 })
            .await
            .unwrap();
        assert_eq!(first.name, "P1");
        ledger.initialize("c1", stock("P1", 40, 2)).await.unwrap();
        let current = ledger.get("c1", "P1").await.unwrap();
        assert_eq!(current.qty_available, 40);
        assert_eq!(current.low_threshold, 2);
    }

    #[tokio::test]
    async fn initialize_at_threshold_signals_once() {
        let (ledger, sink) = ledger();
        ledger.initialize("c1", stock("P1", 2, 5)).await.unwrap();
        ledger.initialize("c1", stock("P1", 1, 5)).await.unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.events()[0].reason, "stock initialised");
    }

    #[tokio::test]
    async fn reserve_signals_each_crossing_product() {
        let (ledger, sink) = ledger();
        ledger.initialize("c1", stock("P1", 10, 5)).await.unwrap();
        ledger.initialize("c1", stock("P2", 10, 5)).await.unwrap();
        ledger.initialize("c1", stock("P3", 10, 1)).await.unwrap();
        let changes = ledger
            .reserve("c1", &[OrderItem::new("P1", 6), OrderItem::new("P2", 5), OrderItem::new("P3", 2)])
            .await
            .unwrap();
        assert_eq!(changes.len(), 3);
        let products: Vec<String> = sink.events().into_iter().map(|e| e.product_id).collect();
        assert_eq!(products, vec!["P1".to_string(), "P2".to_string()]);
        assert_eq!(ledger.metrics().low_stock_events.get(), 2);
    }

    #[tokio::test]
    async fn reserve_merges_duplicate_lines() {
        let (ledger, _) = ledger();
        ledger.initialize("c1", stock("P1", 10, 0)).await.unwrap();
        ledger.reserve("c1", &[OrderItem::new("P1", 4), OrderItem::new("P1", 4)]).await.unwrap();
        assert_eq!(ledger.get("c1", "P1").await.unwrap().qty_available, 2);
        let err = ledger.reserve("c1", &[OrderItem::new("P1", 2), OrderItem::new("P1", 1)]).await.unwrap_err();
        match err {
            LedgerError::InsufficientStock(shortages) => assert_eq!(shortages[0].requested, 3),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
