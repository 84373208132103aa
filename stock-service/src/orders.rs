use crate::error::{LedgerError, LedgerResult};
use crate::ledger::StockLedger;
use crate::model::{Contact, ContactPatch, Order, OrderItem};
use crate::reservation::{items_from_map, normalize_items, validate_company_id, validate_contact};
use crate::store::CommitPlan;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub company_id: String,
    #[serde(flatten)]
    pub contact: Contact,
    pub items: Vec<OrderItem>,
}

/// Replacement lines plus optional contact corrections.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdate {
    pub items: Vec<OrderItem>,
    pub company_name: Option<String>,
    pub email: Option<String>,
    pub region: Option<String>,
}

impl OrderUpdate {
    fn contact_patch(&self) -> ContactPatch {
        ContactPatch {
            company_name: self.company_name.clone(),
            email: self.email.clone(),
            region: self.region.clone(),
        }
    }
}

/// Lifecycle of a single order request, recorded in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderPhase {
    Validating,
    Reserving,
    Committed,
    Rejected,
}

impl OrderPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderPhase::Validating => "validating",
            OrderPhase::Reserving => "reserving",
            OrderPhase::Committed => "committed",
            OrderPhase::Rejected => "rejected",
        }
    }
}

fn outcome_label(result: &LedgerResult<impl Sized>) -> &'static str {
    match result {
        Ok(_) => "accepted",
        Err(LedgerError::Storage(_)) | Err(LedgerError::Conflict(_)) => "error",
        Err(_) => "rejected",
    }
}

/// Accepts orders only when the ledger can reserve every line, persisting the order in the same
/// atomic commit as the stock decrement.
pub struct OrderService {
    ledger: Arc<StockLedger>,
}

impl OrderService {
    pub fn new(ledger: Arc<StockLedger>) -> Self { Self { ledger } }

    pub async fn create(&self, request: NewOrder) -> LedgerResult<Order> {
        let result = self.try_create(request).await;
        self.record("create", &result);
        result
    }

    async fn try_create(&self, request: NewOrder) -> LedgerResult<Order> {
        debug!(company_id = %request.company_id, phase = OrderPhase::Validating.as_str(), "Order received");
        let validated = validate_company_id(&request.company_id).and_then(|company_id| {
            let contact = validate_contact(&request.contact)?;
            let items = normalize_items(&request.items)?;
            Ok((company_id, contact, items))
        });
        let (company_id, contact, items) = match validated {
            Ok(v) => v,
            Err(err) => {
                info!(company_id = %request.company_id, phase = OrderPhase::Rejected.as_str(), error = %err, "Order rejected");
                return Err(err);
            }
        };

        let now = Utc::now();
        let order = Order {
            company_id: company_id.clone(),
            order_id: Uuid::new_v4(),
            contact,
            items: items_from_map(&items),
            created_at: now,
            updated_at: now,
        };
        debug!(company_id = %company_id, order_id = %order.order_id, phase = OrderPhase::Reserving.as_str(), lines = order.items.len(), "Reserving stock");
        let reason = format!("order created {}", order.order_id);
        match self.ledger.commit(&company_id, CommitPlan::CreateOrder(order), &reason).await {
            Ok(outcome) => {
                let order = outcome
                    .order
                    .ok_or_else(|| LedgerError::Storage("store did not return the created order".into()))?;
                info!(company_id = %company_id, order_id = %order.order_id, phase = OrderPhase::Committed.as_str(), "Order accepted");
                Ok(order)
            }
            Err(err) => {
                info!(company_id = %company_id, phase = OrderPhase::Rejected.as_str(), error = %err, "Order rejected");
                Err(err)
            }
        }
    }

    /// Replace an order's lines, reserving or releasing only the difference.
    pub async fn update(&self, company_id: &str, order_id: Uuid, update: OrderUpdate) -> LedgerResult<Order> {
        let result = self.try_update(company_id, order_id, update).await;
        self.record("update", &result);
        result
    }

    async fn try_update(&self, company_id: &str, order_id: Uuid, update: OrderUpdate) -> LedgerResult<Order> {
        let company_id = validate_company_id(company_id)?;
        let items = normalize_items(&update.items)?;
        let plan = CommitPlan::ReplaceOrder { order_id, items, contact: update.contact_patch(), updated_at: Utc::now() };
        let outcome = self.ledger.commit(&company_id, plan, &format!("order updated {order_id}")).await?;
        let order = outcome
            .order
            .ok_or_else(|| LedgerError::Storage("store did not return the updated order".into()))?;
        info!(company_id = %company_id, order_id = %order_id, released_or_reserved = outcome.changes.len(), "Order updated");
        Ok(order)
    }

    /// Remove an order and return its reserved quantities to stock.
    pub async fn delete(&self, company_id: &str, order_id: Uuid) -> LedgerResult<Order> {
        let result = self.try_delete(company_id, order_id).await;
        self.record("delete", &result);
        result
    }

    async fn try_delete(&self, company_id: &str, order_id: Uuid) -> LedgerResult<Order> {
        let company_id = validate_company_id(company_id)?;
        let plan = CommitPlan::DeleteOrder { order_id };
        let outcome = self.ledger.commit(&company_id, plan, &format!("order deleted {order_id}")).await?;
        let order = outcome
            .order
            .ok_or_else(|| LedgerError::Storage("store did not return the deleted order".into()))?;
        info!(company_id = %company_id, order_id = %order_id, restored = outcome.changes.len(), "Order deleted");
        Ok(order)
    }

    pub async fn get(&self, company_id: &str, order_id: Uuid) -> LedgerResult<Order> {
        let company_id = validate_company_id(company_id)?;
        self.ledger
            .store()
            .get_order(&company_id, order_id)
            .await?
            .ok_or_else(|| LedgerError::order_not_found(&company_id, order_id))
    }

    pub async fn list(&self, company_id: &str) -> LedgerResult<Vec<Order>> {
        let company_id = validate_company_id(company_id)?;
        self.ledger.store().list_orders(&company_id).await
    }

    fn record<T>(&self, operation: &str, result: &LedgerResult<T>) {
        let outcome = outcome_label(result);
        self.ledger.metrics().orders_total.with_label_values(&[operation, outcome]).inc();
        if outcome == "error" {
            if let Err(err) = result {
                warn!(operation, error = %err, "Order write failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::NewStock;
    use crate::store::MemoryStore;
    use common_events::RecordingEventSink;
    use common_observability::StockMetrics;

    async fn service(stock: &[(&str, i64, i64)]) -> (OrderService, Arc<StockLedger>) {
        let ledger = Arc::new(StockLedger::new(
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingEventSink::new()),
            StockMetrics::new(),
        ));
        for (product, qty, threshold) in stock {
            ledger
                .initialize("c1", NewStock { product_id: (*product).into(), name: String::new(), qty_available: *qty, low_threshold: *threshold })
                .await
                .unwrap();
        }
        (OrderService::new(ledger.clone()), ledger)
    }

    fn contact() -> Contact {
        Contact { company_name: "Acme Labs".into(), email: "lab@acme.test".into(), region: "Jordan".into() }
    }

    fn new_order(items: Vec<OrderItem>) -> NewOrder {
        NewOrder { company_id: "c1".into(), contact: contact(), items }
    }

    #[tokio::test]
    async fn create_decrements_and_persists() {
        let (orders, ledger) = service(&[("P1", 10, 0), ("P2", 4, 0)]).await;
        let order = orders.create(new_order(vec![OrderItem::new("P1", 3), OrderItem::new("P2", 4)])).await.unwrap();
        assert_eq!(order.created_at, order.updated_at);
        assert_eq!(ledger.get("c1", "P1").await.unwrap().qty_available, 7);
        assert_eq!(ledger.get("c1", "P2").await.unwrap().qty_available, 0);
        assert_eq!(orders.get("c1", order.order_id).await.unwrap(), order);
        assert_eq!(ledger.metrics().orders_total.with_label_values(&["create", "accepted"]).get(), 1);
    }

    #[tokio::test]
    async fn rejected_create_leaves_no_trace() {
        let (orders, ledger) = service(&[("P1", 10, 0), ("P2", 1, 0)]).await;
        let err = orders.create(new_order(vec![OrderItem::new("P1", 3), OrderItem::new("P2", 2)])).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientStock(_)));
        assert_eq!(ledger.get("c1", "P1").await.unwrap().qty_available, 10);
        assert!(orders.list("c1").await.unwrap().is_empty());
        assert_eq!(ledger.metrics().orders_total.with_label_values(&["create", "rejected"]).get(), 1);
    }

    #[tokio::test]
    async fn create_validates_contact() {
        let (orders, _) = service(&[("P1", 10, 0)]).await;
        let mut request = new_order(vec![OrderItem::new("P1", 1)]);
        request.contact.email = "not-an-email".into();
        assert!(matches!(orders.create(request).await, Err(LedgerError::Validation { code: "invalid_email", .. })));
    }

    #[tokio::test]
    async fn update_reserves_only_the_difference() {
        let (orders, ledger) = service(&[("P1", 10, 0), ("P2", 5, 0)]).await;
        let order = orders.create(new_order(vec![OrderItem::new("P1", 4)])).await.unwrap();
        let update = OrderUpdate { items: vec![OrderItem::new("P1", 6), OrderItem::new("P2", 5)], ..Default::default() };
        let updated = orders.update("c1", order.order_id, update).await.unwrap();
        assert_eq!(updated.items.len(), 2);
        assert_eq!(updated.created_at, order.created_at);
        assert_eq!(ledger.get("c1", "P1").await.unwrap().qty_available, 4);
        assert_eq!(ledger.get("c1", "P2").await.unwrap().qty_available, 0);

        let shrink = OrderUpdate { items: vec![OrderItem::new("P1", 1)], ..Default::default() };
        orders.update("c1", order.order_id, shrink).await.unwrap();
        assert_eq!(ledger.get("c1", "P1").await.unwrap().qty_available, 9);
        assert_eq!(ledger.get("c1", "P2").await.unwrap().qty_available, 5);
    }

    #[tokio::test]
    async fn failed_update_keeps_order_and_stock() {
        let (orders, ledger) = service(&[("P1", 10, 0)]).await;
        let order = orders.create(new_order(vec![OrderItem::new("P1", 4)])).await.unwrap();
        let update = OrderUpdate { items: vec![OrderItem::new("P1", 11)], ..Default::default() };
        match orders.update("c1", order.order_id, update).await.unwrap_err() {
            LedgerError::InsufficientStock(shortages) => {
                assert_eq!(shortages[0].requested, 7);
                assert_eq!(shortages[0].available, 6);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(orders.get("c1", order.order_id).await.unwrap().items, order.items);
        assert_eq!(ledger.get("c1", "P1").await.unwrap().qty_available, 6);
    }

    #[tokio::test]
    async fn update_merges_partial_contact() {
        let (orders, _) = service(&[("P1", 10, 0)]).await;
        let order = orders.create(new_order(vec![OrderItem::new("P1", 1)])).await.unwrap();
        let update = OrderUpdate { items: vec![OrderItem::new("P1", 1)], region: Some("Egypt".into()), ..Default::default() };
        let updated = orders.update("c1", order.order_id, update).await.unwrap();
        assert_eq!(updated.contact.region, "Egypt");
        assert_eq!(updated.contact.email, "lab@acme.test");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_contact_edits_both_survive() {
        for _ in 0..20 {
            let (orders, _) = service(&[("P1", 10, 0)]).await;
            let orders = Arc::new(orders);
            let order = orders.create(new_order(vec![OrderItem::new("P1", 1)])).await.unwrap();
            let email = {
                let orders = orders.clone();
                tokio::spawn(async move {
                    let update = OrderUpdate { items: vec![OrderItem::new("P1", 1)], email: Some("ops@acme.test".into()), ..Default::default() };
                    orders.update("c1", order.order_id, update).await
                })
            };
            let region = {
                let orders = orders.clone();
                tokio::spawn(async move {
                    let update = OrderUpdate { items: vec![OrderItem::new("P1", 1)], region: Some("Egypt".into()), ..Default::default() };
                    orders.update("c1", order.order_id, update).await
                })
            };
            email.await.unwrap().unwrap();
            region.await.unwrap().unwrap();
            let stored = orders.get("c1", order.order_id).await.unwrap();
            assert_eq!(stored.contact.email, "ops@acme.test");
            assert_eq!(stored.contact.region, "Egypt");
        }
    }

    #[tokio::test]
    async fn invalid_contact_patch_changes_nothing() {
        let (orders, ledger) = service(&[("P1", 10, 0)]).await;
        let order = orders.create(new_order(vec![OrderItem::new("P1", 1)])).await.unwrap();
        let update = OrderUpdate { items: vec![OrderItem::new("P1", 4)], company_name: Some("A".into()), ..Default::default() };
        assert!(matches!(
            orders.update("c1", order.order_id, update).await,
            Err(LedgerError::Validation { code: "invalid_company_name", .. })
        ));
        assert_eq!(ledger.get("c1", "P1").await.unwrap().qty_available, 9);
        assert_eq!(orders.get("c1", order.order_id).await.unwrap().contact, order.contact);
    }

    #[tokio::test]
    async fn delete_restores_stock() {
        let (orders, ledger) = service(&[("P1", 10, 0)]).await;
        let order = orders.create(new_order(vec![OrderItem::new("P1", 4)])).await.unwrap();
        let deleted = orders.delete("c1", order.order_id).await.unwrap();
        assert_eq!(deleted.order_id, order.order_id);
        assert_eq!(ledger.get("c1", "P1").await.unwrap().qty_available, 10);
        assert!(matches!(orders.get("c1", order.order_id).await, Err(LedgerError::NotFound { .. })));
        assert!(matches!(orders.delete("c1", order.order_id).await, Err(LedgerError::NotFound { .. })));
    }

    #[tokio::test]
    async fn unknown_order_update_is_not_found() {
        let (orders, _) = service(&[("P1", 10, 0)]).await;
        let update = OrderUpdate { items: vec![OrderItem::new("P1", 1)], ..Default::default() };
        assert!(matches!(orders.update("c1", Uuid::new_v4(), update).await, Err(LedgerError::NotFound { entity: "order", .. })));
    }
}
