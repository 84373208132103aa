use super::{CommitOutcome, CommitPlan, MovementCheck, StockStore};
use crate::error::{LedgerError, LedgerResult};
use crate::model::{Order, StockChange, StockRecord};
use crate::reservation::{apply_contact_patch, consume_all, items_from_map, merge_items, stock_movements, ItemMap};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    stock: HashMap<(String, String), StockRecord>,
    orders: HashMap<(String, Uuid), Order>,
}

/// Process-local store. Every operation runs under one lock, so commits are trivially
/// linearizable; used when no `DATABASE_URL` is configured and throughout the tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

enum OrderWrite {
    None,
    Insert(Order),
    Replace(Order),
    Delete(Order),
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> LedgerResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| LedgerError::Storage("memory store lock poisoned".into()))
    }
}

fn stock_key(company_id: &str, product_id: &str) -> (String, String) {
    (company_id.to_string(), product_id.to_string())
}

fn existing_order(tables: &Tables, company_id: &str, order_id: Uuid) -> LedgerResult<Order> {
    tables
        .orders
        .get(&(company_id.to_string(), order_id))
        .cloned()
        .ok_or_else(|| LedgerError::order_not_found(company_id, order_id))
}

#[async_trait]
impl StockStore for MemoryStore {
    async fn put_stock(&self, record: StockRecord) -> LedgerResult<Option<StockRecord>> {
        let mut tables = self.lock()?;
        Ok(tables.stock.insert(stock_key(&record.company_id, &record.product_id), record))
    }

    async fn get_stock(&self, company_id: &str, product_id: &str) -> LedgerResult<Option<StockRecord>> {
        let tables = self.lock()?;
        Ok(tables.stock.get(&stock_key(company_id, product_id)).cloned())
    }

    async fn list_stock(&self, company_id: &str) -> LedgerResult<Vec<StockRecord>> {
        let tables = self.lock()?;
        let mut records: Vec<StockRecord> = tables
            .stock
            .values()
            .filter(|r| r.company_id == company_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.product_id.cmp(&b.product_id));
        Ok(records)
    }

    async fn commit(&self, company_id: &str, plan: CommitPlan) -> LedgerResult<CommitOutcome> {
        let mut tables = self.lock()?;
        let now = Utc::now();

        let (movements, write): (ItemMap, OrderWrite) = match plan {
            CommitPlan::Reserve { items } => (consume_all(&items), OrderWrite::None),
            CommitPlan::Adjust { product_id, delta } => (ItemMap::from([(product_id, delta)]), OrderWrite::None),
            CommitPlan::CreateOrder(order) => {
                if tables.orders.contains_key(&(company_id.to_string(), order.order_id)) {
                    return Err(LedgerError::Conflict(format!("order {} already exists", order.order_id)));
                }
                (consume_all(&merge_items(&order.items)), OrderWrite::Insert(order))
            }
            CommitPlan::ReplaceOrder { order_id, items, contact, updated_at } => {
                let mut order = existing_order(&tables, company_id, order_id)?;
                let movements = stock_movements(&merge_items(&order.items), &items);
                order.contact = apply_contact_patch(&order.contact, &contact)?;
                order.items = items_from_map(&items);
                order.updated_at = updated_at;
                (movements, OrderWrite::Replace(order))
            }
            CommitPlan::DeleteOrder { order_id } => {
                let order = existing_order(&tables, company_id, order_id)?;
                (stock_movements(&merge_items(&order.items), &ItemMap::new()), OrderWrite::Delete(order))
            }
        };

        // Check every movement before touching anything.
        let mut check = MovementCheck::default();
        for (product_id, delta) in &movements {
            match tables.stock.get(&stock_key(company_id, product_id)) {
                None => check.missing(product_id),
                Some(record) => match record.qty_available.checked_add(*delta) {
                    Some(after) if after >= 0 => {}
                    Some(_) => check.short(product_id, *delta, record.qty_available),
                    None => return Err(LedgerError::validation("quantity_overflow", format!("adjustment overflows stock of {product_id}"))),
                },
            }
        }
        check.into_result(company_id)?;

        let mut changes = Vec::with_capacity(movements.len());
        let mut records = Vec::with_capacity(movements.len());
        for (product_id, delta) in &movements {
            if let Some(record) = tables.stock.get_mut(&stock_key(company_id, product_id)) {
                let before = record.qty_available;
                record.qty_available += delta;
                record.updated_at = now;
                changes.push(StockChange {
                    product_id: product_id.clone(),
                    name: record.name.clone(),
                    before,
                    after: record.qty_available,
                    low_threshold: record.low_threshold,
                });
                records.push(record.clone());
            }
        }

        let order = match write {
            OrderWrite::None => None,
            OrderWrite::Insert(order) | OrderWrite::Replace(order) => {
                tables.orders.insert((company_id.to_string(), order.order_id), order.clone());
                Some(order)
            }
            OrderWrite::Delete(order) => {
                tables.orders.remove(&(company_id.to_string(), order.order_id));
                Some(order)
            }
        };

        Ok(CommitOutcome { order, changes, records })
    }

    async fn get_order(&self, company_id: &str, order_id: Uuid) -> LedgerResult<Option<Order>> {
        let tables = self.lock()?;
        Ok(tables.orders.get(&(company_id.to_string(), order_id)).cloned())
    }

    async fn list_orders(&self, company_id: &str) -> LedgerResult<Vec<Order>> {
        let tables = self.lock()?;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.company_id == company_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.order_id.cmp(&b.order_id)));
        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContactPatch;

    fn record(company: &str, product: &str, qty: i64, threshold: i64) -> StockRecord {
        StockRecord {
            company_id: company.into(),
            product_id: product.into(),
            name: format!("{product} kit"),
            qty_available: qty,
            low_threshold: threshold,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn reserve_is_all_or_nothing() {
        let store = MemoryStore::new();
        store.put_stock(record("c1", "P1", 20, 0)).await.unwrap();
        store.put_stock(record("c1", "P2", 10, 0)).await.unwrap();

        let items = ItemMap::from([("P1".to_string(), 5), ("P2".to_string(), 100)]);
        let err = store.commit("c1", CommitPlan::Reserve { items }).await.unwrap_err();
        match err {
            LedgerError::InsufficientStock(shortages) => {
                assert_eq!(shortages.len(), 1);
                assert_eq!(shortages[0].product_id, "P2");
                assert_eq!(shortages[0].requested, 100);
                assert_eq!(shortages[0].available, 10);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(store.get_stock("c1", "P1").await.unwrap().unwrap().qty_available, 20);
        assert_eq!(store.get_stock("c1", "P2").await.unwrap().unwrap().qty_available, 10);
    }

    #[tokio::test]
    async fn missing_record_fails_whole_plan() {
        let store = MemoryStore::new();
        store.put_stock(record("c1", "P1", 20, 0)).await.unwrap();
        let items = ItemMap::from([("P1".to_string(), 5), ("P9".to_string(), 1)]);
        let err = store.commit("c1", CommitPlan::Reserve { items }).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { entity: "stock", .. }));
        assert_eq!(store.get_stock("c1", "P1").await.unwrap().unwrap().qty_available, 20);
    }

    #[tokio::test]
    async fn companies_are_isolated() {
        let store = MemoryStore::new();
        store.put_stock(record("c1", "P1", 5, 0)).await.unwrap();
        store.put_stock(record("c2", "P1", 7, 0)).await.unwrap();
        let items = ItemMap::from([("P1".to_string(), 5)]);
        store.commit("c1", CommitPlan::Reserve { items }).await.unwrap();
        assert_eq!(store.get_stock("c2", "P1").await.unwrap().unwrap().qty_available, 7);
        assert_eq!(store.list_stock("c2").await.unwrap().len(), 1);
        assert!(store.list_stock("c3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn adjust_reports_before_and_after() {
        let store = MemoryStore::new();
        store.put_stock(record("c1", "P1", 50, 5)).await.unwrap();
        let outcome = store
            .commit("c1", CommitPlan::Adjust { product_id: "P1".into(), delta: -46 })
            .await
            .unwrap();
        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(outcome.changes[0].before, 50);
        assert_eq!(outcome.changes[0].after, 4);
        assert!(outcome.changes[0].crossed_low_threshold());
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].qty_available, 4);
        assert_eq!(outcome.records[0].company_id, "c1");
    }

    #[tokio::test]
    async fn contact_patch_merges_onto_stored_contact() {
        let store = MemoryStore::new();
        store.put_stock(record("c1", "P1", 10, 0)).await.unwrap();
        let now = Utc::now();
        let order = Order {
            company_id: "c1".into(),
            order_id: Uuid::new_v4(),
            contact: crate::model::Contact { company_name: "Acme".into(), email: "lab@acme.jo".into(), region: "Jordan".into() },
            items: vec![crate::model::OrderItem::new("P1", 2)],
            created_at: now,
            updated_at: now,
        };
        store.commit("c1", CommitPlan::CreateOrder(order.clone())).await.unwrap();
        let items = ItemMap::from([("P1".to_string(), 2)]);
        for patch in [
            ContactPatch { email: Some("ops@acme.jo".into()), ..Default::default() },
            ContactPatch { region: Some("Egypt".into()), ..Default::default() },
        ] {
            let plan = CommitPlan::ReplaceOrder { order_id: order.order_id, items: items.clone(), contact: patch, updated_at: Utc::now() };
            store.commit("c1", plan).await.unwrap();
        }
        let stored = store.get_order("c1", order.order_id).await.unwrap().unwrap();
        assert_eq!(stored.contact.email, "ops@acme.jo");
        assert_eq!(stored.contact.region, "Egypt");

        let bad = ContactPatch { region: Some("X".into()), ..Default::default() };
        let plan = CommitPlan::ReplaceOrder {
            order_id: order.order_id,
            items: ItemMap::from([("P1".to_string(), 5)]),
            contact: bad,
            updated_at: Utc::now(),
        };
        assert!(matches!(store.commit("c1", plan).await, Err(LedgerError::Validation { code: "invalid_region", .. })));
        assert_eq!(store.get_stock("c1", "P1").await.unwrap().unwrap().qty_available, 8);
    }
}
