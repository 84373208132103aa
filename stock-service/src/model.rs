use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authoritative available quantity of one product within one company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockRecord {
    pub company_id: String,
    pub product_id: String,
    pub name: String,
    pub qty_available: i64,
    pub low_threshold: i64,
    pub updated_at: DateTime<Utc>,
}

impl StockRecord {
    pub fn is_low(&self) -> bool {
        self.qty_available <= self.low_threshold
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub quantity: i64,
}

impl OrderItem {
    pub fn new(product_id: impl Into<String>, quantity: i64) -> Self {
        Self { product_id: product_id.into(), quantity }
    }
}

/// Requester contact fields copied onto every order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub company_name: String,
    pub email: String,
    pub region: String,
}

/// Contact fields to overwrite on an existing order; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactPatch {
    pub company_name: Option<String>,
    pub email: Option<String>,
    pub region: Option<String>,
}

impl ContactPatch {
    pub fn is_empty(&self) -> bool {
        self.company_name.is_none() && self.email.is_none() && self.region.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub company_id: String,
    pub order_id: Uuid,
    #[serde(flatten)]
    pub contact: Contact,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Before/after view of one stock record touched by a committed ledger operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockChange {
    pub product_id: String,
    pub name: String,
    pub before: i64,
    pub after: i64,
    pub low_threshold: i64,
}

impl StockChange {
    /// Edge trigger: true only on the transition from above the threshold to at-or-below it.
    pub fn crossed_low_threshold(&self) -> bool {
        self.before > self.low_threshold && self.after <= self.low_threshold
    }
}

/// One under-stocked line of a rejected reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shortage {
    pub product_id: String,
    pub requested: i64,
    pub available: i64,
}

/// `{"items": [...]}` envelope used by every list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self { Self { items } }
}
