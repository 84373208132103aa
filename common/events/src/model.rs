use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const LOW_STOCK_EVENT_VERSION: i32 = 1;

/// One downward crossing of a stock record's low threshold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LowStockEvent {
    pub event_id: Uuid,
    pub event_version: i32,
    pub company_id: String,
    pub product_id: String,
    pub name: String,
    pub qty_available: i64,
    pub low_threshold: i64,
    /// What caused the crossing, e.g. `order created <id>` or `stock adjusted`.
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

impl LowStockEvent {
    pub fn new(
        company_id: impl Into<String>,
        product_id: impl Into<String>,
        name: impl Into<String>,
        qty_available: i64,
        low_threshold: i64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_version: LOW_STOCK_EVENT_VERSION,
            company_id: company_id.into(),
            product_id: product_id.into(),
            name: name.into(),
            qty_available,
            low_threshold,
            reason: reason.into(),
            occurred_at: Utc::now(),
        }
    }

    /// Plain-text alert body for human-facing channels (mail, chat).
    pub fn summary(&self) -> String {
        format!(
            "LOW STOCK ALERT\nCompany: {}\nProduct: {}\nName: {}\nqtyAvailable: {}\nlowThreshold: {}\nReason: {}\nTime: {}\n",
            self.company_id,
            self.product_id,
            self.name,
            self.qty_available,
            self.low_threshold,
            self.reason,
            self.occurred_at.to_rfc3339(),
        )
    }
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("event buffer full")]
    BufferFull,
    #[error("event buffer closed")]
    Closed,
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("kafka error: {0}")]
    Kafka(String),
}

pub type EventResult<T> = Result<T, EventError>;
