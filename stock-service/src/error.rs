use crate::model::Shortage;
use common_http_errors::ApiError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{message}")]
    Validation { code: &'static str, message: String },
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },
    #[error("insufficient stock for {}", describe_shortages(.0))]
    InsufficientStock(Vec<Shortage>),
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

fn describe_shortages(shortages: &[Shortage]) -> String {
    shortages
        .iter()
        .map(|s| format!("{} (requested {}, available {})", s.product_id, s.requested, s.available))
        .collect::<Vec<_>>()
        .join(", ")
}

impl LedgerError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation { code, message: message.into() }
    }

    pub fn stock_not_found(company_id: &str, product_id: &str) -> Self {
        Self::NotFound { entity: "stock", key: format!("{company_id}/{product_id}") }
    }

    pub fn order_not_found(company_id: &str, order_id: Uuid) -> Self {
        Self::NotFound { entity: "order", key: format!("{company_id}/{order_id}") }
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Validation { .. } => "validation",
            LedgerError::NotFound { .. } => "not_found",
            LedgerError::InsufficientStock(_) => "insufficient_stock",
            LedgerError::Conflict(_) => "conflict",
            LedgerError::Storage(_) => "storage",
        }
    }

    pub fn into_api(self, trace_id: Option<Uuid>) -> ApiError {
        let message = Some(self.to_string());
        match self {
            LedgerError::Validation { code, .. } => ApiError::BadRequest { code, trace_id, message },
            LedgerError::NotFound { entity, .. } => {
                let code = if entity == "order" { "order_not_found" } else { "stock_not_found" };
                ApiError::NotFound { code, trace_id, message }
            }
            LedgerError::InsufficientStock(shortages) => ApiError::Conflict {
                code: "insufficient_stock",
                trace_id,
                message,
                details: serde_json::to_value(&shortages).ok(),
            },
            LedgerError::Conflict(_) => ApiError::Conflict { code: "write_conflict", trace_id, message, details: None },
            LedgerError::Storage(_) => {
                tracing::error!(error = ?message, ?trace_id, "Ledger storage failure");
                ApiError::Internal { trace_id, message: Some("storage failure".into()) }
            }
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self { err.into_api(None) }
}
