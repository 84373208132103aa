use axum::{http::{StatusCode, HeaderValue}, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use uuid::Uuid;

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")] pub trace_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")] pub message: Option<String>,
    /// Structured per-item reasons (e.g. one entry per under-stocked product).
    #[serde(skip_serializing_if = "Option::is_none")] pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: &'static str, trace_id: Option<Uuid>, message: Option<String> },
    NotFound { code: &'static str, trace_id: Option<Uuid>, message: Option<String> },
    Conflict { code: &'static str, trace_id: Option<Uuid>, message: Option<String>, details: Option<serde_json::Value> },
    Internal { trace_id: Option<Uuid>, message: Option<String> },
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(e: E, trace_id: Option<Uuid>) -> Self { Self::Internal { trace_id, message: Some(e.to_string()) } }
    pub fn bad_request(code: &'static str, trace_id: Option<Uuid>) -> Self { Self::BadRequest { code, trace_id, message: None } }
    pub fn not_found(code: &'static str, trace_id: Option<Uuid>) -> Self { Self::NotFound { code, trace_id, message: None } }

    /// Stable machine-readable code, also sent as `X-Error-Code`.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest { code, .. } => code,
            ApiError::NotFound { code, .. } => code,
            ApiError::Conflict { code, .. } => code,
            ApiError::Internal { .. } => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_code = self.code();
        let body = match self {
            ApiError::BadRequest { code, trace_id, message } => ErrorBody { code: code.into(), trace_id, message, details: None },
            ApiError::NotFound { code, trace_id, message } => ErrorBody { code: code.into(), trace_id, message, details: None },
            ApiError::Conflict { code, trace_id, message, details } => ErrorBody { code: code.into(), trace_id, message, details },
            ApiError::Internal { trace_id, message } => ErrorBody { code: "internal_error".into(), trace_id, message, details: None },
        };
        let mut resp = (status, Json(body)).into_response();
        if let Ok(val) = HeaderValue::from_str(error_code) {
            resp.headers_mut().insert("X-Error-Code", val);
        }
        resp
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
