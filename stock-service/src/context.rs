use axum::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, Request};
use axum::http::{request::Parts, HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use common_http_errors::ApiError;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const TRACE_HEADER: &str = "X-Trace-ID";

/// Trace id chosen for the request by [`trace_requests`].
#[derive(Debug, Clone, Copy)]
struct TraceId(Uuid);

/// Per-request context shared by every handler.
#[derive(Debug, Clone, Copy)]
pub struct RequestCtx {
    pub trace_id: Uuid,
}

impl RequestCtx {
    pub fn trace(&self) -> Option<Uuid> { Some(self.trace_id) }

    /// Turn a body rejection into the service's error shape so clients always see a JSON body and
    /// an `X-Error-Code` header.
    pub fn body<T>(&self, payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
        payload.map(|Json(body)| body).map_err(|rejection| ApiError::BadRequest {
            code: "invalid_body",
            trace_id: self.trace(),
            message: Some(rejection.body_text()),
        })
    }
}

pub(crate) fn trace_id_from_headers(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get(TRACE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestCtx
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let trace_id = match parts.extensions.get::<TraceId>() {
            Some(TraceId(id)) => *id,
            None => trace_id_from_headers(&parts.headers).unwrap_or_else(Uuid::new_v4),
        };
        Ok(RequestCtx { trace_id })
    }
}

/// Opens an `http.request` span carrying the trace id for everything logged while handling the
/// request, and returns the id in the `X-Trace-ID` response header.
pub async fn trace_requests(mut req: Request, next: Next) -> Response {
    let trace_id = trace_id_from_headers(req.headers()).unwrap_or_else(Uuid::new_v4);
    req.extensions_mut().insert(TraceId(trace_id));
    let span = info_span!(
        "http.request",
        trace_id = %trace_id,
        method = %req.method(),
        uri = %req.uri(),
    );
    let mut resp = next.run(req).instrument(span.clone()).await;
    span.in_scope(|| debug!(status = resp.status().as_u16(), "Request finished"));
    if let Ok(value) = HeaderValue::from_str(&trace_id.to_string()) {
        resp.headers_mut().insert(TRACE_HEADER, value);
    }
    resp
}
