use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header::{ACCEPT, CONTENT_TYPE}, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use common_events::EventSink;
use common_observability::StockMetrics;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::context::trace_requests;
use crate::ledger::StockLedger;
use crate::order_handlers::{create_order, delete_order, get_order, list_orders, update_order};
use crate::orders::OrderService;
use crate::stock_handlers::{add_stock, get_stock, initialize_stock, list_stock};
use crate::store::StockStore;

pub const SERVICE_NAME: &str = "stock-service";

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<StockLedger>,
    pub orders: Arc<OrderService>,
    pub metrics: StockMetrics,
}

impl AppState {
    pub fn new(store: Arc<dyn StockStore>, events: Arc<dyn EventSink>, metrics: StockMetrics) -> Self {
        let ledger = Arc::new(StockLedger::new(store, events, metrics.clone()));
        let orders = Arc::new(OrderService::new(ledger.clone()));
        Self { ledger, orders, metrics }
    }
}

pub async fn http_error_metrics(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let resp = next.run(req).await;
    let status = resp.status();
    if status.as_u16() >= 400 {
        let code = resp.headers().get("X-Error-Code").and_then(|v| v.to_str().ok()).unwrap_or("unknown");
        state.metrics.http_errors_total.with_label_values(&[SERVICE_NAME, code, status.as_str()]).inc();
    }
    resp
}

pub async fn health() -> &'static str { "ok" }

async fn metrics(State(state): State<AppState>) -> (StatusCode, String) {
    match state.metrics.render() {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("metrics encode error: {e}")),
    }
}

pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            allowed_origins.iter().filter_map(|o| o.parse::<HeaderValue>().ok()).collect::<Vec<_>>(),
        ))
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([ACCEPT, CONTENT_TYPE, HeaderName::from_static("x-trace-id")])
        .expose_headers([HeaderName::from_static("x-trace-id"), HeaderName::from_static("x-error-code")])
}

pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    let layers = ServiceBuilder::new()
        .layer(middleware::from_fn(trace_requests))
        .layer(middleware::from_fn_with_state(state.clone(), http_error_metrics))
        .layer(cors_layer(allowed_origins));

    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .route("/stock/:company_id", get(list_stock).post(initialize_stock))
        .route("/stock/:company_id/:product_id", get(get_stock))
        .route("/stock/:company_id/:product_id/add", post(add_stock))
        .route("/orders", post(create_order))
        .route("/orders/company/:company_id", get(list_orders))
        .route("/orders/:company_id/:order_id", get(get_order).patch(update_order).delete(delete_order))
        .with_state(state)
        .layer(layers)
}
