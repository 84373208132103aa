use crate::context::RequestCtx;
use crate::model::{ListResponse, Order};
use crate::orders::{NewOrder, OrderUpdate};
use crate::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use common_http_errors::{ApiError, ApiResult};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedOrder {
    pub company_id: String,
    pub order_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct DeleteOrderResponse {
    pub ok: bool,
    pub deleted: DeletedOrder,
}

fn parse_order_id(raw: &str, ctx: &RequestCtx) -> ApiResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::BadRequest {
        code: "invalid_order_id",
        trace_id: ctx.trace(),
        message: Some(format!("'{raw}' is not a valid order id")),
    })
}

pub async fn create_order(
    State(state): State<AppState>,
    ctx: RequestCtx,
    payload: Result<Json<NewOrder>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Order>)> {
    let request = ctx.body(payload)?;
    let order = state.orders.create(request).await.map_err(|e| e.into_api(ctx.trace()))?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn list_orders(
    State(state): State<AppState>,
    ctx: RequestCtx,
    Path(company_id): Path<String>,
) -> ApiResult<Json<ListResponse<Order>>> {
    let orders = state.orders.list(&company_id).await.map_err(|e| e.into_api(ctx.trace()))?;
    Ok(Json(orders.into()))
}

pub async fn get_order(
    State(state): State<AppState>,
    ctx: RequestCtx,
    Path((company_id, order_id)): Path<(String, String)>,
) -> ApiResult<Json<Order>> {
    let order_id = parse_order_id(&order_id, &ctx)?;
    let order = state.orders.get(&company_id, order_id).await.map_err(|e| e.into_api(ctx.trace()))?;
    Ok(Json(order))
}

pub async fn update_order(
    State(state): State<AppState>,
    ctx: RequestCtx,
    Path((company_id, order_id)): Path<(String, String)>,
    payload: Result<Json<OrderUpdate>, JsonRejection>,
) -> ApiResult<Json<Order>> {
    let order_id = parse_order_id(&order_id, &ctx)?;
    let update = ctx.body(payload)?;
    let order = state
        .orders
        .update(&company_id, order_id, update)
        .await
        .map_err(|e| e.into_api(ctx.trace()))?;
    Ok(Json(order))
}

pub async fn delete_order(
    State(state): State<AppState>,
    ctx: RequestCtx,
    Path((company_id, order_id)): Path<(String, String)>,
) -> ApiResult<Json<DeleteOrderResponse>> {
    let order_id = parse_order_id(&order_id, &ctx)?;
    let order = state.orders.delete(&company_id, order_id).await.map_err(|e| e.into_api(ctx.trace()))?;
    Ok(Json(DeleteOrderResponse {
        ok: true,
        deleted: DeletedOrder { company_id: order.company_id, order_id: order.order_id },
    }))
}
