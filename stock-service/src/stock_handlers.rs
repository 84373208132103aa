use crate::context::RequestCtx;
use crate::ledger::NewStock;
use crate::model::{ListResponse, StockRecord};
use crate::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use common_http_errors::ApiResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct AddStockRequest {
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct AddStockResponse {
    pub ok: bool,
    pub stock: StockRecord,
}

pub async fn list_stock(
    State(state): State<AppState>,
    ctx: RequestCtx,
    Path(company_id): Path<String>,
) -> ApiResult<Json<ListResponse<StockRecord>>> {
    let records = state.ledger.list(&company_id).await.map_err(|e| e.into_api(ctx.trace()))?;
    Ok(Json(records.into()))
}

pub async fn get_stock(
    State(state): State<AppState>,
    ctx: RequestCtx,
    Path((company_id, product_id)): Path<(String, String)>,
) -> ApiResult<Json<StockRecord>> {
    let record = state.ledger.get(&company_id, &product_id).await.map_err(|e| e.into_api(ctx.trace()))?;
    Ok(Json(record))
}

pub async fn initialize_stock(
    State(state): State<AppState>,
    ctx: RequestCtx,
    Path(company_id): Path<String>,
    payload: Result<Json<NewStock>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<StockRecord>)> {
    let input = ctx.body(payload)?;
    let record = state.ledger.initialize(&company_id, input).await.map_err(|e| e.into_api(ctx.trace()))?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Signed adjustment; negative amounts take stock out.
pub async fn add_stock(
    State(state): State<AppState>,
    ctx: RequestCtx,
    Path((company_id, product_id)): Path<(String, String)>,
    payload: Result<Json<AddStockRequest>, JsonRejection>,
) -> ApiResult<Json<AddStockResponse>> {
    let AddStockRequest { amount } = ctx.body(payload)?;
    let stock = state
        .ledger
        .adjust(&company_id, &product_id, amount)
        .await
        .map_err(|e| e.into_api(ctx.trace()))?;
    Ok(Json(AddStockResponse { ok: true, stock }))
}
