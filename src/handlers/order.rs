//! Order handlers. Orders carry a nested customer and product list on the wire.

use crate::config::EntityRole;
use crate::error::AppError;
use crate::response::{json_result, text_result};
use crate::service::{CrudService, RequestValidator};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
};
use std::collections::HashMap;

const PRODUCT_ID_PARAM: &str = "productID";
const MISSING_CUSTOMER: &str = "must specify user";

pub async fn list_all(State(state): State<AppState>) -> Result<Response, AppError> {
    let rows = CrudService::list_orders(&state.pool, &state.model).await?;
    json_result(StatusCode::OK, &rows)
}

pub async fn create_one(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    let body = RequestValidator::parse_object(&body)?;
    let customer_id = RequestValidator::reference_id(&body, "customer", MISSING_CUSTOMER)?;
    let product_ids = RequestValidator::product_ids(&body)?;
    let values = RequestValidator::entity_values(&state.model.order, &body)?;
    let order = CrudService::create_order(&state.pool, &state.model, &values, customer_id, &product_ids).await?;
    json_result(StatusCode::CREATED, &order)
}

pub async fn read_one(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, AppError> {
    let id = RequestValidator::parse_id(&id)?;
    let order = CrudService::read_order(&state.pool, &state.model, id)
        .await?
        .ok_or_else(|| not_found(id))?;
    json_result(StatusCode::OK, &order)
}

pub async fn update_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    let id = RequestValidator::parse_id(&id)?;
    let body = RequestValidator::parse_object(&body)?;
    let customer_id = RequestValidator::reference_id(&body, "customer", MISSING_CUSTOMER)?;
    let values = RequestValidator::entity_values(&state.model.order, &body)?;
    let order = CrudService::update_order(&state.pool, &state.model, id, &values, customer_id)
        .await?
        .ok_or_else(|| not_found(id))?;
    json_result(StatusCode::OK, &order)
}

pub async fn delete_one(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, AppError> {
    let id = RequestValidator::parse_id(&id)?;
    if !CrudService::delete_order(&state.pool, &state.model, id).await? {
        return Err(not_found(id));
    }
    Ok(text_result(StatusCode::OK, "ok"))
}

/// POST /order/:id/product?productID=N
pub async fn add_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let order_id = RequestValidator::parse_id(&id)?;
    let raw = params
        .get(PRODUCT_ID_PARAM)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("missing query param {:?}", PRODUCT_ID_PARAM)))?;
    let product_id = RequestValidator::parse_id(raw)?;
    let order = CrudService::add_product_to_order(&state.pool, &state.model, order_id, product_id).await?;
    json_result(StatusCode::OK, &order)
}

fn not_found(id: i64) -> AppError {
    AppError::NotFound(format!("{} {}", EntityRole::Order.path_segment(), id))
}
