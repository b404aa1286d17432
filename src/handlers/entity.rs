//! Customer and product handlers: list, create, read, update, delete.

use crate::config::EntityRole;
use crate::error::AppError;
use crate::response::{json_result, text_result};
use crate::service::{CrudService, RequestValidator};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};

pub async fn list(state: &AppState, role: EntityRole) -> Result<Response, AppError> {
    let rows = CrudService::list(&state.pool, state.model.entity(role)).await?;
    json_result(StatusCode::OK, &rows)
}

pub async fn create(state: &AppState, role: EntityRole, body: &[u8]) -> Result<Response, AppError> {
    let entity = state.model.entity(role);
    let body = RequestValidator::parse_object(body)?;
    let values = RequestValidator::entity_values(entity, &body)?;
    let row = CrudService::create(&state.pool, entity, &values).await?;
    json_result(StatusCode::CREATED, &row)
}

pub async fn read(state: &AppState, role: EntityRole, id_str: &str) -> Result<Response, AppError> {
    let id = RequestValidator::parse_id(id_str)?;
    let row = CrudService::read(&state.pool, state.model.entity(role), id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} {}", role.path_segment(), id)))?;
    json_result(StatusCode::OK, &row)
}

pub async fn update(state: &AppState, role: EntityRole, id_str: &str, body: &[u8]) -> Result<Response, AppError> {
    let entity = state.model.entity(role);
    let id = RequestValidator::parse_id(id_str)?;
    let body = RequestValidator::parse_object(body)?;
    let values = RequestValidator::entity_values(entity, &body)?;
    let row = CrudService::update(&state.pool, entity, id, &values)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} {}", role.path_segment(), id)))?;
    json_result(StatusCode::OK, &row)
}

pub async fn delete(state: &AppState, role: EntityRole, id_str: &str) -> Result<Response, AppError> {
    let id = RequestValidator::parse_id(id_str)?;
    if !CrudService::delete(&state.pool, state.model.entity(role), id).await? {
        return Err(AppError::NotFound(format!("{} {}", role.path_segment(), id)));
    }
    Ok(text_result(StatusCode::OK, "ok"))
}

macro_rules! entity_handlers {
    ($module:ident, $role:expr) => {
        pub mod $module {
            use super::*;

            pub async fn list_all(State(state): State<AppState>) -> Result<Response, AppError> {
                list(&state, $role).await
            }

            pub async fn create_one(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
                create(&state, $role, &body).await
            }

            pub async fn read_one(
                State(state): State<AppState>,
                Path(id): Path<String>,
            ) -> Result<Response, AppError> {
                read(&state, $role, &id).await
            }

            pub async fn update_one(
                State(state): State<AppState>,
                Path(id): Path<String>,
                body: Bytes,
            ) -> Result<Response, AppError> {
                update(&state, $role, &id, &body).await
            }

            pub async fn delete_one(
                State(state): State<AppState>,
                Path(id): Path<String>,
            ) -> Result<Response, AppError> {
                delete(&state, $role, &id).await
            }
        }
    };
}

entity_handlers!(customer, EntityRole::Customer);
entity_handlers!(product, EntityRole::Product);
