//! Common routes: liveness ping and database readiness.

use crate::response::{text_result, JSON_CONTENT_TYPE};
use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

/// Identifies this binding to the harness.
pub const PING_BODY: &str = "rust/sqlx";

#[derive(Serialize)]
struct ReadyBody {
    status: &'static str,
    database: &'static str,
}

async fn ping() -> Response {
    text_result(StatusCode::OK, PING_BODY)
}

async fn ready(State(state): State<AppState>) -> Response {
    let (status, body) = match sqlx::query("SELECT 1").fetch_optional(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            ReadyBody {
                status: "ok",
                database: "ok",
            },
        ),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                ReadyBody {
                    status: "degraded",
                    database: "unavailable",
                },
            )
        }
    };
    (status, [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)], Json(body)).into_response()
}

/// GET /ping and GET /ready.
pub fn common_routes(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/ready", get(ready))
        .with_state(state)
}
