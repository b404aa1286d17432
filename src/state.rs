//! Shared application state for all routes.

use crate::config::ResolvedModel;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    /// Resolved once at startup; the schema does not change while serving.
    pub model: Arc<ResolvedModel>,
}
