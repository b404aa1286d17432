//! Company REST API: customers, products and orders over a PostgreSQL-wire database.

pub mod config;
pub mod error;
pub mod migration;
pub mod response;
pub mod sql;
pub mod state;
pub mod store;
pub mod service;
pub mod handlers;
pub mod routes;

pub use config::{builtin, load_from_path, resolve, FullConfig, ResolvedEntity, ResolvedModel, Settings};
pub use error::{AppError, ConfigError};
pub use migration::apply_migrations;
pub use response::{json_result, text_result};
pub use state::AppState;
pub use store::ensure_database_exists;
pub use routes::{app_router, common_routes, entity_routes};
pub use service::CrudService;
