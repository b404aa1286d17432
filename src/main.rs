//! company-api: serves the company REST API on `LISTEN_ADDR` against the database at `ADDR`.
//!
//! Run from repo root: `cargo run -p company-api`

use company_api::{
    apply_migrations, app_router, builtin, ensure_database_exists, load_from_path, resolve, AppState, Settings,
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("company_api=info,tower_http=info")),
        )
        .init();

    let settings = Settings::from_env();
    let config = match &settings.schema_path {
        Some(dir) => {
            tracing::info!(path = %dir.display(), "loading schema definition");
            load_from_path(dir).await?
        }
        None => builtin(),
    };
    let model = resolve(&config)?;

    ensure_database_exists(&settings.database_url).await?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&settings.database_url)
        .await?;
    apply_migrations(&pool, &config).await?;

    let state = AppState {
        pool,
        model: Arc::new(model),
    };
    let app = app_router(state);
    let listener = TcpListener::bind(&settings.listen_addr).await?;
    tracing::info!("company-api listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
