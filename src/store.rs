//! Database bootstrap helpers that run before the pool exists.

use crate::error::{AppError, ConfigError};
use crate::sql::quoted;
use sqlx::postgres::PgConnectOptions;
use sqlx::ConnectOptions;
use std::str::FromStr;

/// Create the database named in `database_url` if it does not exist yet, by connecting to
/// the `postgres` maintenance database with the same credentials and TLS settings.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let opts = PgConnectOptions::from_str(database_url)
        .map_err(|e| ConfigError::Load(format!("invalid database URL: {}", e)))?;
    let Some(db_name) = target_database(&opts) else {
        return Ok(());
    };
    let mut conn = opts.database("postgres").connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", quoted(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

/// Database to create, or `None` when the URL already points at a maintenance database.
fn target_database(opts: &PgConnectOptions) -> Option<String> {
    opts.get_database()
        .map(str::trim)
        .filter(|db| !db.is_empty() && *db != "postgres" && *db != "defaultdb")
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_database_from_url_with_cert_paths() {
        let opts = PgConnectOptions::from_str(
            "postgresql://root@localhost:26257/company_sqlx?sslmode=verify-full&sslrootcert=/tmp/certs/ca.crt",
        )
        .unwrap();
        assert_eq!(target_database(&opts).as_deref(), Some("company_sqlx"));
    }

    #[test]
    fn maintenance_databases_are_skipped() {
        for url in [
            "postgresql://root@localhost:26257/postgres",
            "postgresql://root@localhost:26257/defaultdb",
            "postgresql://root@localhost:26257",
        ] {
            let opts = PgConnectOptions::from_str(url).unwrap();
            assert_eq!(target_database(&opts), None, "{}", url);
        }
    }
}
