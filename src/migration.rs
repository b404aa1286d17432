//! Schema bootstrap: CREATE TABLE IF NOT EXISTS for every configured table, in dependency order,
//! with primary keys, unique constraints and foreign keys declared inline.

use crate::config::types::*;
use crate::config::{validate, FullConfig};
use crate::error::{AppError, ConfigError};
use crate::sql::quoted;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};

/// Apply the schema. Safe to run against a database that already holds the tables and their rows.
pub async fn apply_migrations(pool: &PgPool, config: &FullConfig) -> Result<(), AppError> {
    for sql in create_table_statements(config)? {
        tracing::debug!(sql = %sql, "migration");
        sqlx::query(&sql).execute(pool).await?;
    }
    tracing::info!(tables = config.tables.len(), "schema ready");
    Ok(())
}

/// DDL for all tables; referenced tables come before the tables that reference them.
pub fn create_table_statements(config: &FullConfig) -> Result<Vec<String>, ConfigError> {
    validate(config)?;

    let tables_by_id: HashMap<_, _> = config.tables.iter().map(|t| (t.id.as_str(), t)).collect();
    let columns_by_id: HashMap<_, _> = config.columns.iter().map(|c| (c.id.as_str(), c)).collect();
    let columns_by_table: HashMap<_, Vec<&ColumnConfig>> = config.columns.iter().fold(
        HashMap::new(),
        |mut m, c| {
            m.entry(c.table_id.as_str()).or_default().push(c);
            m
        },
    );

    let mut out = Vec::with_capacity(config.tables.len());
    for t in dependency_order(config)? {
        let cols = columns_by_table
            .get(t.id.as_str())
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        let mut defs: Vec<String> = Vec::new();
        for c in cols {
            let mut def = format!("{} {}", quoted(&c.name), c.type_.sql());
            if !c.nullable {
                def.push_str(" NOT NULL");
            }
            if let Some(d) = &c.default {
                def.push_str(" DEFAULT ");
                def.push_str(d);
            }
            defs.push(def);
        }

        let pk: Vec<String> = t.primary_key.columns().into_iter().map(quoted).collect();
        defs.push(format!("PRIMARY KEY ({})", pk.join(", ")));

        for u in &t.unique {
            let cols: Vec<String> = u.iter().map(|s| quoted(s)).collect();
            defs.push(format!("UNIQUE ({})", cols.join(", ")));
        }

        for rel in config.relationships.iter().filter(|r| r.from_table_id == t.id) {
            let missing = |id: &str| ConfigError::MissingReference {
                kind: "column",
                id: id.to_string(),
            };
            let from_col = columns_by_id
                .get(rel.from_column_id.as_str())
                .ok_or_else(|| missing(&rel.from_column_id))?;
            let to_col = columns_by_id
                .get(rel.to_column_id.as_str())
                .ok_or_else(|| missing(&rel.to_column_id))?;
            let to_table = tables_by_id
                .get(rel.to_table_id.as_str())
                .ok_or_else(|| ConfigError::MissingReference {
                    kind: "table",
                    id: rel.to_table_id.clone(),
                })?;
            let constraint = rel.name.as_deref().unwrap_or(&rel.id);
            defs.push(format!(
                "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
                quoted(constraint),
                quoted(&from_col.name),
                quoted(&to_table.name),
                quoted(&to_col.name),
                rel.on_delete.as_deref().unwrap_or("NO ACTION")
            ));
        }

        out.push(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            quoted(&t.name),
            defs.join(",\n  ")
        ));
    }
    Ok(out)
}

fn dependency_order(config: &FullConfig) -> Result<Vec<&TableConfig>, ConfigError> {
    let mut done: HashSet<&str> = HashSet::new();
    let mut ordered = Vec::with_capacity(config.tables.len());
    while ordered.len() < config.tables.len() {
        let before = ordered.len();
        for t in &config.tables {
            if done.contains(t.id.as_str()) {
                continue;
            }
            let ready = config
                .relationships
                .iter()
                .filter(|r| r.from_table_id == t.id && r.to_table_id != t.id)
                .all(|r| done.contains(r.to_table_id.as_str()));
            if ready {
                done.insert(t.id.as_str());
                ordered.push(t);
            }
        }
        if ordered.len() == before {
            let stuck: Vec<&str> = config
                .tables
                .iter()
                .map(|t| t.id.as_str())
                .filter(|id| !done.contains(id))
                .collect();
            return Err(ConfigError::Load(format!("foreign key cycle between tables {:?}", stuck)));
        }
    }
    Ok(ordered)
}
