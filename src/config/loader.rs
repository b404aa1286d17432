//! Schema definition sources: the builtin company schema, or JSON files from a directory.

use crate::config::resolved::{ColumnInfo, ResolvedEntity, ResolvedModel};
use crate::config::types::*;
use crate::config::validate;
use crate::error::ConfigError;
use std::collections::HashMap;
use std::path::Path;

/// The canonical company schema: customers, products, orders and the order/product join table.
pub fn builtin() -> FullConfig {
    let tables = vec![
        table("customers", EntityRole::Customer, PrimaryKeyConfig::Single("id".into()), vec![]),
        table(
            "products",
            EntityRole::Product,
            PrimaryKeyConfig::Single("id".into()),
            vec![vec!["name".into()]],
        ),
        table("orders", EntityRole::Order, PrimaryKeyConfig::Single("id".into()), vec![]),
        table(
            "order_products",
            EntityRole::OrderProduct,
            PrimaryKeyConfig::Composite(vec!["order_id".into(), "product_id".into()]),
            vec![],
        ),
    ];
    let columns = vec![
        column("customers", "id", ColumnRole::Id, id_type(), false),
        column("customers", "name", ColumnRole::Name, text_type(), false),
        column("products", "id", ColumnRole::Id, id_type(), false),
        column("products", "name", ColumnRole::Name, text_type(), false),
        column("products", "price", ColumnRole::Price, money_type(), false),
        column("orders", "id", ColumnRole::Id, id_type(), false),
        column("orders", "subtotal", ColumnRole::Subtotal, money_type(), false),
        column("orders", "customer_id", ColumnRole::CustomerRef, ref_type(), false),
        column("order_products", "order_id", ColumnRole::OrderRef, ref_type(), false),
        column("order_products", "product_id", ColumnRole::ProductRef, ref_type(), false),
    ];
    let relationships = vec![
        relationship("orders_customer", "orders", "customer_id", "customers", "id", None),
        relationship(
            "order_products_order",
            "order_products",
            "order_id",
            "orders",
            "id",
            Some("CASCADE"),
        ),
        relationship("order_products_product", "order_products", "product_id", "products", "id", None),
    ];
    FullConfig {
        tables,
        columns,
        relationships,
    }
}

fn table(id: &str, role: EntityRole, primary_key: PrimaryKeyConfig, unique: Vec<Vec<String>>) -> TableConfig {
    TableConfig {
        id: id.into(),
        role,
        name: id.into(),
        primary_key,
        unique,
    }
}

fn column(table_id: &str, name: &str, role: ColumnRole, type_: ColumnTypeConfig, nullable: bool) -> ColumnConfig {
    ColumnConfig {
        id: format!("{}.{}", table_id, name),
        table_id: table_id.into(),
        name: name.into(),
        role,
        type_,
        nullable,
        default: None,
    }
}

fn relationship(
    id: &str,
    from_table: &str,
    from_column: &str,
    to_table: &str,
    to_column: &str,
    on_delete: Option<&str>,
) -> RelationshipConfig {
    RelationshipConfig {
        id: id.into(),
        from_table_id: from_table.into(),
        from_column_id: format!("{}.{}", from_table, from_column),
        to_table_id: to_table.into(),
        to_column_id: format!("{}.{}", to_table, to_column),
        on_delete: on_delete.map(String::from),
        name: None,
    }
}

fn id_type() -> ColumnTypeConfig {
    ColumnTypeConfig::Simple("BIGSERIAL".into())
}

fn text_type() -> ColumnTypeConfig {
    ColumnTypeConfig::Simple("TEXT".into())
}

fn ref_type() -> ColumnTypeConfig {
    ColumnTypeConfig::Simple("INT8".into())
}

fn money_type() -> ColumnTypeConfig {
    ColumnTypeConfig::Parameterized {
        name: "DECIMAL".into(),
        params: Some(vec![18, 2]),
    }
}

/// Read `tables.json`, `columns.json` and `relationships.json` from `dir`.
pub async fn load_from_path(dir: &Path) -> Result<FullConfig, ConfigError> {
    let tables = load_json_file::<TableConfig>(&dir.join("tables.json")).await?;
    let columns = load_json_file::<ColumnConfig>(&dir.join("columns.json")).await?;
    let relationships = load_json_file::<RelationshipConfig>(&dir.join("relationships.json")).await?;
    let config = FullConfig {
        tables,
        columns,
        relationships,
    };
    validate(&config)?;
    Ok(config)
}

async fn load_json_file<T>(path: &Path) -> Result<Vec<T>, ConfigError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    tracing::debug!(path = %path.display(), "loading schema file");
    let raw = tokio::fs::read(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    serde_json::from_slice(&raw).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}

/// Build resolved model from full config (validates first).
pub fn resolve(config: &FullConfig) -> Result<ResolvedModel, ConfigError> {
    validate(config)?;

    let columns_by_table: HashMap<_, Vec<&ColumnConfig>> = config
        .columns
        .iter()
        .fold(HashMap::new(), |mut m, c| {
            m.entry(c.table_id.as_str()).or_default().push(c);
            m
        });

    let mut by_role: HashMap<EntityRole, ResolvedEntity> = HashMap::new();
    for t in &config.tables {
        let table_columns = columns_by_table
            .get(t.id.as_str())
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        let columns = table_columns
            .iter()
            .map(|c| {
                let sql_type = c.type_.sql();
                let has_default = c.default.is_some() || sql_type.to_lowercase().contains("serial");
                ColumnInfo {
                    name: c.name.clone(),
                    role: c.role,
                    sql_type: cast_type(&sql_type),
                    nullable: c.nullable,
                    has_default,
                }
            })
            .collect();
        by_role.insert(
            t.role,
            ResolvedEntity {
                role: t.role,
                table_name: t.name.clone(),
                pk_columns: t.primary_key.columns().into_iter().map(String::from).collect(),
                columns,
            },
        );
    }

    let mut take = |role: EntityRole| {
        by_role.remove(&role).ok_or_else(|| ConfigError::MissingRole {
            kind: "entity",
            role: format!("{:?}", role),
        })
    };
    Ok(ResolvedModel {
        customer: take(EntityRole::Customer)?,
        product: take(EntityRole::Product)?,
        order: take(EntityRole::Order)?,
        order_product: take(EntityRole::OrderProduct)?,
    })
}

/// Serial pseudo-types cannot appear in casts; use the integer type they expand to.
fn cast_type(sql_type: &str) -> String {
    match sql_type.to_lowercase().as_str() {
        "serial" | "serial4" => "INT4".into(),
        "bigserial" | "serial8" => "INT8".into(),
        "smallserial" | "serial2" => "INT2".into(),
        _ => sql_type.to_string(),
    }
}
