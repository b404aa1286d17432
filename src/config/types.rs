//! Raw schema definition types. Same JSON shapes as `tables.json`, `columns.json`, `relationships.json`.

use serde::{Deserialize, Serialize};

/// Which API resource a table backs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityRole {
    Customer,
    Product,
    Order,
    OrderProduct,
}

impl EntityRole {
    pub const ALL: [EntityRole; 4] = [
        EntityRole::Customer,
        EntityRole::Product,
        EntityRole::Order,
        EntityRole::OrderProduct,
    ];

    /// URL segment of the resource (`/customer`, `/product`, `/order`).
    pub fn path_segment(&self) -> &'static str {
        match self {
            EntityRole::Customer => "customer",
            EntityRole::Product => "product",
            EntityRole::Order => "order",
            EntityRole::OrderProduct => "order_product",
        }
    }
}

/// What a column means to the API. The JSON key of a column is derived from its role,
/// so table and column names can follow any naming convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Id,
    Name,
    Price,
    Subtotal,
    CustomerRef,
    OrderRef,
    ProductRef,
}

impl ColumnRole {
    pub fn api_key(&self) -> &'static str {
        match self {
            ColumnRole::Id => "id",
            ColumnRole::Name => "name",
            ColumnRole::Price => "price",
            ColumnRole::Subtotal => "subtotal",
            ColumnRole::CustomerRef => "customer_id",
            ColumnRole::OrderRef => "order_id",
            ColumnRole::ProductRef => "product_id",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKeyConfig {
    Single(String),
    Composite(Vec<String>),
}

impl PrimaryKeyConfig {
    pub fn columns(&self) -> Vec<&str> {
        match self {
            PrimaryKeyConfig::Single(s) => vec![s.as_str()],
            PrimaryKeyConfig::Composite(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableConfig {
    pub id: String,
    pub role: EntityRole,
    pub name: String,
    pub primary_key: PrimaryKeyConfig,
    #[serde(default)]
    pub unique: Vec<Vec<String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnTypeConfig {
    Simple(String),
    Parameterized { name: String, params: Option<Vec<u32>> },
}

impl ColumnTypeConfig {
    pub fn sql(&self) -> String {
        match self {
            ColumnTypeConfig::Simple(s) => s.clone(),
            ColumnTypeConfig::Parameterized { name, params: Some(p) } if !p.is_empty() => {
                let p: Vec<String> = p.iter().map(u32::to_string).collect();
                format!("{}({})", name, p.join(","))
            }
            ColumnTypeConfig::Parameterized { name, .. } => name.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub id: String,
    pub table_id: String,
    pub name: String,
    pub role: ColumnRole,
    #[serde(rename = "type")]
    pub type_: ColumnTypeConfig,
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// SQL default expression, e.g. `unique_rowid()`.
    #[serde(default)]
    pub default: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationshipConfig {
    pub id: String,
    pub from_table_id: String,
    pub from_column_id: String,
    pub to_table_id: String,
    pub to_column_id: String,
    #[serde(default)]
    pub on_delete: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// All config types in one struct for in-memory loading.
#[derive(Clone, Debug, Default)]
pub struct FullConfig {
    pub tables: Vec<TableConfig>,
    pub columns: Vec<ColumnConfig>,
    pub relationships: Vec<RelationshipConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameterized_type_renders_params() {
        let ty: ColumnTypeConfig =
            serde_json::from_value(serde_json::json!({"name": "DECIMAL", "params": [18, 2]})).unwrap();
        assert_eq!(ty.sql(), "DECIMAL(18,2)");
    }

    #[test]
    fn column_defaults_to_nullable() {
        let col: ColumnConfig = serde_json::from_value(serde_json::json!({
            "id": "c1", "table_id": "t1", "name": "name", "role": "name", "type": "TEXT"
        }))
        .unwrap();
        assert!(col.nullable);
        assert!(col.default.is_none());
    }

    #[test]
    fn composite_primary_key() {
        let pk: PrimaryKeyConfig = serde_json::from_value(serde_json::json!(["order_id", "product_id"])).unwrap();
        assert_eq!(pk.columns(), vec!["order_id", "product_id"]);
    }
}
