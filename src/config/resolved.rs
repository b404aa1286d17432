//! Resolved model: config validated and flattened for runtime use.

use crate::config::{ColumnRole, EntityRole};

#[derive(Clone, Debug)]
pub struct ColumnInfo {
    pub name: String,
    pub role: ColumnRole,
    /// Full SQL type, used for casts when binding (e.g. `DECIMAL(18,2)`, `INT8`).
    pub sql_type: String,
    pub nullable: bool,
    /// Whether the column has a DB default (serial, unique_rowid()).
    pub has_default: bool,
}

impl ColumnInfo {
    pub fn is_decimal(&self) -> bool {
        let t = self.sql_type.to_lowercase();
        t.starts_with("decimal") || t.starts_with("numeric")
    }

    pub fn is_integer(&self) -> bool {
        let t = self.sql_type.to_lowercase();
        t.contains("int") || t.contains("serial")
    }
}

#[derive(Clone, Debug)]
pub struct ResolvedEntity {
    pub role: EntityRole,
    pub table_name: String,
    pub pk_columns: Vec<String>,
    pub columns: Vec<ColumnInfo>,
}

impl ResolvedEntity {
    pub fn column(&self, role: ColumnRole) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.role == role)
    }

    /// Column name for a role the validator guarantees is present.
    pub fn column_name(&self, role: ColumnRole) -> &str {
        self.column(role).map(|c| c.name.as_str()).unwrap_or(role.api_key())
    }
}

#[derive(Clone, Debug)]
pub struct ResolvedModel {
    pub customer: ResolvedEntity,
    pub product: ResolvedEntity,
    pub order: ResolvedEntity,
    pub order_product: ResolvedEntity,
}

impl ResolvedModel {
    pub fn entity(&self, role: EntityRole) -> &ResolvedEntity {
        match role {
            EntityRole::Customer => &self.customer,
            EntityRole::Product => &self.product,
            EntityRole::Order => &self.order,
            EntityRole::OrderProduct => &self.order_product,
        }
    }
}
