//! Table and column names each ORM generates for the company model.

use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableShape {
    pub name: String,
    pub columns: BTreeSet<String>,
}

impl TableShape {
    fn new(name: &str, columns: &[&str]) -> Self {
        TableShape {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Columns the SQL-level checks read values from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueColumns {
    pub customer_name: String,
    pub product_name: String,
    pub product_price: String,
    pub order_subtotal: String,
    pub link_order: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectedSchema {
    pub customers: TableShape,
    pub products: TableShape,
    pub orders: TableShape,
    pub order_products: TableShape,
    /// Bookkeeping tables the ORM creates alongside the model.
    pub extra_tables: Vec<String>,
    pub values: ValueColumns,
}

impl ExpectedSchema {
    /// Names used by gorm, go-pg, jOOQ, sequelize and the Rust binding.
    pub fn standard() -> Self {
        ExpectedSchema {
            customers: TableShape::new("customers", &["id", "name"]),
            products: TableShape::new("products", &["id", "name", "price"]),
            orders: TableShape::new("orders", &["customer_id", "id", "subtotal"]),
            order_products: TableShape::new("order_products", &["order_id", "product_id"]),
            extra_tables: Vec::new(),
            values: ValueColumns {
                customer_name: "name".into(),
                product_name: "name".into(),
                product_price: "price".into(),
                order_subtotal: "subtotal".into(),
                link_order: "order_id".into(),
            },
        }
    }

    pub fn hibernate() -> Self {
        let mut schema = ExpectedSchema::standard();
        schema.products = TableShape::new("products", &["id", "name", "product"]);
        schema.order_products = TableShape::new("product_orders", &["order_id", "product_id"]);
        schema.values.product_price = "product".into();
        schema
    }

    /// Rails adds a surrogate `rowid` to the join table plus its own metadata tables.
    pub fn active_record() -> Self {
        let mut schema = ExpectedSchema::standard();
        schema.order_products = TableShape::new("order_products", &["order_id", "product_id", "rowid"]);
        schema.extra_tables = vec!["ar_internal_metadata".into(), "schema_migrations".into()];
        schema
    }

    pub fn django() -> Self {
        ExpectedSchema {
            customers: TableShape::new("cockroach_example_customers", &["id", "name"]),
            products: TableShape::new("cockroach_example_products", &["id", "name", "price"]),
            orders: TableShape::new("cockroach_example_orders", &["customer_id", "id", "subtotal"]),
            order_products: TableShape::new("cockroach_example_orders_product", &["id", "orders_id", "products_id"]),
            extra_tables: [
                "auth_group",
                "auth_group_permissions",
                "auth_permission",
                "auth_user",
                "auth_user_groups",
                "auth_user_user_permissions",
                "django_admin_log",
                "django_content_type",
                "django_migrations",
                "django_session",
            ]
            .iter()
            .map(|t| t.to_string())
            .collect(),
            values: ValueColumns {
                link_order: "orders_id".into(),
                ..ExpectedSchema::standard().values
            },
        }
    }

    pub fn model_tables(&self) -> [&TableShape; 4] {
        [&self.customers, &self.products, &self.orders, &self.order_products]
    }

    /// Every table the database should contain after the ORM ran its migrations, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .model_tables()
            .iter()
            .map(|t| t.name.clone())
            .chain(self.extra_tables.iter().cloned())
            .collect();
        names.sort();
        names
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_names_are_sorted() {
        assert_eq!(
            ExpectedSchema::standard().table_names(),
            vec!["customers", "order_products", "orders", "products"]
        );
    }

    #[test]
    fn django_includes_framework_tables() {
        let schema = ExpectedSchema::django();
        let names = schema.table_names();
        assert_eq!(names.len(), 14);
        assert!(names.contains(&"django_migrations".to_string()));
        assert_eq!(schema.values.link_order, "orders_id");
        assert!(schema.order_products.columns.contains("products_id"));
    }

    #[test]
    fn active_record_join_table_has_rowid() {
        let schema = ExpectedSchema::active_record();
        assert!(schema.order_products.columns.contains("rowid"));
        assert_eq!(schema.table_names()[0], "ar_internal_metadata");
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("company_gorm"), "\"company_gorm\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn hibernate_renames_join_table() {
        let schema = ExpectedSchema::hibernate();
        assert_eq!(schema.order_products.name, "product_orders");
        assert_eq!(schema.values.product_price, "product");
    }
}
