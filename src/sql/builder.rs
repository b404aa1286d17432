//! Builds parameterized SELECT, INSERT, UPDATE, DELETE from the resolved model.
//! Every selected column is aliased to its API key so rows convert straight to response JSON.

use crate::config::{ColumnInfo, ColumnRole, ResolvedEntity, ResolvedModel};
use serde_json::Value;

/// Quote identifier for PostgreSQL (safe: only from config).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

#[derive(Debug)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }
}

/// `$n::type` so text-bound values (decimals) land in the column's own type.
fn placeholder(n: u32, col: &ColumnInfo) -> String {
    format!("${}::{}", n, col.sql_type)
}

/// Column read expression: decimals as text so money never passes through a float.
fn column_expr(qualifier: Option<&str>, col: &ColumnInfo) -> String {
    let q = match qualifier {
        Some(alias) => format!("{}.{}", alias, quoted(&col.name)),
        None => quoted(&col.name),
    };
    if col.is_decimal() {
        format!("{}::TEXT", q)
    } else {
        q
    }
}

fn select_column_list(entity: &ResolvedEntity, qualifier: Option<&str>) -> String {
    entity
        .columns
        .iter()
        .map(|c| format!("{} AS {}", column_expr(qualifier, c), quoted(c.role.api_key())))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `json_build_object(...)` of an entity's columns, keyed by API key.
fn json_object_expr(entity: &ResolvedEntity, alias: &str) -> String {
    let pairs: Vec<String> = entity
        .columns
        .iter()
        .map(|c| format!("'{}', {}", c.role.api_key(), column_expr(Some(alias), c)))
        .collect();
    format!("json_build_object({})", pairs.join(", "))
}

fn pk_column(entity: &ResolvedEntity) -> &ColumnInfo {
    let pk = &entity.pk_columns[0];
    entity
        .columns
        .iter()
        .find(|c| &c.name == pk)
        .unwrap_or(&entity.columns[0])
}

/// SELECT all rows ordered by primary key.
pub fn select_list(entity: &ResolvedEntity) -> QueryBuf {
    let mut q = QueryBuf::new();
    let pk = pk_column(entity);
    q.sql = format!(
        "SELECT {} FROM {} ORDER BY {}",
        select_column_list(entity, None),
        quoted(&entity.table_name),
        quoted(&pk.name)
    );
    q
}

/// SELECT by primary key (single column PK only). Caller binds the id as the sole param.
pub fn select_by_id(entity: &ResolvedEntity) -> QueryBuf {
    let mut q = QueryBuf::new();
    let pk = pk_column(entity);
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} = {}",
        select_column_list(entity, None),
        quoted(&entity.table_name),
        quoted(&pk.name),
        placeholder(1, pk)
    );
    q
}

/// INSERT the given (role, value) pairs. Columns not mentioned take their DB default.
pub fn insert(entity: &ResolvedEntity, values: &[(ColumnRole, Value)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = quoted(&entity.table_name);
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for (role, v) in values {
        let Some(c) = entity.column(*role) else { continue };
        let n = q.push_param(v.clone());
        cols.push(quoted(&c.name));
        placeholders.push(placeholder(n, c));
    }
    let returning = select_column_list(entity, None);
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table,
            cols.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    q
}

/// UPDATE by id: SET each given column, leaving the primary key untouched.
pub fn update(entity: &ResolvedEntity, id: &Value, values: &[(ColumnRole, Value)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = quoted(&entity.table_name);
    let pk = pk_column(entity);
    let mut sets = Vec::new();
    for (role, v) in values {
        let Some(c) = entity.column(*role) else { continue };
        if c.name == pk.name {
            continue;
        }
        let n = q.push_param(v.clone());
        sets.push(format!("{} = {}", quoted(&c.name), placeholder(n, c)));
    }
    let returning = select_column_list(entity, None);
    let id_param = q.push_param(id.clone());
    if sets.is_empty() {
        q.sql = format!(
            "SELECT {} FROM {} WHERE {} = {}",
            returning,
            table,
            quoted(&pk.name),
            placeholder(id_param, pk)
        );
        return q;
    }
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {} RETURNING {}",
        table,
        sets.join(", "),
        quoted(&pk.name),
        placeholder(id_param, pk),
        returning
    );
    q
}

/// DELETE by id. Caller binds the id and checks rows affected.
pub fn delete(entity: &ResolvedEntity) -> QueryBuf {
    let mut q = QueryBuf::new();
    let pk = pk_column(entity);
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        quoted(&entity.table_name),
        quoted(&pk.name),
        placeholder(1, pk)
    );
    q
}

/// Orders with their customer and products nested as JSON. With `by_id` the order id is `$1`.
pub fn select_orders(model: &ResolvedModel, by_id: bool) -> QueryBuf {
    let mut q = QueryBuf::new();
    let order = &model.order;
    let customer = &model.customer;
    let product = &model.product;
    let join = &model.order_product;

    let order_pk = pk_column(order);
    let order_cols: Vec<String> = order
        .columns
        .iter()
        .filter(|c| c.role != ColumnRole::CustomerRef)
        .map(|c| format!("{} AS {}", column_expr(Some("o"), c), quoted(c.role.api_key())))
        .collect();

    let customer_sub = format!(
        "(SELECT {} FROM {} c WHERE c.{} = o.{})",
        json_object_expr(customer, "c"),
        quoted(&customer.table_name),
        quoted(&pk_column(customer).name),
        quoted(order.column_name(ColumnRole::CustomerRef))
    );
    let product_pk = quoted(&pk_column(product).name);
    let products_sub = format!(
        "(SELECT COALESCE(json_agg({} ORDER BY p.{}), '[]'::JSON) FROM {} j JOIN {} p ON p.{} = j.{} WHERE j.{} = o.{})",
        json_object_expr(product, "p"),
        product_pk,
        quoted(&join.table_name),
        quoted(&product.table_name),
        product_pk,
        quoted(join.column_name(ColumnRole::ProductRef)),
        quoted(join.column_name(ColumnRole::OrderRef)),
        quoted(&order_pk.name)
    );

    let where_clause = if by_id {
        format!(" WHERE o.{} = {}", quoted(&order_pk.name), placeholder(1, order_pk))
    } else {
        String::new()
    };
    q.sql = format!(
        "SELECT {}, {} AS \"customer\", {} AS \"products\" FROM {} o{} ORDER BY o.{}",
        order_cols.join(", "),
        customer_sub,
        products_sub,
        quoted(&order.table_name),
        where_clause,
        quoted(&order_pk.name)
    );
    q
}

/// INSERT one join row; params are `$1` order id, `$2` product id.
pub fn insert_order_product(model: &ResolvedModel) -> QueryBuf {
    let mut q = QueryBuf::new();
    let join = &model.order_product;
    let order_col = join.column(ColumnRole::OrderRef);
    let product_col = join.column(ColumnRole::ProductRef);
    let ph = |n: u32, c: Option<&ColumnInfo>| match c {
        Some(c) => placeholder(n, c),
        None => format!("${}", n),
    };
    q.sql = format!(
        "INSERT INTO {} ({}, {}) VALUES ({}, {})",
        quoted(&join.table_name),
        quoted(join.column_name(ColumnRole::OrderRef)),
        quoted(join.column_name(ColumnRole::ProductRef)),
        ph(1, order_col),
        ph(2, product_col)
    );
    q
}

/// DELETE all join rows of one order (`$1`).
pub fn delete_order_products(model: &ResolvedModel) -> QueryBuf {
    let mut q = QueryBuf::new();
    let join = &model.order_product;
    let ph = join
        .column(ColumnRole::OrderRef)
        .map(|c| placeholder(1, c))
        .unwrap_or_else(|| "$1".into());
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        quoted(&join.table_name),
        quoted(join.column_name(ColumnRole::OrderRef)),
        ph
    );
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{builtin, resolve};
    use serde_json::json;

    fn model() -> ResolvedModel {
        resolve(&builtin()).unwrap()
    }

    #[test]
    fn list_reads_decimals_as_text_in_pk_order() {
        let m = model();
        let q = select_list(&m.product);
        assert_eq!(
            q.sql,
            "SELECT \"id\" AS \"id\", \"name\" AS \"name\", \"price\"::TEXT AS \"price\" FROM \"products\" ORDER BY \"id\""
        );
        assert!(q.params.is_empty());
    }

    #[test]
    fn insert_casts_each_placeholder() {
        let m = model();
        let q = insert(
            &m.product,
            &[(ColumnRole::Name, json!("Ice Cream")), (ColumnRole::Price, json!("123.4"))],
        );
        assert!(q.sql.starts_with(
            "INSERT INTO \"products\" (\"name\", \"price\") VALUES ($1::TEXT, $2::DECIMAL(18,2)) RETURNING "
        ));
        assert_eq!(q.params, vec![json!("Ice Cream"), json!("123.4")]);
    }

    #[test]
    fn update_binds_id_last_and_skips_pk() {
        let m = model();
        let q = update(
            &m.customer,
            &json!(7),
            &[(ColumnRole::Id, json!(99)), (ColumnRole::Name, json!("Bob"))],
        );
        assert!(q.sql.starts_with("UPDATE \"customers\" SET \"name\" = $1::TEXT WHERE \"id\" = $2::INT8"));
        assert_eq!(q.params, vec![json!("Bob"), json!(7)]);
    }

    #[test]
    fn update_without_columns_falls_back_to_select() {
        let m = model();
        let q = update(&m.customer, &json!(3), &[]);
        assert!(q.sql.starts_with("SELECT "));
        assert!(q.sql.ends_with("WHERE \"id\" = $1::INT8"));
    }

    #[test]
    fn delete_by_pk() {
        let m = model();
        assert_eq!(delete(&m.order).sql, "DELETE FROM \"orders\" WHERE \"id\" = $1::INT8");
    }

    #[test]
    fn orders_nest_customer_and_products() {
        let m = model();
        let q = select_orders(&m, true);
        assert!(q.sql.contains("o.\"subtotal\"::TEXT AS \"subtotal\""));
        assert!(!q.sql.contains("AS \"customer_id\""));
        assert!(q.sql.contains("json_build_object('id', c.\"id\", 'name', c.\"name\")"));
        assert!(q.sql.contains("'price', p.\"price\"::TEXT"));
        assert!(q.sql.contains("JOIN \"products\" p ON p.\"id\" = j.\"product_id\" WHERE j.\"order_id\" = o.\"id\""));
        assert!(q.sql.contains("WHERE o.\"id\" = $1::INT8"));
        assert!(!select_orders(&m, false).sql.contains("$1"));
    }

    #[test]
    fn join_statements_use_join_columns() {
        let m = model();
        assert_eq!(
            insert_order_product(&m).sql,
            "INSERT INTO \"order_products\" (\"order_id\", \"product_id\") VALUES ($1::INT8, $2::INT8)"
        );
        assert_eq!(
            delete_order_products(&m).sql,
            "DELETE FROM \"order_products\" WHERE \"order_id\" = $1::INT8"
        );
    }

    #[test]
    fn identifiers_are_escaped() {
        assert_eq!(quoted("we\"ird"), "\"we\"\"ird\"");
    }
}
