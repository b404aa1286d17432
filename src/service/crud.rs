//! CRUD execution for customers, products and orders.

use crate::config::{ColumnRole, ResolvedEntity, ResolvedModel};
use crate::error::AppError;
use crate::sql::{
    delete, delete_order_products, insert, insert_order_product, select_by_id, select_list, select_orders,
    update, PgBindValue, QueryBuf,
};
use serde_json::Value;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;
use sqlx::{PgExecutor, PgPool};

pub struct CrudService;

impl CrudService {
    /// All rows ordered by primary key.
    pub async fn list(pool: &PgPool, entity: &ResolvedEntity) -> Result<Vec<Value>, AppError> {
        let q = select_list(entity);
        Self::fetch_all(pool, &q).await
    }

    /// Fetch one row by primary key.
    pub async fn read<'c, E>(exec: E, entity: &ResolvedEntity, id: i64) -> Result<Option<Value>, AppError>
    where
        E: PgExecutor<'c>,
    {
        let mut q = select_by_id(entity);
        q.params.push(Value::from(id));
        Self::fetch_optional(exec, &q).await
    }

    /// Insert one row and return it as stored.
    pub async fn create(
        pool: &PgPool,
        entity: &ResolvedEntity,
        values: &[(ColumnRole, Value)],
    ) -> Result<Value, AppError> {
        let q = insert(entity, values);
        Self::fetch_optional(pool, &q)
            .await?
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))
    }

    /// Overwrite one row by id. `None` when no row has that id.
    pub async fn update(
        pool: &PgPool,
        entity: &ResolvedEntity,
        id: i64,
        values: &[(ColumnRole, Value)],
    ) -> Result<Option<Value>, AppError> {
        let q = update(entity, &Value::from(id), values);
        Self::fetch_optional(pool, &q).await
    }

    /// Delete one row by id. Returns false when nothing was deleted.
    pub async fn delete(pool: &PgPool, entity: &ResolvedEntity, id: i64) -> Result<bool, AppError> {
        let mut q = delete(entity);
        q.params.push(Value::from(id));
        Ok(Self::execute(pool, &q).await? > 0)
    }

    pub async fn list_orders(pool: &PgPool, model: &ResolvedModel) -> Result<Vec<Value>, AppError> {
        let q = select_orders(model, false);
        Self::fetch_all(pool, &q).await
    }

    pub async fn read_order<'c, E>(exec: E, model: &ResolvedModel, id: i64) -> Result<Option<Value>, AppError>
    where
        E: PgExecutor<'c>,
    {
        let mut q = select_orders(model, true);
        q.params.push(Value::from(id));
        Self::fetch_optional(exec, &q).await
    }

    /// Insert an order for an existing customer together with its product links, in one transaction.
    /// A customer or product id that does not resolve to a row is a client error.
    pub async fn create_order(
        pool: &PgPool,
        model: &ResolvedModel,
        values: &[(ColumnRole, Value)],
        customer_id: i64,
        product_ids: &[i64],
    ) -> Result<Value, AppError> {
        let mut tx = pool.begin().await?;
        Self::require_reference(&mut *tx, &model.customer, customer_id).await?;
        for product_id in product_ids {
            Self::require_reference(&mut *tx, &model.product, *product_id).await?;
        }

        let mut values = values.to_vec();
        values.push((ColumnRole::CustomerRef, Value::from(customer_id)));
        let q = insert(&model.order, &values);
        let row = Self::fetch_optional(&mut *tx, &q)
            .await?
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))?;
        let order_id = row
            .get(ColumnRole::Id.api_key())
            .and_then(Value::as_i64)
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))?;

        for product_id in product_ids {
            Self::link_product(&mut *tx, model, order_id, *product_id).await?;
        }
        let order = Self::read_order(&mut *tx, model, order_id)
            .await?
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))?;
        tx.commit().await?;
        tracing::debug!(order_id, products = product_ids.len(), "order created");
        Ok(order)
    }

    /// Overwrite an order's subtotal and customer. Its products are left as they are.
    pub async fn update_order(
        pool: &PgPool,
        model: &ResolvedModel,
        id: i64,
        values: &[(ColumnRole, Value)],
        customer_id: i64,
    ) -> Result<Option<Value>, AppError> {
        let mut tx = pool.begin().await?;
        Self::require_reference(&mut *tx, &model.customer, customer_id).await?;
        let mut values = values.to_vec();
        values.push((ColumnRole::CustomerRef, Value::from(customer_id)));
        let q = update(&model.order, &Value::from(id), &values);
        if Self::fetch_optional(&mut *tx, &q).await?.is_none() {
            return Ok(None);
        }
        let order = Self::read_order(&mut *tx, model, id).await?;
        tx.commit().await?;
        Ok(order)
    }

    /// Delete an order and its product links. Returns false when the order does not exist.
    pub async fn delete_order(pool: &PgPool, model: &ResolvedModel, id: i64) -> Result<bool, AppError> {
        let mut tx = pool.begin().await?;
        let mut links = delete_order_products(model);
        links.params.push(Value::from(id));
        Self::execute(&mut *tx, &links).await?;

        let mut q = delete(&model.order);
        q.params.push(Value::from(id));
        if Self::execute(&mut *tx, &q).await? == 0 {
            return Ok(false);
        }
        tx.commit().await?;
        Ok(true)
    }

    /// Link an existing product to an existing order. Either all of it commits or none of it does.
    pub async fn add_product_to_order(
        pool: &PgPool,
        model: &ResolvedModel,
        order_id: i64,
        product_id: i64,
    ) -> Result<Value, AppError> {
        let mut tx = pool.begin().await?;
        if Self::read_order(&mut *tx, model, order_id).await?.is_none() {
            return Err(AppError::NotFound(format!("order {}", order_id)));
        }
        if Self::read(&mut *tx, &model.product, product_id).await?.is_none() {
            return Err(AppError::NotFound(format!("product {}", product_id)));
        }
        Self::link_product(&mut *tx, model, order_id, product_id).await?;
        let order = Self::read_order(&mut *tx, model, order_id)
            .await?
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))?;
        tx.commit().await?;
        Ok(order)
    }

    async fn require_reference<'c, E>(exec: E, entity: &ResolvedEntity, id: i64) -> Result<(), AppError>
    where
        E: PgExecutor<'c>,
    {
        match Self::read(exec, entity, id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::BadRequest(format!(
                "{} {} does not exist",
                entity.role.path_segment(),
                id
            ))),
        }
    }

    async fn link_product<'c, E>(exec: E, model: &ResolvedModel, order_id: i64, product_id: i64) -> Result<(), AppError>
    where
        E: PgExecutor<'c>,
    {
        let mut q = insert_order_product(model);
        q.params.push(Value::from(order_id));
        q.params.push(Value::from(product_id));
        Self::execute(exec, &q).await?;
        Ok(())
    }

    async fn fetch_optional<'c, E>(exec: E, q: &QueryBuf) -> Result<Option<Value>, AppError>
    where
        E: PgExecutor<'c>,
    {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let row = Self::bind_all(q)?.fetch_optional(exec).await?;
        Ok(row.map(|r| row_to_json(&r)))
    }

    async fn fetch_all<'c, E>(exec: E, q: &QueryBuf) -> Result<Vec<Value>, AppError>
    where
        E: PgExecutor<'c>,
    {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = Self::bind_all(q)?.fetch_all(exec).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute<'c, E>(exec: E, q: &QueryBuf) -> Result<u64, AppError>
    where
        E: PgExecutor<'c>,
    {
        tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
        let done = Self::bind_all(q)?.execute(exec).await?;
        Ok(done.rows_affected())
    }

    fn bind_all(q: &QueryBuf) -> Result<Query<'_, Postgres, PgArguments>, AppError> {
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p)?);
        }
        Ok(query)
    }
}

fn row_to_json(row: &sqlx::postgres::PgRow) -> Value {
    use sqlx::Column;
    use sqlx::Row;
    let mut map = serde_json::Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    Value::Object(map)
}

fn cell_to_value(row: &sqlx::postgres::PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{builtin, resolve};
    use crate::migration::apply_migrations;
    use crate::service::RequestValidator;
    use crate::sql::quoted;
    use serde_json::json;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
    use sqlx::{ConnectOptions, Connection};
    use std::str::FromStr;

    const MISSING: i64 = 999_999_999;

    fn values(entity: &ResolvedEntity, body: Value) -> Vec<(ColumnRole, Value)> {
        let body = body.as_object().cloned().unwrap();
        RequestValidator::entity_values(entity, &body).unwrap()
    }

    fn id_of(row: &Value) -> i64 {
        row["id"].as_i64().unwrap()
    }

    /// Runs against the server in `DATABASE_URL` on a database of its own; skipped when unset.
    #[tokio::test]
    async fn crud_round_trip_against_database() {
        let _ = dotenvy::dotenv();
        let Some(url) = std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()) else {
            return;
        };
        let opts = PgConnectOptions::from_str(&url).unwrap();
        let db_name = format!("crud_service_{}", std::process::id());
        let mut admin = opts.clone().database("postgres").connect().await.unwrap();
        sqlx::query(&format!("CREATE DATABASE {}", quoted(&db_name)))
            .execute(&mut admin)
            .await
            .unwrap();

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_with(opts.database(&db_name))
            .await
            .unwrap();
        let config = builtin();
        apply_migrations(&pool, &config).await.unwrap();
        let model = resolve(&config).unwrap();

        // Customers: create, read, update, delete, and the missing-row answers.
        let billy = CrudService::create(&pool, &model.customer, &values(&model.customer, json!({"name": "Billy"})))
            .await
            .unwrap();
        let billy_id = id_of(&billy);
        let read = CrudService::read(&pool, &model.customer, billy_id).await.unwrap().unwrap();
        assert_eq!(read["name"], json!("Billy"));
        let renamed = values(&model.customer, json!({"name": "Bob"}));
        let updated = CrudService::update(&pool, &model.customer, billy_id, &renamed).await.unwrap().unwrap();
        assert_eq!(updated, json!({"id": billy_id, "name": "Bob"}));
        assert!(CrudService::update(&pool, &model.customer, MISSING, &renamed).await.unwrap().is_none());
        assert!(CrudService::read(&pool, &model.customer, MISSING).await.unwrap().is_none());
        assert!(CrudService::delete(&pool, &model.customer, billy_id).await.unwrap());
        assert!(!CrudService::delete(&pool, &model.customer, billy_id).await.unwrap());
        assert!(CrudService::read(&pool, &model.customer, billy_id).await.unwrap().is_none());

        // Products keep exact decimal text.
        let product = CrudService::create(
            &pool,
            &model.product,
            &values(&model.product, json!({"name": "Ice Cream", "price": "1.50"})),
        )
        .await
        .unwrap();
        assert_eq!(product["price"], json!("1.50"));
        let product_id = id_of(&product);
        let repriced = values(&model.product, json!({"name": "Ice Cream", "price": 2.25}));
        CrudService::update(&pool, &model.product, product_id, &repriced).await.unwrap().unwrap();
        let read = CrudService::read(&pool, &model.product, product_id).await.unwrap().unwrap();
        assert_eq!(read["price"], json!("2.25"));

        // Orders: unknown customers are rejected on create and update without writing anything.
        let customer = CrudService::create(&pool, &model.customer, &values(&model.customer, json!({"name": "Ann"})))
            .await
            .unwrap();
        let customer_id = id_of(&customer);
        let subtotal = values(&model.order, json!({"subtotal": "18.20"}));
        let order = CrudService::create_order(&pool, &model, &subtotal, customer_id, &[product_id])
            .await
            .unwrap();
        let order_id = id_of(&order);
        assert_eq!(order["customer"]["id"], json!(customer_id));
        assert_eq!(order["products"][0]["id"], json!(product_id));

        let err = CrudService::create_order(&pool, &model, &subtotal, MISSING, &[product_id])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)), "got {err:?}");
        assert_eq!(CrudService::list_orders(&pool, &model).await.unwrap().len(), 1);

        let changed = values(&model.order, json!({"subtotal": "1.00"}));
        let err = CrudService::update_order(&pool, &model, order_id, &changed, MISSING)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), AppError::BadRequest(format!("customer {MISSING} does not exist")).to_string());
        let read = CrudService::read_order(&pool, &model, order_id).await.unwrap().unwrap();
        assert_eq!(read["subtotal"], json!("18.20"));
        assert!(CrudService::update_order(&pool, &model, MISSING, &changed, customer_id)
            .await
            .unwrap()
            .is_none());
        let updated = CrudService::update_order(&pool, &model, order_id, &changed, customer_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["subtotal"], json!("1.00"));
        assert_eq!(updated["products"].as_array().map(Vec::len), Some(1));

        assert!(CrudService::delete_order(&pool, &model, order_id).await.unwrap());
        assert!(!CrudService::delete_order(&pool, &model, order_id).await.unwrap());
        assert!(CrudService::read_order(&pool, &model, order_id).await.unwrap().is_none());

        pool.close().await;
        sqlx::query(&format!("DROP DATABASE {}", quoted(&db_name)))
            .execute(&mut admin)
            .await
            .unwrap();
        admin.close().await.unwrap();
    }
}
