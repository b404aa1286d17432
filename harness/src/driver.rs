//! The conformance checks, run against one application and its database.
//!
//! Checks inside a group run concurrently; groups and mutating steps run in order.
//! The first failing check aborts the run.

use crate::api::ApiClient;
use crate::app::Application;
use crate::error::HarnessError;
use crate::model::{clean_customers, clean_orders, clean_products, Customer, Order, Product};
use crate::schema::{quote_ident, TableShape};
use reqwest::{Method, StatusCode};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinSet;

pub const CUSTOMER_NAME: &str = "Billy";
pub const PRODUCT_NAME: &str = "Ice Cream";
pub const PRODUCT_PRICE: &str = "123.40";
pub const ORDER_SUBTOTAL: &str = "18.20";
const TEMPORARY_CUSTOMER: &str = "Temporary";
/// An id no fixture ever receives.
const MISSING_ID: i64 = 999_999_999;

type Check = Pin<Box<dyn Future<Output = Result<(), HarnessError>> + Send>>;

fn boxed<F>(check: F) -> Check
where
    F: Future<Output = Result<(), HarnessError>> + Send + 'static,
{
    Box::pin(check)
}

fn decimal(text: &str) -> Result<Decimal, HarnessError> {
    Decimal::from_str(text).map_err(|e| HarnessError::Assertion(format!("{text:?} is not a decimal: {e}")))
}

fn ensure_eq<T: PartialEq + Debug>(what: &str, expected: &T, found: &T) -> Result<(), HarnessError> {
    if expected == found {
        Ok(())
    } else {
        Err(HarnessError::Assertion(format!(
            "{what}: expected {expected:?}, found {found:?}"
        )))
    }
}

/// The request must have failed with 404.
fn expect_not_found<T: Debug>(what: &str, result: Result<T, HarnessError>) -> Result<(), HarnessError> {
    match result {
        Err(HarnessError::UnexpectedStatus { status: 404, .. }) => Ok(()),
        Err(e) => Err(e),
        Ok(found) => Err(HarnessError::Assertion(format!("{what}: expected 404, found {found:?}"))),
    }
}

async fn step<F>(name: &str, check: F) -> Result<(), HarnessError>
where
    F: Future<Output = Result<(), HarnessError>>,
{
    check.await.map_err(|e| HarnessError::check(name, e))?;
    tracing::info!(check = name, "passed");
    Ok(())
}

async fn parallel(group: &str, checks: Vec<(&'static str, Check)>) -> Result<(), HarnessError> {
    let mut set = JoinSet::new();
    for (name, check) in checks {
        set.spawn(async move { (name, check.await) });
    }
    while let Some(joined) = set.join_next().await {
        let (name, result) = joined.map_err(|e| HarnessError::Assertion(format!("{group}: check task failed: {e}")))?;
        let full = format!("{group}/{name}");
        if let Err(e) = result {
            set.abort_all();
            return Err(HarnessError::check(full, e));
        }
        tracing::info!(check = %full, "passed");
    }
    Ok(())
}

#[derive(Clone)]
pub struct TestDriver {
    pool: PgPool,
    db_name: String,
    app: Arc<Application>,
    api: ApiClient,
}

impl TestDriver {
    pub fn new(pool: PgPool, app: Arc<Application>, api: ApiClient) -> Self {
        TestDriver {
            pool,
            db_name: app.db_name(),
            app,
            api,
        }
    }

    fn table(&self, shape: &TableShape) -> String {
        quote_ident(&shape.name)
    }

    /// Everything up to and including order creation, on a freshly migrated database.
    pub async fn first_run(&self) -> Result<(), HarnessError> {
        step("GeneratedTables", self.clone().generated_tables()).await?;

        let schema = &self.app.schema;
        parallel(
            "GeneratedColumns",
            vec![
                ("CustomersTable", boxed(self.clone().generated_columns(schema.customers.clone()))),
                ("ProductsTable", boxed(self.clone().generated_columns(schema.products.clone()))),
                ("OrdersTable", boxed(self.clone().generated_columns(schema.orders.clone()))),
                ("OrderProductsTable", boxed(self.clone().generated_columns(schema.order_products.clone()))),
            ],
        )
        .await?;

        parallel(
            "EmptyTables",
            vec![
                ("CustomersTable", boxed(self.clone().table_empty(schema.customers.clone()))),
                ("ProductsTable", boxed(self.clone().table_empty(schema.products.clone()))),
                ("OrdersTable", boxed(self.clone().table_empty(schema.orders.clone()))),
                ("OrderProductsTable", boxed(self.clone().table_empty(schema.order_products.clone()))),
            ],
        )
        .await?;

        parallel(
            "RetrieveFromAPIBeforeCreation",
            vec![
                ("Customers", boxed(self.clone().customers_empty())),
                ("Products", boxed(self.clone().products_empty())),
                ("Orders", boxed(self.clone().orders_empty())),
            ],
        )
        .await?;

        step("CreateCustomer", self.clone().create_customer()).await?;
        step("CreateProduct", self.clone().create_product()).await?;

        parallel(
            "RetrieveFromAPIAfterInitialCreation",
            vec![
                ("Customers", boxed(self.clone().customers_created())),
                ("Products", boxed(self.clone().products_created())),
            ],
        )
        .await?;

        step("CreateOrder", self.clone().create_order()).await?;

        parallel(
            "RetrieveFromAPIAfterDependentCreation",
            vec![("Orders", boxed(self.clone().orders_created()))],
        )
        .await?;

        if self.app.strict {
            self.error_paths().await?;
        }
        Ok(())
    }

    /// Exact status codes for missing records and rejected writes. Checks that only read, or
    /// target ids that do not exist, run together; anything that may write runs alone.
    async fn error_paths(&self) -> Result<(), HarnessError> {
        parallel(
            "MissingRecords",
            vec![
                ("ReadMissingCustomer", boxed(self.clone().read_missing("customer"))),
                ("ReadMissingProduct", boxed(self.clone().read_missing_product())),
                ("ReadMissingOrder", boxed(self.clone().read_missing_order())),
                ("UpdateMissingCustomer", boxed(self.clone().update_missing_customer())),
                ("UpdateMissingProduct", boxed(self.clone().update_missing_product())),
                ("UpdateMissingOrder", boxed(self.clone().update_missing_order())),
                ("DeleteMissingCustomer", boxed(self.clone().delete_missing("customer"))),
                ("DeleteMissingProduct", boxed(self.clone().delete_missing("product"))),
                ("DeleteMissingOrder", boxed(self.clone().delete_missing("order"))),
            ],
        )
        .await?;

        step("OrderForUnknownCustomer", self.clone().order_for_unknown_customer()).await?;
        step("UpdateOrderForUnknownCustomer", self.clone().update_order_for_unknown_customer()).await?;
        step("AddProductIsAtomic", self.clone().add_product_is_atomic()).await?;
        step("UpdateCustomer", self.clone().update_customer()).await?;
        step("UpdateProduct", self.clone().update_product()).await?;
        step("DeleteCustomer", self.clone().delete_customer()).await
    }

    /// After a restart every record created by the first run is still served.
    pub async fn second_run(&self) -> Result<(), HarnessError> {
        parallel(
            "RetrieveFromAPIAfterRestart",
            vec![
                ("Customers", boxed(self.clone().customers_created())),
                ("Products", boxed(self.clone().products_created())),
                ("Orders", boxed(self.clone().orders_created())),
            ],
        )
        .await
    }

    async fn generated_tables(self) -> Result<(), HarnessError> {
        let found: Vec<String> = sqlx::query_scalar(
            "SELECT table_name::TEXT FROM information_schema.tables \
             WHERE table_catalog = $1 AND table_schema = 'public' AND table_type = 'BASE TABLE' \
             ORDER BY 1",
        )
        .bind(&self.db_name)
        .fetch_all(&self.pool)
        .await?;
        ensure_eq("tables", &self.app.schema.table_names(), &found)
    }

    async fn generated_columns(self, table: TableShape) -> Result<(), HarnessError> {
        let found: Vec<String> = sqlx::query_scalar(
            "SELECT column_name::TEXT FROM information_schema.columns \
             WHERE table_catalog = $1 AND table_schema = 'public' AND table_name = $2 \
             ORDER BY 1",
        )
        .bind(&self.db_name)
        .bind(&table.name)
        .fetch_all(&self.pool)
        .await?;
        let found: BTreeSet<String> = found.into_iter().collect();
        ensure_eq(&format!("columns of {}", table.name), &table.columns, &found)
    }

    async fn table_empty(self, table: TableShape) -> Result<(), HarnessError> {
        let count = self.count(&table, None).await?;
        ensure_eq(&format!("rows in {}", table.name), &0, &count)
    }

    async fn count(&self, table: &TableShape, order_id: Option<i64>) -> Result<i64, HarnessError> {
        let count: i64 = match order_id {
            None => {
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table(table)))
                    .fetch_one(&self.pool)
                    .await?
            }
            Some(id) => {
                let column = quote_ident(&self.app.schema.values.link_order);
                sqlx::query_scalar(&format!(
                    "SELECT COUNT(*) FROM {} WHERE {column}::INT8 = $1",
                    self.table(table)
                ))
                .bind(id)
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(count)
    }

    async fn single_id(&self, table: &TableShape) -> Result<i64, HarnessError> {
        let ids: Vec<i64> = sqlx::query_scalar(&format!("SELECT id::INT8 FROM {}", self.table(table)))
            .fetch_all(&self.pool)
            .await?;
        match ids.as_slice() {
            [id] => Ok(*id),
            _ => Err(HarnessError::Assertion(format!(
                "expected exactly one row in {}, found {}",
                table.name,
                ids.len()
            ))),
        }
    }

    async fn customers_empty(self) -> Result<(), HarnessError> {
        ensure_eq("customers before creation", &Vec::<Customer>::new(), &self.api.list_customers().await?)
    }

    async fn products_empty(self) -> Result<(), HarnessError> {
        ensure_eq("products before creation", &Vec::<Product>::new(), &self.api.list_products().await?)
    }

    async fn orders_empty(self) -> Result<(), HarnessError> {
        ensure_eq("orders before creation", &Vec::<Order>::new(), &self.api.list_orders().await?)
    }

    async fn create_customer(self) -> Result<(), HarnessError> {
        let created = self.api.create_customer(CUSTOMER_NAME).await?;
        ensure_eq("created customer name", &Some(CUSTOMER_NAME.to_string()), &created.name)?;
        let schema = &self.app.schema;
        let names: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT {}::TEXT FROM {}",
            quote_ident(&schema.values.customer_name),
            self.table(&schema.customers)
        ))
        .fetch_all(&self.pool)
        .await?;
        ensure_eq("customer rows", &vec![CUSTOMER_NAME.to_string()], &names)
    }

    async fn create_product(self) -> Result<(), HarnessError> {
        let price = decimal(PRODUCT_PRICE)?;
        let created = self
            .api
            .create_product(PRODUCT_NAME, price, self.app.decimal_wire)
            .await?;
        ensure_eq("created product price", &Some(price), &created.price)?;

        let schema = &self.app.schema;
        let rows: Vec<(String, String)> = sqlx::query_as(&format!(
            "SELECT {}::TEXT, {}::TEXT FROM {}",
            quote_ident(&schema.values.product_name),
            quote_ident(&schema.values.product_price),
            self.table(&schema.products)
        ))
        .fetch_all(&self.pool)
        .await?;
        let [(name, stored)] = rows.as_slice() else {
            return Err(HarnessError::Assertion(format!("expected one product row, found {rows:?}")));
        };
        ensure_eq("product name", &PRODUCT_NAME.to_string(), name)?;
        ensure_eq("product price", &price, &decimal(stored)?)?;

        if self.app.strict {
            ensure_eq("stored price text", &PRODUCT_PRICE.to_string(), stored)?;
            let body = self.api.get_value(&format!("/product/{}", created.id)).await?;
            ensure_eq("price as served", &json!(PRODUCT_PRICE), &body["price"])?;
        }
        Ok(())
    }

    async fn customers_created(self) -> Result<(), HarnessError> {
        let expected = vec![Customer {
            id: 0,
            name: Some(CUSTOMER_NAME.to_string()),
        }];
        ensure_eq("customers", &expected, &clean_customers(self.api.list_customers().await?))
    }

    async fn products_created(self) -> Result<(), HarnessError> {
        let expected = vec![Product {
            id: 0,
            name: Some(PRODUCT_NAME.to_string()),
            price: Some(decimal(PRODUCT_PRICE)?),
        }];
        ensure_eq("products", &expected, &clean_products(self.api.list_products().await?))
    }

    async fn create_order(self) -> Result<(), HarnessError> {
        let schema = &self.app.schema;
        let customer_id = self.single_id(&schema.customers).await?;
        let product_id = self.single_id(&schema.products).await?;
        let subtotal = decimal(ORDER_SUBTOTAL)?;
        self.api
            .create_order(customer_id, &[product_id], subtotal, self.app.decimal_wire)
            .await?;

        let stored: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT {}::TEXT FROM {}",
            quote_ident(&schema.values.order_subtotal),
            self.table(&schema.orders)
        ))
        .fetch_all(&self.pool)
        .await?;
        let stored: Vec<Decimal> = stored.iter().map(|s| decimal(s)).collect::<Result<_, _>>()?;
        ensure_eq("order subtotals", &vec![subtotal], &stored)?;
        ensure_eq("order product links", &1, &self.count(&schema.order_products, None).await?)
    }

    async fn orders_created(self) -> Result<(), HarnessError> {
        let found = self.api.list_orders().await?;
        if self.app.strict {
            let [order] = found.as_slice() else {
                return Err(HarnessError::Assertion(format!("expected one order, found {found:?}")));
            };
            let customer = order.customer.as_ref().and_then(|c| c.name.as_deref());
            ensure_eq("order customer", &Some(CUSTOMER_NAME), &customer)?;
            let products: Vec<Option<&str>> = order.products.iter().map(|p| p.name.as_deref()).collect();
            ensure_eq("order products", &vec![Some(PRODUCT_NAME)], &products)?;
        }
        let expected = vec![Order {
            subtotal: Some(decimal(ORDER_SUBTOTAL)?),
            ..Order::default()
        }];
        ensure_eq("orders", &expected, &clean_orders(found))
    }

    async fn delete_missing(self, resource: &'static str) -> Result<(), HarnessError> {
        let (status, _) = self.api.delete(resource, MISSING_ID).await?;
        ensure_eq(&format!("DELETE missing {resource}"), &StatusCode::NOT_FOUND, &status)
    }

    async fn read_missing(self, resource: &'static str) -> Result<(), HarnessError> {
        let status = self
            .api
            .status_of(Method::GET, &format!("/{resource}/{MISSING_ID}"), None)
            .await?;
        ensure_eq(&format!("GET missing {resource}"), &StatusCode::NOT_FOUND, &status)
    }

    async fn read_missing_product(self) -> Result<(), HarnessError> {
        expect_not_found("GET missing product", self.api.get_product(MISSING_ID).await)
    }

    async fn read_missing_order(self) -> Result<(), HarnessError> {
        expect_not_found("GET missing order", self.api.get_order(MISSING_ID).await)
    }

    async fn update_missing_customer(self) -> Result<(), HarnessError> {
        let status = self.api.update("customer", MISSING_ID, &json!({ "name": CUSTOMER_NAME })).await?;
        ensure_eq("PUT missing customer", &StatusCode::NOT_FOUND, &status)
    }

    async fn update_missing_product(self) -> Result<(), HarnessError> {
        let body = json!({ "name": PRODUCT_NAME, "price": PRODUCT_PRICE });
        let status = self.api.update("product", MISSING_ID, &body).await?;
        ensure_eq("PUT missing product", &StatusCode::NOT_FOUND, &status)
    }

    /// A valid customer, so the only problem is the order id.
    async fn update_missing_order(self) -> Result<(), HarnessError> {
        let customer_id = self.single_id(&self.app.schema.customers).await?;
        let body = crate::api::order_body(customer_id, &[], decimal(ORDER_SUBTOTAL)?, self.app.decimal_wire);
        let status = self.api.update("order", MISSING_ID, &body).await?;
        ensure_eq("PUT missing order", &StatusCode::NOT_FOUND, &status)
    }

    async fn update_order_for_unknown_customer(self) -> Result<(), HarnessError> {
        let schema = &self.app.schema;
        let order_id = self.single_id(&schema.orders).await?;
        let body = crate::api::order_body(MISSING_ID, &[], decimal("1.00")?, self.app.decimal_wire);
        let status = self.api.update("order", order_id, &body).await?;
        ensure_eq("PUT order for unknown customer", &StatusCode::BAD_REQUEST, &status)?;
        let order = self.api.get_order(order_id).await?;
        ensure_eq("subtotal after rejected update", &Some(decimal(ORDER_SUBTOTAL)?), &order.subtotal)
    }

    /// Rewrites the fixture with its own values; later checks still see it unchanged.
    async fn update_customer(self) -> Result<(), HarnessError> {
        let id = self.single_id(&self.app.schema.customers).await?;
        let updated = self.api.update_customer(id, CUSTOMER_NAME).await?;
        ensure_eq("updated customer id", &id, &updated.id)?;
        ensure_eq("updated customer name", &Some(CUSTOMER_NAME.to_string()), &updated.name)
    }

    async fn update_product(self) -> Result<(), HarnessError> {
        let id = self.single_id(&self.app.schema.products).await?;
        let price = decimal(PRODUCT_PRICE)?;
        let updated = self
            .api
            .update_product(id, PRODUCT_NAME, price, self.app.decimal_wire)
            .await?;
        ensure_eq("updated product price", &Some(price), &updated.price)?;
        let served = self.api.get_product(id).await?;
        ensure_eq("product after update", &updated, &served)?;
        let body = self.api.get_value(&format!("/product/{id}")).await?;
        ensure_eq("price as served after update", &json!(PRODUCT_PRICE), &body["price"])
    }

    /// A throwaway customer is created with 201, deleted with `ok`, and gone afterwards.
    async fn delete_customer(self) -> Result<(), HarnessError> {
        let customers = &self.app.schema.customers;
        let status = self
            .api
            .status_of(Method::POST, "/customer", Some(&json!({ "name": TEMPORARY_CUSTOMER })))
            .await?;
        ensure_eq("POST customer", &StatusCode::CREATED, &status)?;
        let ids: Vec<i64> = sqlx::query_scalar(&format!(
            "SELECT id::INT8 FROM {} WHERE {} = $1",
            self.table(customers),
            quote_ident(&self.app.schema.values.customer_name)
        ))
        .bind(TEMPORARY_CUSTOMER)
        .fetch_all(&self.pool)
        .await?;
        let [id] = ids.as_slice() else {
            return Err(HarnessError::Assertion(format!("expected one {TEMPORARY_CUSTOMER} row, found {ids:?}")));
        };
        ensure_eq("customers before delete", &2, &self.count(customers, None).await?)?;

        let (status, body) = self.api.delete("customer", *id).await?;
        ensure_eq("DELETE customer", &StatusCode::OK, &status)?;
        ensure_eq("DELETE customer body", &"ok", &body.as_str())?;
        ensure_eq("customers after delete", &1, &self.count(customers, None).await?)?;

        let (status, _) = self.api.delete("customer", *id).await?;
        ensure_eq("DELETE customer again", &StatusCode::NOT_FOUND, &status)
    }

    async fn order_for_unknown_customer(self) -> Result<(), HarnessError> {
        let schema = &self.app.schema;
        let product_id = self.single_id(&schema.products).await?;
        let body = crate::api::order_body(MISSING_ID, &[product_id], decimal("1.00")?, self.app.decimal_wire);
        let status = self.api.status_of(Method::POST, "/order", Some(&body)).await?;
        ensure_eq("order for unknown customer", &StatusCode::BAD_REQUEST, &status)?;
        ensure_eq("orders after rejected create", &1, &self.count(&schema.orders, None).await?)
    }

    /// Failed additions leave the order's links untouched.
    async fn add_product_is_atomic(self) -> Result<(), HarnessError> {
        let schema = &self.app.schema;
        let order_id = self.single_id(&schema.orders).await?;
        let product_id = self.single_id(&schema.products).await?;

        let status = self.api.add_product_to_order(order_id, MISSING_ID).await?;
        ensure_eq("add unknown product", &StatusCode::NOT_FOUND, &status)?;
        let status = self.api.add_product_to_order(MISSING_ID, product_id).await?;
        ensure_eq("add to unknown order", &StatusCode::NOT_FOUND, &status)?;
        let status = self.api.add_product_to_order(order_id, product_id).await?;
        if status.is_success() {
            return Err(HarnessError::Assertion("linking the same product twice succeeded".into()));
        }
        let links = self.count(&schema.order_products, Some(order_id)).await?;
        ensure_eq("links after failed additions", &1, &links)
    }
}
