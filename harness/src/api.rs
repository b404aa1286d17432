//! HTTP client for the company REST API exposed by every binding.

use crate::error::HarnessError;
use crate::model::{Customer, DecimalWire, Order, Product};
use reqwest::{Method, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(port: u16) -> Result<Self, HarnessError> {
        Self::with_base_url(format!("http://localhost:{port}"))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, HarnessError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(ApiClient {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client.request(method, &url)
    }

    /// Send and require a 2xx response; the body is returned as text.
    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<String, HarnessError> {
        let (status, text) = self.send_raw(method.clone(), path, body).await?;
        if !status.is_success() {
            return Err(HarnessError::UnexpectedStatus {
                method: method.to_string(),
                path: path.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }

    async fn send_raw(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(StatusCode, String), HarnessError> {
        let mut request = self.build_request(method.clone(), path);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        tracing::debug!(%method, path, status = status.as_u16(), "api call");
        Ok((status, text))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, HarnessError> {
        let text = self.send(method.clone(), path, body).await?;
        serde_json::from_str(&text).map_err(|e| {
            HarnessError::Assertion(format!("{method} {path}: cannot decode response {text:?}: {e}"))
        })
    }

    pub async fn ping(&self) -> Result<(), HarnessError> {
        self.send(Method::GET, "/ping", None).await.map(|_| ())
    }

    pub async fn list_customers(&self) -> Result<Vec<Customer>, HarnessError> {
        self.send_json(Method::GET, "/customer", None).await
    }

    pub async fn list_products(&self) -> Result<Vec<Product>, HarnessError> {
        self.send_json(Method::GET, "/product", None).await
    }

    pub async fn list_orders(&self) -> Result<Vec<Order>, HarnessError> {
        self.send_json(Method::GET, "/order", None).await
    }

    pub async fn get_product(&self, id: i64) -> Result<Product, HarnessError> {
        self.send_json(Method::GET, &format!("/product/{id}"), None).await
    }

    pub async fn get_order(&self, id: i64) -> Result<Order, HarnessError> {
        self.send_json(Method::GET, &format!("/order/{id}"), None).await
    }

    /// Untyped GET, for checks that care about the exact JSON encoding.
    pub async fn get_value(&self, path: &str) -> Result<Value, HarnessError> {
        self.send_json(Method::GET, path, None).await
    }

    pub async fn create_customer(&self, name: &str) -> Result<Customer, HarnessError> {
        self.send_json(Method::POST, "/customer", Some(&json!({ "name": name }))).await
    }

    pub async fn create_product(&self, name: &str, price: Decimal, wire: DecimalWire) -> Result<Product, HarnessError> {
        let body = json!({ "name": name, "price": wire.encode(price) });
        self.send_json(Method::POST, "/product", Some(&body)).await
    }

    pub async fn create_order(
        &self,
        customer_id: i64,
        product_ids: &[i64],
        subtotal: Decimal,
        wire: DecimalWire,
    ) -> Result<Order, HarnessError> {
        let body = order_body(customer_id, product_ids, subtotal, wire);
        self.send_json(Method::POST, "/order", Some(&body)).await
    }

    /// Status of a request whose success is not assumed.
    pub async fn status_of(&self, method: Method, path: &str, body: Option<&Value>) -> Result<StatusCode, HarnessError> {
        self.send_raw(method, path, body).await.map(|(status, _)| status)
    }

    /// PUT a full record; a successful reply is decoded as the stored record.
    pub async fn update_product(
        &self,
        id: i64,
        name: &str,
        price: Decimal,
        wire: DecimalWire,
    ) -> Result<Product, HarnessError> {
        let body = json!({ "name": name, "price": wire.encode(price) });
        self.send_json(Method::PUT, &format!("/product/{id}"), Some(&body)).await
    }

    pub async fn update_customer(&self, id: i64, name: &str) -> Result<Customer, HarnessError> {
        self.send_json(Method::PUT, &format!("/customer/{id}"), Some(&json!({ "name": name })))
            .await
    }

    pub async fn update(&self, resource: &str, id: i64, body: &Value) -> Result<StatusCode, HarnessError> {
        self.status_of(Method::PUT, &format!("/{resource}/{id}"), Some(body)).await
    }

    /// Status and text body; a successful delete answers `ok`.
    pub async fn delete(&self, resource: &str, id: i64) -> Result<(StatusCode, String), HarnessError> {
        self.send_raw(Method::DELETE, &format!("/{resource}/{id}"), None).await
    }

    pub async fn add_product_to_order(&self, order_id: i64, product_id: i64) -> Result<StatusCode, HarnessError> {
        let path = format!("/order/{order_id}/product?productID={product_id}");
        self.status_of(Method::POST, &path, None).await
    }
}

pub fn order_body(customer_id: i64, product_ids: &[i64], subtotal: Decimal, wire: DecimalWire) -> Value {
    let products: Vec<Value> = product_ids.iter().map(|id| json!({ "id": id })).collect();
    json!({
        "subtotal": wire.encode(subtotal),
        "customer": { "id": customer_id },
        "products": products,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn base_url_has_no_trailing_slash() {
        let api = ApiClient::with_base_url("http://localhost:6543/").unwrap();
        assert_eq!(api.base_url(), "http://localhost:6543");
        assert_eq!(ApiClient::new(7000).unwrap().base_url(), "http://localhost:7000");
    }

    #[test]
    fn order_body_shape() {
        let body = order_body(5, &[7, 8], Decimal::from_str("18.20").unwrap(), DecimalWire::String);
        assert_eq!(
            body,
            json!({"subtotal": "18.20", "customer": {"id": 5}, "products": [{"id": 7}, {"id": 8}]})
        );
    }

    #[tokio::test]
    async fn connection_refused_is_an_http_error() {
        let port = crate::process::pick_free_port().unwrap();
        let api = ApiClient::new(port).unwrap();
        assert!(matches!(api.ping().await, Err(HarnessError::Http(_))));
    }
}
