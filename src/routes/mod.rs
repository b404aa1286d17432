//! Router assembly.

mod common;
mod entity;

pub use common::{common_routes, PING_BODY};
pub use entity::entity_routes;

use crate::state::AppState;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Full application router: ping/ready plus the customer, product and order resources.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .merge(common_routes(state.clone()))
        .merge(entity_routes(state))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{builtin, resolve};
    use crate::response::{JSON_CONTENT_TYPE, TEXT_CONTENT_TYPE};
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    /// Router over a pool that never connects; only paths that fail before touching
    /// the database are exercised here.
    fn test_app() -> Router {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(300))
            .connect_lazy("postgresql://root@127.0.0.1:1/company_sqlx?sslmode=disable")
            .unwrap();
        let model = resolve(&builtin()).unwrap();
        app_router(AppState {
            pool,
            model: Arc::new(model),
        })
    }

    async fn send(method: Method, uri: &str, body: &str) -> (StatusCode, String, String) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = test_app().oneshot(req).await.unwrap();
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string())
            .unwrap_or_default();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn error_message(body: &str) -> String {
        let v: serde_json::Value = serde_json::from_str(body).unwrap();
        v["error"]["message"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn ping_identifies_binding() {
        let (status, content_type, body) = send(Method::GET, "/ping", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, TEXT_CONTENT_TYPE);
        assert_eq!(body, PING_BODY);
    }

    #[tokio::test]
    async fn malformed_id_is_bad_request() {
        for uri in ["/customer/abc", "/product/1.5", "/order/x"] {
            let (status, content_type, _) = send(Method::GET, uri, "").await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(content_type, JSON_CONTENT_TYPE);
        }
        let (status, _, _) = send(Method::DELETE, "/customer/abc", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let (status, _, body) = send(Method::POST, "/customer", "{\"name\": ").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(error_message(&body).starts_with("invalid JSON body"));
    }

    #[tokio::test]
    async fn missing_required_field_is_bad_request() {
        let (status, _, body) = send(Method::POST, "/product", "{\"name\": \"Ice Cream\"}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), "price is required");

        let (status, _, _) = send(Method::POST, "/customer", "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn non_decimal_price_is_bad_request() {
        let (status, _, _) = send(Method::POST, "/product", "{\"name\": \"x\", \"price\": \"lots\"}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn order_without_customer_is_bad_request() {
        let (status, _, body) = send(
            Method::POST,
            "/order",
            "{\"subtotal\": \"18.20\", \"products\": [{\"id\": 1}]}",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), "must specify user");

        let (status, _, body) = send(
            Method::POST,
            "/order",
            "{\"subtotal\": \"18.20\", \"customer\": {\"id\": 1}, \"products\": [{\"id\": 0}]}",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), "must specify a product ID");
    }

    #[tokio::test]
    async fn add_product_requires_query_param() {
        let (status, _, body) = send(Method::POST, "/order/1/product", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), "missing query param \"productID\"");

        let (status, _, _) = send(Method::POST, "/order/1/product?productID=abc", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ready_reports_unavailable_database() {
        let (status, _, body) = send(Method::GET, "/ready", "").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["database"], "unavailable");
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (status, _, _) = send(Method::GET, "/widget", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
