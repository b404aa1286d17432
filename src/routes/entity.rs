//! Resource routes. Paths are spelled out per resource so `/order/:id/product` never
//! collides with a generic `/:resource/:id` pattern.

use crate::handlers::{customer, order, product};
use crate::state::AppState;
use axum::{routing::get, routing::post, Router};

pub fn entity_routes(state: AppState) -> Router {
    Router::new()
        .route("/customer", get(customer::list_all).post(customer::create_one))
        .route(
            "/customer/:id",
            get(customer::read_one)
                .put(customer::update_one)
                .delete(customer::delete_one),
        )
        .route("/product", get(product::list_all).post(product::create_one))
        .route(
            "/product/:id",
            get(product::read_one)
                .put(product::update_one)
                .delete(product::delete_one),
        )
        .route("/order", get(order::list_all).post(order::create_one))
        .route(
            "/order/:id",
            get(order::read_one).put(order::update_one).delete(order::delete_one),
        )
        .route("/order/:id/product", post(order::add_product))
        .with_state(state)
}
