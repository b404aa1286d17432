//! HTTP handlers for the company resources.

pub mod entity;
pub mod order;
pub use entity::{customer, product};
