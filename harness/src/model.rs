//! Response shapes shared by every binding.
//!
//! Bindings disagree on key case (`ID` vs `id`) and on whether ids and money travel as JSON
//! numbers or strings, so deserialization accepts all of those.

use rust_decimal::Decimal;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Customer {
    #[serde(alias = "ID", default, deserialize_with = "flexible_id")]
    pub id: i64,
    #[serde(alias = "Name", default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Product {
    #[serde(alias = "ID", default, deserialize_with = "flexible_id")]
    pub id: i64,
    #[serde(alias = "Name", default)]
    pub name: Option<String>,
    #[serde(alias = "Price", default, deserialize_with = "flexible_decimal")]
    pub price: Option<Decimal>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Order {
    #[serde(alias = "ID", default, deserialize_with = "flexible_id")]
    pub id: i64,
    #[serde(alias = "Subtotal", default, deserialize_with = "flexible_decimal")]
    pub subtotal: Option<Decimal>,
    #[serde(alias = "Customer", default)]
    pub customer: Option<Customer>,
    #[serde(alias = "Products", default, deserialize_with = "null_as_empty")]
    pub products: Vec<Product>,
}

/// How a binding expects money in request bodies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecimalWire {
    Number,
    String,
}

impl DecimalWire {
    pub fn encode(self, value: Decimal) -> Value {
        match self {
            DecimalWire::String => Value::String(value.to_string()),
            DecimalWire::Number => serde_json::from_str::<serde_json::Number>(&value.to_string())
                .map(Value::Number)
                .unwrap_or_else(|_| Value::String(value.to_string())),
        }
    }
}

pub fn clean_customers(customers: Vec<Customer>) -> Vec<Customer> {
    customers.into_iter().map(|c| Customer { id: 0, ..c }).collect()
}

pub fn clean_products(products: Vec<Product>) -> Vec<Product> {
    products.into_iter().map(|p| Product { id: 0, ..p }).collect()
}

/// Orders compare on their own columns; customer and product links are checked separately.
pub fn clean_orders(orders: Vec<Order>) -> Vec<Order> {
    orders
        .into_iter()
        .map(|o| Order {
            id: 0,
            subtotal: o.subtotal,
            customer: None,
            products: Vec::new(),
        })
        .collect()
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text).or_else(|_| Decimal::from_scientific(text)).ok()
}

fn flexible_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| de::Error::custom(format!("id {n} is not an integer"))),
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| de::Error::custom(format!("id {s:?} is not an integer"))),
        Some(other) => Err(de::Error::custom(format!("unexpected id {other}"))),
    }
}

fn flexible_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => parse_decimal(&n.to_string())
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("{n} is not a decimal"))),
        Some(Value::String(s)) => parse_decimal(&s)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("{s:?} is not a decimal"))),
        Some(other) => Err(de::Error::custom(format!("unexpected decimal {other}"))),
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
