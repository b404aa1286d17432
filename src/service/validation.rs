//! Request body validation driven by column roles and types.

use crate::config::{ColumnInfo, ColumnRole, ResolvedEntity};
use crate::error::AppError;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;

/// Largest magnitude a `DECIMAL(18,2)` column accepts is below 10^16.
const MONEY_INTEGER_DIGITS: u32 = 16;
/// Fractional digits a `DECIMAL(18,2)` column stores without rounding.
const MONEY_SCALE: u32 = 2;

pub struct RequestValidator;

impl RequestValidator {
    /// Parse a request body that must be a JSON object.
    pub fn parse_object(body: &[u8]) -> Result<Map<String, Value>, AppError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("invalid JSON body: {}", e)))?;
        match value {
            Value::Object(m) => Ok(m),
            _ => Err(AppError::BadRequest("body must be a JSON object".into())),
        }
    }

    /// Values for the entity's own scalar columns (name, price, subtotal), in column order.
    /// Required columns must be present and non-null; decimals must parse as decimals.
    pub fn entity_values(
        entity: &ResolvedEntity,
        body: &Map<String, Value>,
    ) -> Result<Vec<(ColumnRole, Value)>, AppError> {
        let mut out = Vec::new();
        for col in entity.columns.iter().filter(|c| is_scalar_role(c.role)) {
            let key = col.role.api_key();
            match body.get(key) {
                None | Some(Value::Null) => {
                    if !col.nullable && !col.has_default {
                        return Err(AppError::BadRequest(format!("{} is required", key)));
                    }
                    if body.contains_key(key) {
                        out.push((col.role, Value::Null));
                    }
                }
                Some(v) => out.push((col.role, validate_field(key, v, col)?)),
            }
        }
        Ok(out)
    }

    /// Id of a nested `{"id": N}` reference such as an order's customer.
    pub fn reference_id(body: &Map<String, Value>, key: &str, missing: &str) -> Result<i64, AppError> {
        body.get(key)
            .and_then(nested_id)
            .ok_or_else(|| AppError::BadRequest(missing.to_string()))
    }

    /// Ids of the products listed on an order body; absent `products` means none.
    pub fn product_ids(body: &Map<String, Value>) -> Result<Vec<i64>, AppError> {
        match body.get("products") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|p| nested_id(p).ok_or_else(|| AppError::BadRequest("must specify a product ID".into())))
                .collect(),
            Some(_) => Err(AppError::BadRequest("products must be an array".into())),
        }
    }

    /// Integer id from a path segment or query parameter.
    pub fn parse_id(raw: &str) -> Result<i64, AppError> {
        raw.trim()
            .parse::<i64>()
            .map_err(|_| AppError::BadRequest(format!("invalid id: {:?}", raw)))
    }
}

fn is_scalar_role(role: ColumnRole) -> bool {
    matches!(role, ColumnRole::Name | ColumnRole::Price | ColumnRole::Subtotal)
}

/// Accepts `{"id": 5}` with a non-zero integer id.
fn nested_id(v: &Value) -> Option<i64> {
    v.get("id").and_then(Value::as_i64).filter(|id| *id != 0)
}

fn validate_field(key: &str, v: &Value, col: &ColumnInfo) -> Result<Value, AppError> {
    if col.is_decimal() {
        let d = parse_decimal(key, v)?;
        return Ok(Value::String(d.to_string()));
    }
    if col.is_integer() {
        return v
            .as_i64()
            .map(Value::from)
            .ok_or_else(|| AppError::BadRequest(format!("{} must be an integer", key)));
    }
    match v {
        Value::String(_) => Ok(v.clone()),
        _ => Err(AppError::BadRequest(format!("{} must be a string", key))),
    }
}

/// Decimal from a JSON string (`"123.40"`) or number (`123.4`).
pub fn parse_decimal(key: &str, v: &Value) -> Result<Decimal, AppError> {
    let raw = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return Err(AppError::BadRequest(format!("{} must be a decimal number", key))),
    };
    let d = Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|_| AppError::BadRequest(format!("{} must be a decimal number, got {:?}", key, raw)))?;
    if d.trunc().abs() >= Decimal::from(10u64.pow(MONEY_INTEGER_DIGITS)) {
        return Err(AppError::BadRequest(format!("{} is out of range", key)));
    }
    if d.normalize().scale() > MONEY_SCALE {
        return Err(AppError::BadRequest(format!(
            "{} must have at most {} decimal places, got {:?}",
            key, MONEY_SCALE, raw
        )));
    }
    Ok(d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{builtin, resolve};
    use serde_json::json;

    fn object(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn malformed_json_is_bad_request() {
        assert!(matches!(
            RequestValidator::parse_object(b"{\"name\": "),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            RequestValidator::parse_object(b"[1, 2]"),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn product_requires_name_and_price() {
        let model = resolve(&builtin()).unwrap();
        let err = RequestValidator::entity_values(&model.product, &object(json!({"name": "Ice Cream"})))
            .unwrap_err();
        assert_eq!(err.to_string(), "price is required");
        let err = RequestValidator::entity_values(&model.product, &object(json!({"price": "1.00"})))
            .unwrap_err();
        assert_eq!(err.to_string(), "name is required");
    }

    #[test]
    fn price_accepts_string_and_number() {
        let model = resolve(&builtin()).unwrap();
        let values = RequestValidator::entity_values(
            &model.product,
            &object(json!({"id": 0, "name": "Ice Cream", "price": 123.4})),
        )
        .unwrap();
        assert_eq!(
            values,
            vec![(ColumnRole::Name, json!("Ice Cream")), (ColumnRole::Price, json!("123.4"))]
        );
        let values = RequestValidator::entity_values(
            &model.product,
            &object(json!({"name": "Ice Cream", "price": "123.40"})),
        )
        .unwrap();
        assert_eq!(values[1], (ColumnRole::Price, json!("123.40")));
    }

    #[test]
    fn price_rejects_garbage_and_overflow() {
        let model = resolve(&builtin()).unwrap();
        for bad in [json!("abc"), json!(true), json!("12345678901234567.00")] {
            let body = object(json!({"name": "x", "price": bad}));
            assert!(matches!(
                RequestValidator::entity_values(&model.product, &body),
                Err(AppError::BadRequest(_))
            ));
        }
    }

    #[test]
    fn price_with_more_than_two_places_is_rejected() {
        let err = parse_decimal("price", &json!("1.005")).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(err.to_string(), "price must have at most 2 decimal places, got \"1.005\"");
        assert!(parse_decimal("price", &json!(0.125)).is_err());
        // Trailing zeros do not change the stored value.
        assert_eq!(parse_decimal("price", &json!("1.500")).unwrap().to_string(), "1.500");
        assert_eq!(parse_decimal("price", &json!("1.05")).unwrap().to_string(), "1.05");
    }

    #[test]
    fn price_integer_digits_are_bounded() {
        let err = parse_decimal("price", &json!("12345678901234567")).unwrap_err();
        assert_eq!(err.to_string(), "price is out of range");
        assert!(parse_decimal("price", &json!("-12345678901234567.5")).is_err());
        assert_eq!(
            parse_decimal("price", &json!("9999999999999999.99")).unwrap().to_string(),
            "9999999999999999.99"
        );
    }

    #[test]
    fn name_must_be_string() {
        let model = resolve(&builtin()).unwrap();
        let err = RequestValidator::entity_values(&model.customer, &object(json!({"name": 5}))).unwrap_err();
        assert_eq!(err.to_string(), "name must be a string");
    }

    #[test]
    fn zero_or_missing_reference_is_rejected() {
        let missing = "must specify user";
        let body = object(json!({"customer": {"id": 0}}));
        assert_eq!(
            RequestValidator::reference_id(&body, "customer", missing).unwrap_err().to_string(),
            missing
        );
        let body = object(json!({"subtotal": "1.00"}));
        assert!(RequestValidator::reference_id(&body, "customer", missing).is_err());
        let body = object(json!({"customer": {"id": 12, "name": "Billy"}}));
        assert_eq!(RequestValidator::reference_id(&body, "customer", missing).unwrap(), 12);
    }

    #[test]
    fn product_ids_from_order_body() {
        let body = object(json!({"products": [{"id": 3}, {"id": 4, "name": "x"}]}));
        assert_eq!(RequestValidator::product_ids(&body).unwrap(), vec![3, 4]);
        assert!(RequestValidator::product_ids(&object(json!({}))).unwrap().is_empty());
        let body = object(json!({"products": [{"name": "no id"}]}));
        assert_eq!(
            RequestValidator::product_ids(&body).unwrap_err().to_string(),
            "must specify a product ID"
        );
    }

    #[test]
    fn parse_id_rejects_non_numeric() {
        assert_eq!(RequestValidator::parse_id("42").unwrap(), 42);
        assert!(RequestValidator::parse_id("abc").is_err());
    }
}
