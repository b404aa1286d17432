//! Response helpers. Records are written bare (no envelope) with explicit content types.

use crate::error::AppError;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Serialize `data` as the whole response body.
pub fn json_result<T: Serialize>(status: StatusCode, data: &T) -> Result<Response, AppError> {
    let body = serde_json::to_vec(data)?;
    Ok((
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
        body,
    )
        .into_response())
}

pub fn text_result(status: StatusCode, body: &'static str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_CONTENT_TYPE))],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_result_sets_charset_header() {
        let resp = json_result(StatusCode::CREATED, &serde_json::json!({"id": 1})).unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            JSON_CONTENT_TYPE
        );
    }

    #[test]
    fn text_result_is_plain() {
        let resp = text_result(StatusCode::OK, "ok");
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            TEXT_CONTENT_TYPE
        );
    }
}
