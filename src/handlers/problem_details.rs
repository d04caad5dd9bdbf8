//! RFC 7807 problem responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    pub title: String,
    pub status: u16,
    pub detail: String,
}

fn problem(status: StatusCode, title: &str, detail: impl Into<String>) -> Response {
    (
        status,
        Json(ProblemDetails {
            title: title.to_string(),
            status: status.as_u16(),
            detail: detail.into(),
        }),
    )
        .into_response()
}

pub fn not_found(detail: impl Into<String>) -> Response {
    problem(StatusCode::NOT_FOUND, "Not Found", detail)
}

pub fn conflict(detail: impl Into<String>) -> Response {
    problem(StatusCode::CONFLICT, "Conflict", detail)
}

pub fn quota_exhausted(detail: impl Into<String>) -> Response {
    problem(StatusCode::PAYMENT_REQUIRED, "Quota Exhausted", detail)
}

pub fn rate_limited(detail: impl Into<String>) -> Response {
    problem(StatusCode::TOO_MANY_REQUESTS, "Too Many Requests", detail)
}

pub fn gone(detail: impl Into<String>) -> Response {
    problem(StatusCode::GONE, "Gone", detail)
}

pub fn internal_error(detail: impl Into<String>) -> Response {
    problem(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error", detail)
}
