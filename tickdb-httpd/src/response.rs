//! Response encoding and error classification
//!
//! Every query/write/admin response funnels through these helpers: a results
//! envelope (or a single ad-hoc error) rendered as compact or pretty JSON,
//! with the HTTP status derived from the envelope's aggregate error.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use tickdb_core::{Results, StatementResult, TickError};

/// Serialize `value` as the response body, compact or pretty.
pub fn json_body<T: Serialize>(status: StatusCode, value: &T, pretty: bool) -> Response {
    let body = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };

    match body {
        Ok(body) => (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "application/json")],
            format!(r#"{{"error":"failed to encode response: {}"}}"#, e),
        )
            .into_response(),
    }
}

/// Map the envelope's aggregate error to a status. Absent data ("measurement
/// not found", "field not found…") is an empty-result success, not a client
/// error; authorization failures are 401; everything else is 500.
fn classify(err: Option<&TickError>) -> StatusCode {
    match err {
        None => StatusCode::OK,
        Some(e) if e.is_authorization() => StatusCode::UNAUTHORIZED,
        Some(e) => {
            let message = e.to_string();
            if message == "measurement not found" || message.starts_with("field not found") {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Write a results envelope, picking the status from its aggregate error.
/// All per-statement results are emitted regardless of status.
pub fn encode_results(results: &Results, pretty: bool) -> Response {
    json_body(classify(results.error()), results, pretty)
}

/// Write an ad-hoc error envelope `{"error":"..."}` with the given status.
pub fn http_error(message: &str, pretty: bool, status: StatusCode) -> Response {
    json_body(
        status,
        &Results::from_error(TickError::internal(message)),
        pretty,
    )
}

/// Write a single-result error body, as the write path reports failures.
pub fn write_error(err: TickError, status: StatusCode) -> Response {
    json_body(status, &StatementResult::error(err), false)
}
