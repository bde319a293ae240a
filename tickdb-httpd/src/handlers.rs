//! Endpoint bodies for every route
//!
//! Handlers translate wire requests into backend calls and hand the outcome
//! to the response encoder. Authorization beyond identity resolution (may
//! this user write to this database?) happens here, not in the auth gate.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use tickdb_core::{normalize_batch, BatchPoints, Privilege, TickError};

use crate::response::{encode_results, http_error, json_body, write_error};
use crate::wait::{wait_for_index, WaitTimedOut};
use crate::{AppState, AuthUser};

pub const INDEX_HEADER: &str = "x-influxdb-index";

fn is_pretty(params: &HashMap<String, String>) -> bool {
    params.get("pretty").map(String::as_str) == Some("true")
}

/// GET /query — execute one or more statements.
pub async fn serve_query(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let q = params.get("q").map(String::as_str).unwrap_or("");
    let db = params.get("db").map(String::as_str).unwrap_or("");
    let pretty = is_pretty(&params);

    match state.backend.execute_query(q, db, user.as_ref()).await {
        Ok(results) => encode_results(&results, pretty),
        Err(e) if e.is_parse() => http_error(
            &format!("error parsing query: {}", e),
            pretty,
            StatusCode::BAD_REQUEST,
        ),
        Err(e) => http_error(&e.to_string(), pretty, StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// POST /write — decode, validate and forward a batch of points.
pub async fn serve_write(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    body: Bytes,
) -> Response {
    if state.config.write_trace {
        debug!(
            "write body received by handler: {}",
            String::from_utf8_lossy(&body)
        );
    }

    // End of input with nothing submitted is a no-op, not a decode error.
    if body.iter().all(u8::is_ascii_whitespace) {
        return StatusCode::OK.into_response();
    }

    let batch: BatchPoints = match serde_json::from_slice(&body) {
        Ok(batch) => batch,
        Err(e) => {
            return write_error(
                TickError::parse(e.to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
    };

    if batch.database.is_empty() {
        return write_error(TickError::DatabaseRequired, StatusCode::INTERNAL_SERVER_ERROR);
    }

    if !state.backend.database_exists(&batch.database) {
        return write_error(
            TickError::DatabaseNotFound(batch.database.clone()),
            StatusCode::NOT_FOUND,
        );
    }

    if state.config.require_authentication {
        let user = match &user {
            Some(user) => user,
            None => {
                return write_error(
                    TickError::authorize(format!(
                        "user is required to write to database {:?}",
                        batch.database
                    )),
                    StatusCode::UNAUTHORIZED,
                )
            }
        };
        if !user.authorize(Privilege::Write, &batch.database) {
            return write_error(
                TickError::authorize(format!(
                    "{:?} user is not authorized to write to database {:?}",
                    user.name, batch.database
                )),
                StatusCode::UNAUTHORIZED,
            );
        }
    }

    let points = match normalize_batch(&batch) {
        Ok(points) => points,
        Err(e) => return write_error(e, StatusCode::INTERNAL_SERVER_ERROR),
    };

    let retention_policy = if batch.retention_policy.is_empty() {
        state
            .backend
            .default_retention_policy(&batch.database)
            .unwrap_or_default()
    } else {
        batch.retention_policy.clone()
    };

    match state
        .backend
        .write_points(&batch.database, &retention_policy, points)
        .await
    {
        Ok(index) => {
            let mut resp = StatusCode::OK.into_response();
            if let Ok(value) = HeaderValue::from_str(&index.to_string()) {
                resp.headers_mut()
                    .insert(header::HeaderName::from_static(INDEX_HEADER), value);
            }
            resp
        }
        Err(e) => write_error(e, StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// OPTIONS /write — empty response for pre-flight requests.
pub async fn serve_options() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

/// GET|HEAD /ping — liveness probe.
pub async fn serve_ping() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

/// GET / — the node's current index as a plain decimal string.
pub async fn serve_index_root(State(state): State<AppState>) -> Response {
    state.backend.index().to_string().into_response()
}

/// GET /wait/:index — block until the backend index reaches the target or
/// the timeout (milliseconds, 0 or absent means unbounded) elapses.
pub async fn serve_wait(
    State(state): State<AppState>,
    Path(index): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let target: u64 = index.parse().unwrap_or(0);
    // Index 0 can never be told apart from "no index requested".
    if target == 0 {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let timeout_ms: u64 = params
        .get("timeout")
        .and_then(|t| t.parse().ok())
        .unwrap_or(0);
    let timeout_after = if timeout_ms == 0 {
        None
    } else {
        Some(Duration::from_millis(timeout_ms))
    };

    match wait_for_index(
        state.backend.clone(),
        target,
        timeout_after,
        state.config.wait.poll_interval(),
    )
    .await
    {
        Ok(()) => state.backend.index().to_string().into_response(),
        Err(WaitTimedOut) => StatusCode::REQUEST_TIMEOUT.into_response(),
    }
}

/// GET /status — node id and current index.
pub async fn serve_status(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    #[derive(Serialize)]
    struct Status {
        id: u64,
        index: u64,
    }

    let status = Status {
        id: state.backend.node_id(),
        index: state.backend.index(),
    };
    json_body(StatusCode::OK, &status, is_pretty(&params))
}

/// GET /metastore — stream a snapshot of the metadata store.
pub async fn serve_metastore(State(state): State<AppState>) -> Response {
    match state.backend.snapshot_metadata().await {
        Ok(snapshot) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/octet-stream"),
                (
                    header::CONTENT_DISPOSITION,
                    r#"attachment; filename="meta""#,
                ),
            ],
            snapshot,
        )
            .into_response(),
        Err(e) => http_error(&e.to_string(), false, StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// GET /data_nodes — all data nodes, ascending by id.
pub async fn serve_data_nodes(State(state): State<AppState>) -> Response {
    json_body(StatusCode::OK, &state.backend.data_nodes(), false)
}

#[derive(Deserialize)]
struct CreateDataNodeRequest {
    #[serde(default)]
    url: String,
}

/// POST /data_nodes — create a data node and provision its replica.
pub async fn serve_create_data_node(State(state): State<AppState>, body: Bytes) -> Response {
    let req: CreateDataNodeRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => return http_error(&e.to_string(), false, StatusCode::BAD_REQUEST),
    };

    if !req.url.is_empty() && req.url.parse::<axum::http::Uri>().is_err() {
        return http_error("invalid data node url", false, StatusCode::BAD_REQUEST);
    }

    let node = match state.backend.create_data_node(&req.url).await {
        Ok(node) => node,
        Err(TickError::DataNodeExists) => {
            return http_error(
                &TickError::DataNodeExists.to_string(),
                false,
                StatusCode::CONFLICT,
            )
        }
        Err(e) => return http_error(&e.to_string(), false, StatusCode::INTERNAL_SERVER_ERROR),
    };

    if let Err(e) = state.backend.create_replica(node.id, &node.url).await {
        return http_error(&e.to_string(), false, StatusCode::BAD_GATEWAY);
    }

    json_body(StatusCode::CREATED, &node, false)
}

/// DELETE /data_nodes/:id — remove a data node.
pub async fn serve_delete_data_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let id: u64 = match id.parse() {
        Ok(id) => id,
        Err(_) => return http_error("invalid node id", false, StatusCode::BAD_REQUEST),
    };

    match state.backend.delete_data_node(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(TickError::DataNodeNotFound) => http_error(
            &TickError::DataNodeNotFound.to_string(),
            false,
            StatusCode::NOT_FOUND,
        ),
        Err(e) => http_error(&e.to_string(), false, StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// POST /process_continuous_queries — trigger scheduled query evaluation.
pub async fn serve_process_continuous_queries(State(state): State<AppState>) -> Response {
    match state.backend.run_continuous_queries().await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => http_error(&e.to_string(), false, StatusCode::INTERNAL_SERVER_ERROR),
    }
}
