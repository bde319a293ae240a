//! Per-route middleware chain
//!
//! Every route gets the same wrapper stack, applied in a fixed order by a
//! fold at registration time. The order is load-bearing: recovery must be
//! outermost so a panic anywhere inside is always logged, and gzip must sit
//! innermost so authenticated error responses are compressed too.

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request};
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::{from_fn, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::MethodRouter;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::FutureExt;
use http_body::Body as _;
use std::io::Write;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

use crate::AppState;

pub const REQUEST_ID: HeaderName = HeaderName::from_static("request-id");
pub const VERSION_HEADER: HeaderName = HeaderName::from_static("x-influxdb-version");

/// The wrappers applied to every route, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Middleware {
    Recovery,
    Logging,
    RequestId,
    Cors,
    VersionHeader,
    Gzip,
}

pub const CHAIN: [Middleware; 6] = [
    Middleware::Recovery,
    Middleware::Logging,
    Middleware::RequestId,
    Middleware::Cors,
    Middleware::VersionHeader,
    Middleware::Gzip,
];

/// Wrap a route's handler in the middleware chain. `Gzip` and `Logging`
/// honor the route's flags; everything else is unconditional.
///
/// Each `layer` call wraps everything applied so far, so folding the chain
/// from its innermost end leaves `Recovery` outermost.
pub fn compose(
    name: &'static str,
    gzipped: bool,
    log: bool,
    version: HeaderValue,
    handler: MethodRouter<AppState>,
) -> MethodRouter<AppState> {
    CHAIN.iter().rev().fold(handler, |handler, mw| match mw {
        Middleware::Gzip if gzipped => handler.layer(from_fn(gzip)),
        Middleware::Gzip => handler,
        Middleware::VersionHeader => {
            let version = version.clone();
            handler.layer(from_fn(move |req: Request, next: Next| {
                version_header(req, next, version.clone())
            }))
        }
        Middleware::Cors => handler.layer(from_fn(cors)),
        Middleware::RequestId => handler.layer(from_fn(request_id)),
        Middleware::Logging if log => {
            handler.layer(from_fn(move |req: Request, next: Next| logging(req, next, name)))
        }
        Middleware::Logging => handler,
        Middleware::Recovery => {
            handler.layer(from_fn(move |req: Request, next: Next| recovery(req, next, name)))
        }
    })
}

fn gzip_bytes(input: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(input)?;
    encoder.finish()
}

/// Compress the response when the client accepts gzip. The decision is
/// per-request; a negotiated response is always tagged with
/// `Content-Encoding: gzip`, including empty bodies.
async fn gzip(req: Request, next: Next) -> Response {
    let accepts_gzip = req
        .headers()
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("gzip"))
        .unwrap_or(false);

    let resp = next.run(req).await;
    if !accepts_gzip {
        return resp;
    }

    let (mut parts, body) = resp.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => Bytes::new(),
    };

    if bytes.is_empty() {
        parts
            .headers
            .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        return Response::from_parts(parts, Body::empty());
    }

    match gzip_bytes(&bytes) {
        Ok(compressed) => {
            parts
                .headers
                .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            parts.headers.remove(header::CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(compressed))
        }
        Err(_) => Response::from_parts(parts, Body::from(bytes)),
    }
}

/// Reflect the request `Origin` into the CORS headers and terminate OPTIONS
/// requests before they reach any endpoint.
async fn cors(req: Request, next: Next) -> Response {
    let origin = req.headers().get(header::ORIGIN).cloned();

    let mut resp = if req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };

    if let Some(origin) = origin {
        let headers = resp.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("DELETE, GET, OPTIONS, POST, PUT"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(
                "Accept, Accept-Encoding, Authorization, Content-Length, Content-Type, \
                 X-CSRF-Token, X-HTTP-Method-Override",
            ),
        );
    }

    resp
}

/// Tag the request and response with a fresh unique id before dispatch.
async fn request_id(mut req: Request, next: Next) -> Response {
    let id = Uuid::new_v4().to_string();
    let value = HeaderValue::from_str(&id).unwrap_or_else(|_| HeaderValue::from_static("-"));

    req.headers_mut().insert(REQUEST_ID, value.clone());
    let mut resp = next.run(req).await;
    resp.headers_mut().insert(REQUEST_ID, value);
    resp
}

async fn version_header(req: Request, next: Next, version: HeaderValue) -> Response {
    let mut resp = next.run(req).await;
    resp.headers_mut().insert(VERSION_HEADER, version);
    resp
}

/// Access log line: method, path, caller host, status, bytes, request id,
/// latency. Runs outside the request-id wrapper and reads the id off the
/// response.
async fn logging(req: Request, next: Next, name: &'static str) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let host = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());

    let resp = next.run(req).await;

    let bytes = resp.body().size_hint().exact().unwrap_or(0);
    let request_id = resp
        .headers()
        .get(REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    info!(
        target: "tickdb_httpd::access",
        route = name,
        "{} - {} {} {} {} {} {:.3}ms",
        host,
        method,
        uri,
        resp.status().as_u16(),
        bytes,
        request_id,
        start.elapsed().as_secs_f64() * 1000.0,
    );

    resp
}

/// Catch panics from anywhere inside the chain so the process keeps serving.
/// The panic is logged in the access-line format; the request completes with
/// the default status and an empty body.
async fn recovery(req: Request, next: Next, name: &'static str) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();

    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(resp) => resp,
        Err(panic) => {
            let message = panic
                .downcast_ref::<String>()
                .map(String::as_str)
                .or_else(|| panic.downcast_ref::<&str>().copied())
                .unwrap_or("unknown panic");
            error!(
                target: "tickdb_httpd::access",
                route = name,
                "{} {} {:.3}ms [err:{}]",
                method,
                uri,
                start.elapsed().as_secs_f64() * 1000.0,
                message,
            );
            Response::new(Body::empty())
        }
    }
}
