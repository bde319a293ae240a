//! TickDB HTTP API service
//!
//! The request pipeline in front of a TickDB node: route dispatch with a
//! composable middleware chain, the authentication gate, the batch-write
//! translator, and the long-poll wait-for-index primitive. Everything else —
//! query execution, storage, replication, credential persistence — lives
//! behind the [`backend::Backend`] trait.

pub mod auth;
pub mod backend;
pub mod config;
pub mod handlers;
pub mod memory;
pub mod middleware;
pub mod response;
pub mod wait;

use axum::http::{HeaderValue, Method};
use axum::routing::{on, MethodFilter, MethodRouter};
use axum::Router;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

pub use backend::Backend;
pub use config::HttpdConfig;
pub use memory::MemoryBackend;
use tickdb_core::User;

/// Shared application state: the backend handle and configuration. Both are
/// read-only for the life of the process; the route pipeline holds no other
/// cross-request state.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn Backend>,
    pub config: Arc<HttpdConfig>,
}

/// Identity resolved by the auth gate; absent when authentication is off,
/// not supplied, or in the zero-users bootstrap window.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Option<User>);

/// Endpoint shape for one route: with or without a resolved identity.
enum RouteHandler {
    /// Runs behind the auth gate; reads `AuthUser` from request extensions.
    Authenticated(MethodRouter<AppState>),
    Plain(MethodRouter<AppState>),
}

/// One entry in the immutable route table.
struct Route {
    name: &'static str,
    method: Method,
    pattern: &'static str,
    gzipped: bool,
    log: bool,
    handler: RouteHandler,
}

/// The full route table, built once at startup and never mutated.
fn routes() -> Vec<Route> {
    use handlers::*;
    use RouteHandler::{Authenticated, Plain};

    vec![
        Route {
            name: "query",
            method: Method::GET,
            pattern: "/query",
            gzipped: true,
            log: true,
            handler: Authenticated(on(MethodFilter::GET, serve_query)),
        },
        Route {
            name: "write",
            method: Method::OPTIONS,
            pattern: "/write",
            gzipped: true,
            log: true,
            handler: Plain(on(MethodFilter::OPTIONS, serve_options)),
        },
        Route {
            name: "write",
            method: Method::POST,
            pattern: "/write",
            gzipped: true,
            log: true,
            handler: Authenticated(on(MethodFilter::POST, serve_write)),
        },
        Route {
            name: "data_nodes_index",
            method: Method::GET,
            pattern: "/data_nodes",
            gzipped: true,
            log: false,
            handler: Plain(on(MethodFilter::GET, serve_data_nodes)),
        },
        Route {
            name: "data_nodes_create",
            method: Method::POST,
            pattern: "/data_nodes",
            gzipped: true,
            log: false,
            handler: Plain(on(MethodFilter::POST, serve_create_data_node)),
        },
        Route {
            name: "data_nodes_delete",
            method: Method::DELETE,
            pattern: "/data_nodes/:id",
            gzipped: true,
            log: false,
            handler: Plain(on(MethodFilter::DELETE, serve_delete_data_node)),
        },
        Route {
            name: "metastore",
            method: Method::GET,
            pattern: "/metastore",
            gzipped: false,
            log: false,
            handler: Plain(on(MethodFilter::GET, serve_metastore)),
        },
        Route {
            name: "status",
            method: Method::GET,
            pattern: "/status",
            gzipped: true,
            log: true,
            handler: Plain(on(MethodFilter::GET, serve_status)),
        },
        Route {
            name: "ping",
            method: Method::GET,
            pattern: "/ping",
            gzipped: true,
            log: true,
            handler: Plain(on(MethodFilter::GET, serve_ping)),
        },
        Route {
            name: "ping-head",
            method: Method::HEAD,
            pattern: "/ping",
            gzipped: true,
            log: true,
            handler: Plain(on(MethodFilter::HEAD, serve_ping)),
        },
        Route {
            name: "process_continuous_queries",
            method: Method::POST,
            pattern: "/process_continuous_queries",
            gzipped: false,
            log: false,
            handler: Plain(on(MethodFilter::POST, serve_process_continuous_queries)),
        },
        Route {
            name: "wait",
            method: Method::GET,
            pattern: "/wait/:index",
            gzipped: true,
            log: true,
            handler: Plain(on(MethodFilter::GET, serve_wait)),
        },
        Route {
            name: "index",
            method: Method::GET,
            pattern: "/",
            gzipped: true,
            log: true,
            handler: Plain(on(MethodFilter::GET, serve_index_root)),
        },
    ]
}

/// Build the application router: wrap each route table entry in the auth
/// gate (if its handler needs identity) and the middleware chain, then
/// register it.
pub fn create_router(state: AppState) -> Router {
    let version = HeaderValue::from_str(&state.config.version)
        .unwrap_or_else(|_| HeaderValue::from_static("unknown"));

    let mut router = Router::new();
    for route in routes() {
        tracing::debug!(
            "registering route {} {} {}",
            route.name,
            route.method,
            route.pattern
        );
        let handler = match route.handler {
            RouteHandler::Authenticated(handler) => handler.layer(
                axum::middleware::from_fn_with_state(state.clone(), auth::authenticate),
            ),
            RouteHandler::Plain(handler) => handler,
        };
        let handler = middleware::compose(
            route.name,
            route.gzipped,
            route.log,
            version.clone(),
            handler,
        );
        router = router.route(route.pattern, handler);
    }

    router
        .layer(RequestBodyLimitLayer::new(state.config.max_request_size))
        .with_state(state)
}
