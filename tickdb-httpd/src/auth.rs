//! Credential extraction and the authentication gate

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::HashMap;

use tickdb_core::{TickError, TickResult};

use crate::response::http_error;
use crate::{AppState, AuthUser};

/// A username/password pair supplied with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Extract credentials from a request. The `u`/`p` query parameters take
/// precedence when both are non-empty; otherwise a Basic Authorization
/// header is accepted.
pub fn parse_credentials(req: &Request) -> TickResult<Credentials> {
    if let Some(query) = req.uri().query() {
        if let Ok(params) = serde_urlencoded::from_str::<HashMap<String, String>>(query) {
            if let (Some(u), Some(p)) = (params.get("u"), params.get("p")) {
                if !u.is_empty() && !p.is_empty() {
                    return Ok(Credentials {
                        username: u.clone(),
                        password: p.clone(),
                    });
                }
            }
        }
    }

    basic_auth(req.headers())
        .ok_or_else(|| TickError::authorize("unable to parse Basic Auth credentials"))
}

fn basic_auth(headers: &HeaderMap) -> Option<Credentials> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Gate for routes whose endpoint needs a resolved identity.
///
/// When authentication is not required the endpoint runs with an absent
/// identity. When it is required, the same happens while the backend has
/// zero users — the bootstrap exception that lets the first administrative
/// user be created. Any credential failure terminates the request with a
/// 401 envelope; the endpoint body never runs on that path.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    if !state.config.require_authentication || state.backend.user_count() == 0 {
        req.extensions_mut().insert(AuthUser(None));
        return next.run(req).await;
    }

    let credentials = match parse_credentials(&req) {
        Ok(c) => c,
        Err(e) => return http_error(&e.to_string(), false, StatusCode::UNAUTHORIZED),
    };
    if credentials.username.is_empty() {
        return http_error("username required", false, StatusCode::UNAUTHORIZED);
    }

    match state
        .backend
        .authenticate(&credentials.username, &credentials.password)
        .await
    {
        Ok(user) => {
            req.extensions_mut().insert(AuthUser(Some(user)));
            next.run(req).await
        }
        Err(e) => http_error(&e.to_string(), false, StatusCode::UNAUTHORIZED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(uri: &str, authorization: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri(uri);
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn basic(user: &str, pass: &str) -> String {
        format!("Basic {}", BASE64.encode(format!("{}:{}", user, pass)))
    }

    #[test]
    fn test_query_params_take_precedence() {
        let req = request("/query?u=lisa&p=password", Some(&basic("other", "pw")));
        let creds = parse_credentials(&req).unwrap();
        assert_eq!(creds.username, "lisa");
        assert_eq!(creds.password, "password");
    }

    #[test]
    fn test_empty_query_params_fall_through() {
        let req = request("/query?u=&p=", Some(&basic("lisa", "password")));
        let creds = parse_credentials(&req).unwrap();
        assert_eq!(creds.username, "lisa");
    }

    #[test]
    fn test_basic_auth() {
        let req = request("/query", Some(&basic("lisa", "pass:word")));
        let creds = parse_credentials(&req).unwrap();
        assert_eq!(creds.username, "lisa");
        // Everything after the first colon is password.
        assert_eq!(creds.password, "pass:word");
    }

    #[test]
    fn test_missing_credentials() {
        let err = parse_credentials(&request("/query", None)).unwrap_err();
        assert_eq!(err.to_string(), "unable to parse Basic Auth credentials");

        let err = parse_credentials(&request("/query", Some("Bearer abc"))).unwrap_err();
        assert!(err.is_authorization());

        let err = parse_credentials(&request("/query", Some("Basic !!!"))).unwrap_err();
        assert!(err.is_authorization());
    }
}
