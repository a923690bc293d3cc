//! Anti-forgery tokens and the exemption policy.
//!
//! Each session carries one token, created the first time a form is rendered.
//! State-changing requests must echo it in the `x-csrf-token` header or the
//! `_csrf` form field. The upload endpoint is exempt because multipart upload
//! clients cannot carry the token.

use anyhow::Result;
use axum::{
    body::{self, Body},
    extract::{Extension, Request},
    http::{header::CONTENT_TYPE, Method},
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::{
    error::GateError,
    namespace::Namespace,
    session::Session,
    utils::{constant_time_eq, random_token},
    AppState,
};

pub const CSRF_KEY: &str = "portico.csrf";
pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_FIELD: &str = "_csrf";

const MAX_FORM_BYTES: usize = 1024 * 1024;

/// Physical paths that skip token verification.
#[derive(Clone, Debug)]
pub struct CsrfPolicy {
    exempt: Vec<String>,
}

impl CsrfPolicy {
    #[must_use]
    pub fn new(namespace: &Namespace) -> Self {
        Self {
            exempt: vec![namespace.resolve("/api/upload")],
        }
    }

    #[must_use]
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt.iter().any(|exempt| exempt == path)
    }
}

/// The session's token, created on first use.
///
/// # Errors
/// Returns an error if a new token cannot be generated.
pub fn token(session: &Session) -> Result<String> {
    if let Some(existing) = session.get::<String>(CSRF_KEY) {
        return Ok(existing);
    }
    let token = random_token()?;
    session.set_value(CSRF_KEY, Value::String(token.clone()));
    Ok(token)
}

fn is_safe(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

/// Middleware rejecting state-changing requests without the session token.
pub async fn verify(
    Extension(state): Extension<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if is_safe(request.method()) || state.csrf_policy().is_exempt(request.uri().path()) {
        return next.run(request).await;
    }

    match check(request).await {
        Ok(request) => next.run(request).await,
        Err(err) => err.respond(state.config().namespace()),
    }
}

/// Verify the token and hand back the request with its body intact.
async fn check(request: Request) -> Result<Request, GateError> {
    let expected = request
        .extensions()
        .get::<Session>()
        .and_then(|session| session.get::<String>(CSRF_KEY));

    let Some(expected) = expected else {
        debug!(path = request.uri().path(), "no CSRF token in session");
        return Err(GateError::CsrfMismatch);
    };

    let header_token = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);

    let (presented, request) = match header_token {
        Some(token) => (Some(token), request),
        None if is_form(&request) => read_form_token(request).await?,
        None => (None, request),
    };

    match presented {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => Ok(request),
        _ => {
            debug!(path = request.uri().path(), "CSRF token mismatch");
            Err(GateError::CsrfMismatch)
        }
    }
}

fn is_form(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"))
}

async fn read_form_token(request: Request) -> Result<(Option<String>, Request), GateError> {
    let (parts, body) = request.into_parts();
    let bytes = body::to_bytes(body, MAX_FORM_BYTES)
        .await
        .map_err(|_| GateError::CsrfMismatch)?;

    let token = url::form_urlencoded::parse(&bytes)
        .find(|(key, _)| key == CSRF_FIELD)
        .map(|(_, value)| value.into_owned());

    Ok((token, Request::from_parts(parts, Body::from(bytes))))
}
