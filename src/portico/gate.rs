//! Access gate: return-to capture on every request, and guards on protected
//! routes.
//!
//! The capture stage runs for every request before routing. Anonymous visits to
//! anything except the login page, the signup page, the OAuth routes and
//! asset-like paths (any `.` in the path) are remembered. A signed-in visit to
//! the account page is remembered too, and no other signed-in path is.
//!
//! Guards run per route, after capture, so a rejected visit has already been
//! recorded by the time the visitor is sent to the login page.

use axum::{
    extract::{Extension, Request},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

use super::{
    error::GateError,
    namespace::Namespace,
    principal::{self, Principal},
    return_to,
    session::Session,
    AppState,
};

/// Physical paths the capture stage needs to recognise.
#[derive(Clone, Debug)]
pub struct PublicPaths {
    login: String,
    signup: String,
    oauth_prefix: String,
    account: String,
}

impl PublicPaths {
    #[must_use]
    pub fn new(namespace: &Namespace) -> Self {
        Self {
            login: namespace.resolve("/login"),
            signup: namespace.resolve("/signup"),
            oauth_prefix: namespace.resolve("/auth"),
            account: namespace.resolve("/account"),
        }
    }

    /// Whether a visit to `path` should be recorded as the return-to target.
    #[must_use]
    pub fn should_capture(&self, path: &str, authenticated: bool) -> bool {
        if authenticated {
            return path == self.account;
        }
        path != self.login
            && path != self.signup
            && !path.starts_with(&self.oauth_prefix)
            && !is_asset_like(path)
    }
}

fn is_asset_like(path: &str) -> bool {
    path.contains('.')
}

/// Outcome of the capture stage for one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capture {
    Captured,
    Skipped,
}

/// Evaluate the capture rule for `path` and record it if it applies.
pub fn capture(paths: &PublicPaths, session: &Session, path: &str, authenticated: bool) -> Capture {
    if paths.should_capture(path, authenticated) {
        return_to::capture(session, path);
        Capture::Captured
    } else {
        Capture::Skipped
    }
}

/// Middleware running the capture stage.
pub async fn capture_stage(
    Extension(state): Extension<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(session) = request.extensions().get::<Session>() {
        let path = request.uri().path();
        let authenticated = principal::current(session).is_some();
        let outcome = capture(state.public_paths(), session, path, authenticated);
        debug!(path, authenticated, ?outcome, "return-to capture");
    }

    next.run(request).await
}

/// Requirement attached to a route at registration time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Guard {
    /// A signed-in principal is required.
    RequiresPrincipal,
    /// The principal must have linked the named provider.
    RequiresProviderLink(String),
}

impl Guard {
    /// Shorthand for the two guards a provider feature route carries.
    #[must_use]
    pub fn authorized(provider: &str) -> Vec<Self> {
        vec![
            Self::RequiresPrincipal,
            Self::RequiresProviderLink(provider.to_string()),
        ]
    }
}

/// Evaluate `guards` in order; the first failing guard decides the rejection.
///
/// # Errors
/// Returns [`GateError::Unauthenticated`] without a principal and
/// [`GateError::Unauthorized`] when a required provider link is missing.
pub fn check(guards: &[Guard], principal: Option<&Principal>) -> Result<(), GateError> {
    for guard in guards {
        match (guard, principal) {
            (_, None) => return Err(GateError::Unauthenticated),
            (Guard::RequiresPrincipal, Some(_)) => {}
            (Guard::RequiresProviderLink(provider), Some(principal)) => {
                if !principal.is_linked(provider) {
                    return Err(GateError::Unauthorized(provider.clone()));
                }
            }
        }
    }
    Ok(())
}

/// Route-layer middleware enforcing `guards`.
pub async fn enforce(guards: Arc<[Guard]>, request: Request, next: Next) -> Response {
    let principal = principal::current_principal(&request);
    match check(&guards, principal.as_ref()) {
        Ok(()) => next.run(request).await,
        Err(err) => {
            debug!(path = request.uri().path(), "guard rejected request: {err}");
            let namespace = request
                .extensions()
                .get::<Arc<AppState>>()
                .map(|state| state.config().namespace().clone())
                .unwrap_or_default();
            err.respond(&namespace)
        }
    }
}
