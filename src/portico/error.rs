//! Request-level failures raised by the gate, the CSRF check and the OAuth
//! orchestrator.
//!
//! Everything except a broken session store resolves to a redirect; callers turn
//! an error into a response with [`GateError::respond`], which needs the
//! namespace to build redirect targets.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use thiserror::Error;

use super::namespace::Namespace;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("a linked {0} account is required")]
    Unauthorized(String),
    #[error("invalid or missing anti-forgery token")]
    CsrfMismatch,
    #[error("{provider} callback failed: {cause}")]
    ProviderCallbackFailure {
        provider: String,
        /// Logical path the visitor is sent to.
        failure_redirect: String,
        cause: String,
    },
    #[error("session store unavailable: {0}")]
    SessionStoreUnavailable(String),
}

impl GateError {
    pub(crate) fn store(err: anyhow::Error) -> Self {
        Self::SessionStoreUnavailable(format!("{err:#}"))
    }

    pub(crate) fn callback(
        provider: &str,
        failure_redirect: &str,
        cause: impl Into<String>,
    ) -> Self {
        Self::ProviderCallbackFailure {
            provider: provider.to_string(),
            failure_redirect: failure_redirect.to_string(),
            cause: cause.into(),
        }
    }

    /// Resolve the error into the response the visitor sees.
    #[must_use]
    pub fn respond(self, namespace: &Namespace) -> Response {
        match self {
            Self::Unauthenticated => Redirect::to(&namespace.resolve("/login")).into_response(),
            Self::Unauthorized(provider) => {
                Redirect::to(&namespace.resolve(&format!("/connect/{provider}"))).into_response()
            }
            Self::CsrfMismatch => {
                (StatusCode::FORBIDDEN, "Invalid or missing CSRF token").into_response()
            }
            Self::ProviderCallbackFailure {
                failure_redirect, ..
            } => Redirect::to(&namespace.resolve(&failure_redirect)).into_response(),
            Self::SessionStoreUnavailable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}
