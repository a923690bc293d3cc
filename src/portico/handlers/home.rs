use axum::{extract::Extension, response::IntoResponse};
use std::sync::Arc;

use super::render;
use crate::portico::{principal, session::Session, utils::escape_html, AppState};

pub async fn index(
    state: Extension<Arc<AppState>>,
    session: Extension<Session>,
) -> impl IntoResponse {
    let body = match principal::current(&session) {
        Some(principal) => format!(
            "<p>Signed in as {}.</p>",
            escape_html(principal.display_name.as_deref().unwrap_or(&principal.email))
        ),
        None => "<p>Sign in to manage your account and connected providers.</p>".to_string(),
    };
    render(&state, &session, "Home", &body)
}
