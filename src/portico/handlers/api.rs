//! API examples: provider landing list, upload form and per-provider pages.

use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::{fmt::Write as _, sync::Arc};
use tracing::info;

use super::{internal_error, redirect, render, signed_in};
use crate::portico::{
    flash::{self, FlashKind},
    oauth::{self, FlowKind},
    session::Session,
    utils::escape_html,
    AppState,
};

pub async fn landing(
    state: Extension<Arc<AppState>>,
    session: Extension<Session>,
) -> impl IntoResponse {
    let mut body = String::from("<ul>");
    for (spec, _) in state.providers().iter() {
        let kind = match spec.flow {
            FlowKind::SignIn => "sign-in",
            FlowKind::Authorize { .. } => "authorize",
        };
        let _ = write!(
            body,
            r#"<li><a href="{}">{}</a> ({kind})</li>"#,
            escape_html(&state.path(&format!("/api/{}", spec.name))),
            spec.label
        );
    }
    let _ = write!(
        body,
        r#"<li><a href="{}">File Upload</a></li></ul>"#,
        escape_html(&state.path("/api/upload"))
    );
    render(&state, &session, "API Examples", &body)
}

pub async fn upload_page(
    state: Extension<Arc<AppState>>,
    session: Extension<Session>,
) -> impl IntoResponse {
    let action = escape_html(&state.path("/api/upload"));
    let body = format!(
        r#"<form method="POST" action="{action}" enctype="multipart/form-data">
<input type="file" name="myFile">
<button type="submit">Upload</button></form>"#
    );
    render(&state, &session, "File Upload", &body)
}

/// Accepts the upload without an anti-forgery token.
pub async fn upload(
    state: Extension<Arc<AppState>>,
    session: Extension<Session>,
    body: Bytes,
) -> impl IntoResponse {
    info!(bytes = body.len(), "file uploaded");
    flash::push(&session, FlashKind::Success, "File was uploaded successfully.");
    redirect(&state, "/api/upload")
}

/// Feature page for a provider; mounted behind the provider link guard.
pub fn provider_page(state: &AppState, session: &Session, provider: &str) -> Response {
    let principal = match signed_in(state, session) {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    let Some(spec) = oauth::spec(provider) else {
        return internal_error("Provider page without a table row", provider);
    };

    let subject = principal
        .credential(spec.name)
        .map_or_else(String::new, |credential| escape_html(&credential.subject));
    let body = format!(
        "<p>Your {} account is connected (id {subject}).</p>",
        spec.label
    );
    render(state, session, &format!("{} API", spec.label), &body)
}

/// Landing page for visitors who reached a provider page without a link.
pub async fn connect_page(
    state: Extension<Arc<AppState>>,
    session: Extension<Session>,
    Path(provider): Path<String>,
) -> Response {
    let Some(spec) = oauth::spec(&provider) else {
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    };

    let body = if state.providers().get(spec.name).is_some() {
        format!(
            r#"<p>Connect your {label} account to continue.</p><p><a href="{}">Connect {label}</a></p>"#,
            escape_html(&state.path(&format!("/auth/{}", spec.name))),
            label = spec.label
        )
    } else {
        format!("<p>{} is not configured on this server.</p>", spec.label)
    };
    render(&state, &session, &format!("Connect {}", spec.label), &body)
}
