//! Page handlers and shared rendering helpers.
//!
//! Pages are plain server-rendered HTML. Every state-changing form embeds the
//! session's anti-forgery token, and every redirect goes through the namespace.

pub mod api;
pub mod contact;
pub mod home;
pub mod reset;
pub mod status;
pub mod user;

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use std::fmt::Display;
use std::fmt::Write as _;
use tracing::error;

use super::{
    csrf::{self, CSRF_FIELD},
    error::GateError,
    flash::{self, FlashKind},
    principal::{self, Principal},
    session::Session,
    utils::escape_html,
    AppState,
};

/// Log `err` and answer with a bare 500.
pub(crate) fn internal_error(context: &str, err: impl Display) -> Response {
    error!("{context}: {err}");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

/// 303 to a logical path.
pub(crate) fn redirect(state: &AppState, logical: &str) -> Response {
    Redirect::to(&state.path(logical)).into_response()
}

/// The signed-in principal, or the login redirect a guard would have sent.
pub(crate) fn signed_in(state: &AppState, session: &Session) -> Result<Principal, Response> {
    principal::current(session)
        .ok_or_else(|| GateError::Unauthenticated.respond(state.config().namespace()))
}

pub(crate) fn flash_errors(session: &Session, errors: &[&str]) {
    for message in errors {
        flash::push(session, FlashKind::Errors, *message);
    }
}

/// Hidden input carrying the session's anti-forgery token.
pub(crate) fn csrf_input(session: &Session) -> anyhow::Result<String> {
    let token = csrf::token(session)?;
    Ok(format!(
        r#"<input type="hidden" name="{CSRF_FIELD}" value="{}">"#,
        escape_html(&token)
    ))
}

/// Wrap `body` in the site layout; drains queued notices.
pub(crate) fn render(state: &AppState, session: &Session, title: &str, body: &str) -> Response {
    let signed_in = principal::current(session).is_some();
    let link = |logical: &str, label: &str| {
        format!(r#"<a href="{}">{label}</a>"#, escape_html(&state.path(logical)))
    };

    let mut nav = vec![link("/", "Home"), link("/api", "API"), link("/contact", "Contact")];
    if signed_in {
        nav.push(link("/account", "Account"));
        nav.push(link("/logout", "Logout"));
    } else {
        nav.push(link("/login", "Login"));
        nav.push(link("/signup", "Create Account"));
    }

    let mut notices = String::new();
    for notice in flash::drain(session) {
        let class = match notice.kind {
            FlashKind::Errors => "alert-danger",
            FlashKind::Success => "alert-success",
            FlashKind::Info => "alert-info",
        };
        let _ = write!(
            notices,
            r#"<div class="alert {class}">{}</div>"#,
            escape_html(&notice.message)
        );
    }

    Html(format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title} | Portico</title></head>\
         <body><nav>{}</nav><main>{notices}<h1>{title}</h1>{body}</main></body></html>",
        nav.join(" "),
        title = escape_html(title),
    ))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portico::{
        directory::MemoryDirectory, mailer::LogMailer, namespace::Namespace,
        oauth::ProviderRegistry, session::MemorySessionStore, AppConfig,
    };
    use std::{sync::Arc, time::Duration};

    fn state() -> anyhow::Result<AppState> {
        Ok(AppState::new(
            AppConfig::new(Namespace::new(Some("app"))?),
            Arc::new(MemorySessionStore::new(Duration::from_secs(60))),
            Arc::new(MemoryDirectory::new()),
            Arc::new(LogMailer),
            ProviderRegistry::new(),
        ))
    }

    async fn body_text(response: Response) -> anyhow::Result<String> {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    #[tokio::test]
    async fn render_escapes_notices_and_namespaces_links() -> anyhow::Result<()> {
        let state = state()?;
        let session = Session::new();
        flash::push(&session, FlashKind::Errors, "<script>");

        let html = body_text(render(&state, &session, "Home", "<p>hi</p>")).await?;
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains(r#"href="/app/login""#));
        assert!(html.contains("<p>hi</p>"));
        assert!(flash::drain(&session).is_empty());
        Ok(())
    }

    #[test]
    fn csrf_input_matches_session_token() -> anyhow::Result<()> {
        let session = Session::new();
        let input = csrf_input(&session)?;
        assert!(input.contains(&csrf::token(&session)?));
        Ok(())
    }
}
