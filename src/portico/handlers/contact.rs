use axum::{
    extract::{Extension, Form},
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use super::{csrf_input, flash_errors, internal_error, redirect, render};
use crate::portico::{
    flash::{self, FlashKind},
    mailer::MailMessage,
    principal,
    session::Session,
    utils::{escape_html, normalize_email, valid_email},
    AppState,
};

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct ContactForm {
    name: String,
    email: String,
    message: String,
}

fn contact_errors(form: &ContactForm, email: &str) -> Vec<&'static str> {
    let mut errors = Vec::new();
    if form.name.trim().is_empty() {
        errors.push("Name cannot be blank.");
    }
    if !valid_email(email) {
        errors.push("Email is not valid.");
    }
    if form.message.trim().is_empty() {
        errors.push("Message cannot be blank.");
    }
    errors
}

pub async fn contact_page(
    state: Extension<Arc<AppState>>,
    session: Extension<Session>,
) -> impl IntoResponse {
    let csrf = match csrf_input(&session) {
        Ok(csrf) => csrf,
        Err(err) => return internal_error("Failed to create CSRF token", err),
    };
    let (name, email) = principal::current(&session).map_or_else(
        || (String::new(), String::new()),
        |principal| {
            (
                escape_html(principal.display_name.as_deref().unwrap_or("")),
                escape_html(&principal.email),
            )
        },
    );
    let action = escape_html(&state.path("/contact"));
    let body = format!(
        r#"<form method="POST" action="{action}">{csrf}
<label>Name <input type="text" name="name" value="{name}"></label>
<label>Email <input type="email" name="email" value="{email}"></label>
<label>Message <textarea name="message" rows="7"></textarea></label>
<button type="submit">Send</button></form>"#
    );
    render(&state, &session, "Contact", &body)
}

pub async fn send(
    state: Extension<Arc<AppState>>,
    session: Extension<Session>,
    Form(form): Form<ContactForm>,
) -> impl IntoResponse {
    let email = normalize_email(&form.email);
    let errors = contact_errors(&form, &email);
    if !errors.is_empty() {
        flash_errors(&session, &errors);
        return redirect(&state, "/contact");
    }

    let message = MailMessage::from_visitor(
        state.config().contact_to(),
        form.name.trim(),
        &email,
        &form.message,
    );
    match state.mailer().send(&message) {
        Ok(()) => flash::push(&session, FlashKind::Success, "Email has been sent successfully!"),
        Err(err) => {
            warn!("Contact mail failed: {err:#}");
            flash_errors(&session, &["Your message could not be sent. Please try again."]);
        }
    }
    redirect(&state, "/contact")
}
