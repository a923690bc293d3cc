//! Forgotten password flow.
//!
//! `POST /forgot` mails a single-use link; `/reset/:token` sets the new
//! password, consumes the token and signs the visitor in. The forgot form
//! answers the same way whether or not an account exists for the address.

use axum::{
    extract::{Extension, Form, Path},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::{csrf_input, flash_errors, internal_error, redirect, render, user::password_errors};
use crate::portico::{
    flash::{self, FlashKind},
    mailer::MailMessage,
    principal,
    session::Session,
    utils::{escape_html, normalize_email, valid_email},
    AppState,
};

const INVALID_TOKEN_MESSAGE: &str = "Password reset token is invalid or has expired.";

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct ForgotForm {
    email: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct ResetForm {
    password: String,
    #[serde(rename = "confirmPassword")]
    confirm_password: String,
}

/// Tokens are URL-safe base64; anything else cannot have been issued.
fn well_formed(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub async fn forgot_page(
    state: Extension<Arc<AppState>>,
    session: Extension<Session>,
) -> impl IntoResponse {
    if principal::current(&session).is_some() {
        return redirect(&state, "/");
    }
    let csrf = match csrf_input(&session) {
        Ok(csrf) => csrf,
        Err(err) => return internal_error("Failed to create CSRF token", err),
    };
    let action = escape_html(&state.path("/forgot"));
    let body = format!(
        r#"<p>Enter your email address below and we will send you password reset instructions.</p>
<form method="POST" action="{action}">{csrf}
<label>Email <input type="email" name="email" autofocus></label>
<button type="submit">Reset Password</button></form>"#
    );
    render(&state, &session, "Forgot Password", &body)
}

pub async fn forgot(
    state: Extension<Arc<AppState>>,
    session: Extension<Session>,
    Form(form): Form<ForgotForm>,
) -> impl IntoResponse {
    let email = normalize_email(&form.email);
    if !valid_email(&email) {
        flash_errors(&session, &["Please enter a valid email address."]);
        return redirect(&state, "/forgot");
    }

    let token = match state.directory().issue_reset_token(&email).await {
        Ok(token) => token,
        Err(err) => return internal_error("Failed to issue reset token", err),
    };

    if let Some(token) = token {
        let link = state.absolute_url(&format!("/reset/{token}"));
        if let Err(err) = state
            .mailer()
            .send(&MailMessage::password_reset(&email, &link))
        {
            warn!("Password reset mail failed: {err:#}");
            flash_errors(&session, &["The reset e-mail could not be sent. Please try again."]);
            return redirect(&state, "/forgot");
        }
        info!("password reset mailed");
    }

    flash::push(
        &session,
        FlashKind::Info,
        format!("If an account exists for {email}, an e-mail has been sent with further instructions."),
    );
    redirect(&state, "/forgot")
}

pub async fn reset_page(
    state: Extension<Arc<AppState>>,
    session: Extension<Session>,
    Path(token): Path<String>,
) -> Response {
    if principal::current(&session).is_some() {
        return redirect(&state, "/");
    }
    let valid = if well_formed(&token) {
        match state.directory().reset_token_valid(&token).await {
            Ok(valid) => valid,
            Err(err) => return internal_error("Failed to check reset token", err),
        }
    } else {
        false
    };
    if !valid {
        flash_errors(&session, &[INVALID_TOKEN_MESSAGE]);
        return redirect(&state, "/forgot");
    }

    let csrf = match csrf_input(&session) {
        Ok(csrf) => csrf,
        Err(err) => return internal_error("Failed to create CSRF token", err),
    };
    let action = escape_html(&state.path(&format!("/reset/{token}")));
    let body = format!(
        r#"<form method="POST" action="{action}">{csrf}
<label>New Password <input type="password" name="password" autofocus></label>
<label>Confirm Password <input type="password" name="confirmPassword"></label>
<button type="submit">Change Password</button></form>"#
    );
    render(&state, &session, "Reset Password", &body)
}

pub async fn reset(
    state: Extension<Arc<AppState>>,
    session: Extension<Session>,
    Path(token): Path<String>,
    Form(form): Form<ResetForm>,
) -> Response {
    if !well_formed(&token) {
        flash_errors(&session, &[INVALID_TOKEN_MESSAGE]);
        return redirect(&state, "/forgot");
    }

    let errors = password_errors(&form.password, &form.confirm_password);
    if !errors.is_empty() {
        flash_errors(&session, &errors);
        return redirect(&state, &format!("/reset/{token}"));
    }

    let principal = match state.directory().reset_password(&token, &form.password).await {
        Ok(Some(principal)) => principal,
        Ok(None) => {
            flash_errors(&session, &[INVALID_TOKEN_MESSAGE]);
            return redirect(&state, "/forgot");
        }
        Err(err) => return internal_error("Failed to reset password", err),
    };

    if let Err(err) = principal::establish(&session, &principal) {
        return internal_error("Failed to store principal", err);
    }
    if let Err(err) = state
        .mailer()
        .send(&MailMessage::password_changed(&principal.email))
    {
        warn!(user_id = %principal.user_id, "Password change confirmation failed: {err:#}");
    }
    info!(user_id = %principal.user_id, "password reset");
    flash::push(&session, FlashKind::Success, "Success! Your password has been changed.");
    redirect(&state, "/")
}
