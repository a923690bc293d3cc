//! Password sign-in, signup and account settings.
//!
//! A successful sign-in renews the session id and sends the visitor to the
//! return-to entry captured by the gate, falling back to the home page.

use axum::{
    extract::{Extension, Form, Path},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use std::{fmt::Write as _, sync::Arc};
use tracing::{info, warn};

use super::{csrf_input, flash_errors, internal_error, redirect, render, signed_in};
use crate::portico::{
    flash::{self, FlashKind},
    oauth,
    principal, return_to,
    session::Session,
    utils::{escape_html, normalize_email, valid_email},
    AppState,
};

const MIN_PASSWORD_LENGTH: usize = 4;

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct LoginForm {
    email: String,
    password: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct SignupForm {
    email: String,
    password: String,
    #[serde(rename = "confirmPassword")]
    confirm_password: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct ProfileForm {
    email: String,
    name: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct PasswordForm {
    password: String,
    #[serde(rename = "confirmPassword")]
    confirm_password: String,
}

pub(super) fn password_errors(password: &str, confirm: &str) -> Vec<&'static str> {
    let mut errors = Vec::new();
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.push("Password must be at least 4 characters long.");
    }
    if password != confirm {
        errors.push("Passwords do not match.");
    }
    errors
}

pub async fn login_page(
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
    let action = escape_html(&state.path("/login"));
    let forgot = escape_html(&state.path("/forgot"));
    let mut body = format!(
        r#"<form method="POST" action="{action}">{csrf}
<label>Email <input type="email" name="email" autofocus></label>
<label>Password <input type="password" name="password"></label>
<button type="submit">Login</button></form>
<p><a href="{forgot}">Forgot your password?</a></p>"#
    );
    for (spec, _) in state.providers().iter().filter(|(spec, _)| spec.is_sign_in()) {
        let _ = write!(
            body,
            r#"<p><a href="{}">Sign in with {}</a></p>"#,
            escape_html(&state.path(&format!("/auth/{}", spec.name))),
            spec.label
        );
    }
    render(&state, &session, "Sign in", &body)
}

pub async fn login(
    state: Extension<Arc<AppState>>,
    session: Extension<Session>,
    Form(form): Form<LoginForm>,
) -> impl IntoResponse {
    let email = normalize_email(&form.email);
    let mut errors = Vec::new();
    if !valid_email(&email) {
        errors.push("Email is not valid.");
    }
    if form.password.is_empty() {
        errors.push("Password cannot be blank.");
    }
    if !errors.is_empty() {
        flash_errors(&session, &errors);
        return redirect(&state, "/login");
    }

    let principal = match state.directory().authenticate(&email, &form.password).await {
        Ok(Some(principal)) => principal,
        Ok(None) => {
            flash_errors(&session, &["Invalid email or password."]);
            return redirect(&state, "/login");
        }
        Err(err) => return internal_error("Failed to authenticate", err),
    };

    if let Err(err) = principal::establish(&session, &principal) {
        return internal_error("Failed to store principal", err);
    }
    info!(user_id = %principal.user_id, "signed in with password");
    flash::push(&session, FlashKind::Success, "Success! You are logged in.");

    let target = return_to::consume_or_default(&session, &state.path("/"));
    Redirect::to(&target).into_response()
}

pub async fn logout(
    state: Extension<Arc<AppState>>,
    session: Extension<Session>,
) -> impl IntoResponse {
    session.destroy();
    redirect(&state, "/")
}

pub async fn signup_page(
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
    let action = escape_html(&state.path("/signup"));
    let body = format!(
        r#"<form method="POST" action="{action}">{csrf}
<label>Email <input type="email" name="email" autofocus></label>
<label>Password <input type="password" name="password"></label>
<label>Confirm Password <input type="password" name="confirmPassword"></label>
<button type="submit">Signup</button></form>"#
    );
    render(&state, &session, "Create Account", &body)
}

pub async fn signup(
    state: Extension<Arc<AppState>>,
    session: Extension<Session>,
    Form(form): Form<SignupForm>,
) -> impl IntoResponse {
    let email = normalize_email(&form.email);
    let mut errors = Vec::new();
    if !valid_email(&email) {
        errors.push("Email is not valid.");
    }
    errors.extend(password_errors(&form.password, &form.confirm_password));
    if !errors.is_empty() {
        flash_errors(&session, &errors);
        return redirect(&state, "/signup");
    }

    let principal = match state.directory().register(&email, &form.password).await {
        Ok(Some(principal)) => principal,
        Ok(None) => {
            flash_errors(&session, &["Account with that email address already exists."]);
            return redirect(&state, "/signup");
        }
        Err(err) => return internal_error("Failed to register account", err),
    };

    if let Err(err) = principal::establish(&session, &principal) {
        return internal_error("Failed to store principal", err);
    }
    info!(user_id = %principal.user_id, "account created");
    redirect(&state, "/")
}

pub async fn account(
    state: Extension<Arc<AppState>>,
    session: Extension<Session>,
) -> impl IntoResponse {
    let principal = match signed_in(&state, &session) {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    let csrf = match csrf_input(&session) {
        Ok(csrf) => csrf,
        Err(err) => return internal_error("Failed to create CSRF token", err),
    };

    let email = escape_html(&principal.email);
    let name = escape_html(principal.display_name.as_deref().unwrap_or(""));
    let profile_action = escape_html(&state.path("/account/profile"));
    let password_action = escape_html(&state.path("/account/password"));
    let delete_action = escape_html(&state.path("/account/delete"));

    let mut body = format!(
        r#"<h2>Profile Information</h2>
<form method="POST" action="{profile_action}">{csrf}
<label>Email <input type="email" name="email" value="{email}"></label>
<label>Name <input type="text" name="name" value="{name}"></label>
<button type="submit">Update Profile</button></form>
<h2>Change Password</h2>
<form method="POST" action="{password_action}">{csrf}
<label>New Password <input type="password" name="password"></label>
<label>Confirm Password <input type="password" name="confirmPassword"></label>
<button type="submit">Change Password</button></form>
<h2>Linked Accounts</h2><ul>"#
    );
    for (spec, _) in state.providers().iter() {
        let item = if principal.is_linked(spec.name) {
            format!(
                r#"<a href="{}">Unlink your {} account</a>"#,
                escape_html(&state.path(&format!("/account/unlink/{}", spec.name))),
                spec.label
            )
        } else {
            format!(
                r#"<a href="{}">Link your {} account</a>"#,
                escape_html(&state.path(&format!("/auth/{}", spec.name))),
                spec.label
            )
        };
        let _ = write!(body, "<li>{item}</li>");
    }
    let _ = write!(
        body,
        r#"</ul><h2>Delete Account</h2>
<form method="POST" action="{delete_action}">{csrf}
<button type="submit">Delete my account</button></form>"#
    );

    render(&state, &session, "Account Management", &body)
}

pub async fn update_profile(
    state: Extension<Arc<AppState>>,
    session: Extension<Session>,
    Form(form): Form<ProfileForm>,
) -> impl IntoResponse {
    let mut principal = match signed_in(&state, &session) {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    let email = normalize_email(&form.email);
    if !valid_email(&email) {
        flash_errors(&session, &["Please enter a valid email address."]);
        return redirect(&state, "/account");
    }

    principal.email = email;
    let name = form.name.trim();
    principal.display_name = (!name.is_empty()).then(|| name.to_string());

    if let Err(err) = state.directory().update(&principal).await {
        warn!(user_id = %principal.user_id, "Profile update rejected: {err:#}");
        flash_errors(
            &session,
            &["The email address you have entered is already associated with an account."],
        );
        return redirect(&state, "/account");
    }
    if let Err(err) = principal::store(&session, &principal) {
        return internal_error("Failed to store principal", err);
    }
    flash::push(&session, FlashKind::Success, "Profile information has been updated.");
    redirect(&state, "/account")
}

pub async fn update_password(
    state: Extension<Arc<AppState>>,
    session: Extension<Session>,
    Form(form): Form<PasswordForm>,
) -> impl IntoResponse {
    let principal = match signed_in(&state, &session) {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    let errors = password_errors(&form.password, &form.confirm_password);
    if !errors.is_empty() {
        flash_errors(&session, &errors);
        return redirect(&state, "/account");
    }

    if let Err(err) = state
        .directory()
        .set_password(principal.user_id, &form.password)
        .await
    {
        return internal_error("Failed to change password", err);
    }
    flash::push(&session, FlashKind::Success, "Password has been changed.");
    redirect(&state, "/account")
}

pub async fn delete_account(
    state: Extension<Arc<AppState>>,
    session: Extension<Session>,
) -> impl IntoResponse {
    let principal = match signed_in(&state, &session) {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    if let Err(err) = state.directory().remove(principal.user_id).await {
        return internal_error("Failed to delete account", err);
    }
    info!(user_id = %principal.user_id, "account deleted");
    session.destroy();
    flash::push(&session, FlashKind::Info, "Your account has been deleted.");
    redirect(&state, "/")
}

pub async fn unlink(
    state: Extension<Arc<AppState>>,
    session: Extension<Session>,
    Path(provider): Path<String>,
) -> Response {
    let mut principal = match signed_in(&state, &session) {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    let label = oauth::spec(&provider).map_or(provider.as_str(), |spec| spec.label);
    if !principal.unlink(&provider) {
        flash_errors(&session, &["That account is not linked."]);
        return redirect(&state, "/account");
    }

    if let Err(err) = state.directory().update(&principal).await {
        return internal_error("Failed to unlink provider", err);
    }
    if let Err(err) = principal::store(&session, &principal) {
        return internal_error("Failed to store principal", err);
    }
    flash::push(&session, FlashKind::Info, format!("{label} account has been unlinked."));
    redirect(&state, "/account")
}
