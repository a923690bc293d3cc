//! OAuth initiation and callback handling.
//!
//! Flow Overview:
//! 1) `GET /auth/<provider>` stores `{provider, state}` in the session and
//!    redirects to the provider.
//! 2) `GET /auth/<provider>/callback` takes the pending state (single use),
//!    checks it against the query, and asks the provider for a profile.
//! 3) Sign-in rows establish the principal and replay the return-to entry;
//!    authorize rows link the credential and land on the row's feature page.
//!
//! Failures only ever show the visitor a generic notice. The cause is logged.

use axum::response::{IntoResponse, Redirect, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{CallbackParams, FlowKind, ProviderProfile, ProviderSpec};
use crate::portico::{
    error::GateError,
    flash::{self, FlashKind},
    principal::{self, LinkedCredential},
    return_to,
    session::Session,
    utils::random_token,
    AppState,
};

pub const OAUTH_STATE_KEY: &str = "portico.oauth_state";

pub const CALLBACK_FAILED_MESSAGE: &str = "Sign-in failed. Please try again.";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingState {
    pub provider: String,
    pub state: String,
}

/// Start the flow for `provider`.
pub fn initiate(state: &AppState, session: &Session, provider: &str) -> Response {
    let namespace = state.config().namespace();
    match begin(state, session, provider) {
        Ok(redirect) => redirect.into_response(),
        Err(err) => fail(session, provider, err).respond(namespace),
    }
}

fn begin(state: &AppState, session: &Session, provider: &str) -> Result<Redirect, GateError> {
    let (spec, integration) = state.providers().get(provider).ok_or_else(|| {
        GateError::callback(provider, "/login", "provider is not configured")
    })?;

    if !spec.is_sign_in() && principal::current(session).is_none() {
        return Err(GateError::Unauthenticated);
    }

    let token = random_token().map_err(|err| callback_error(spec, format!("{err:#}")))?;
    let pending = PendingState {
        provider: spec.name.to_string(),
        state: token,
    };
    let url = integration
        .authorize_url(spec.scopes, &pending.state)
        .map_err(|err| callback_error(spec, format!("{err:#}")))?;
    session
        .insert(OAUTH_STATE_KEY, &pending)
        .map_err(|err| callback_error(spec, err.to_string()))?;

    debug!(provider = spec.name, "redirecting to provider");
    Ok(Redirect::to(url.as_str()))
}

/// Finish the flow for `provider` from its callback query.
pub async fn callback(
    state: &AppState,
    session: &Session,
    provider: &str,
    params: &CallbackParams,
) -> Response {
    let namespace = state.config().namespace();
    match complete(state, session, provider, params).await {
        Ok(target) => Redirect::to(&target).into_response(),
        Err(err) => fail(session, provider, err).respond(namespace),
    }
}

async fn complete(
    state: &AppState,
    session: &Session,
    provider: &str,
    params: &CallbackParams,
) -> Result<String, GateError> {
    let (spec, integration) = state.providers().get(provider).ok_or_else(|| {
        GateError::callback(provider, "/login", "provider is not configured")
    })?;

    let pending: Option<PendingState> = session.take(OAUTH_STATE_KEY);
    let matches = pending.is_some_and(|pending| {
        pending.provider == spec.name && params.state.as_deref() == Some(pending.state.as_str())
    });
    if !matches {
        return Err(callback_error(spec, "state token mismatch"));
    }

    if let Some(error) = &params.error {
        let description = params.error_description.as_deref().unwrap_or("");
        return Err(callback_error(
            spec,
            format!("provider returned {error}: {description}"),
        ));
    }

    let profile = integration
        .complete(params)
        .await
        .map_err(|err| callback_error(spec, format!("{err:#}")))?;

    match spec.flow {
        FlowKind::SignIn => sign_in(state, session, spec, &profile).await,
        FlowKind::Authorize { success_redirect } => {
            authorize(state, session, spec, &profile, success_redirect).await
        }
    }
}

async fn sign_in(
    state: &AppState,
    session: &Session,
    spec: &ProviderSpec,
    profile: &ProviderProfile,
) -> Result<String, GateError> {
    let principal = match principal::current(session) {
        Some(mut existing) => {
            existing.link(linked(spec, profile));
            state
                .directory()
                .update(&existing)
                .await
                .map_err(|err| callback_error(spec, format!("{err:#}")))?;
            existing
        }
        None => state
            .directory()
            .resolve_oauth(spec.name, profile)
            .await
            .map_err(|err| callback_error(spec, format!("{err:#}")))?,
    };

    principal::establish(session, &principal)
        .map_err(|err| callback_error(spec, err.to_string()))?;
    info!(provider = spec.name, user_id = %principal.user_id, "signed in");

    let fallback = state.path("/");
    Ok(return_to::consume_or_default(session, &fallback))
}

async fn authorize(
    state: &AppState,
    session: &Session,
    spec: &ProviderSpec,
    profile: &ProviderProfile,
    success_redirect: &str,
) -> Result<String, GateError> {
    let Some(mut principal) = principal::current(session) else {
        return Err(GateError::Unauthenticated);
    };

    principal.link(linked(spec, profile));
    state
        .directory()
        .update(&principal)
        .await
        .map_err(|err| callback_error(spec, format!("{err:#}")))?;
    principal::store(session, &principal).map_err(|err| callback_error(spec, err.to_string()))?;
    info!(provider = spec.name, user_id = %principal.user_id, "provider linked");

    Ok(state.path(success_redirect))
}

fn linked(spec: &ProviderSpec, profile: &ProviderProfile) -> LinkedCredential {
    LinkedCredential {
        provider: spec.name.to_string(),
        subject: profile.subject.clone(),
        access_token: profile.access_token.clone(),
    }
}

fn callback_error(spec: &ProviderSpec, cause: impl Into<String>) -> GateError {
    GateError::callback(spec.name, spec.failure_redirect, cause)
}

fn fail(session: &Session, provider: &str, err: GateError) -> GateError {
    if let GateError::ProviderCallbackFailure { cause, .. } = &err {
        warn!(provider, cause = %cause, "OAuth callback failed");
        flash::push(session, FlashKind::Errors, CALLBACK_FAILED_MESSAGE);
    } else {
        debug!(provider, "OAuth flow rejected: {err}");
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portico::{
        directory::MemoryDirectory,
        mailer::LogMailer,
        namespace::Namespace,
        oauth::{self, IdentityProvider, ProviderRegistry},
        principal::Principal,
        session::MemorySessionStore,
        AppConfig, BoxFuture,
    };
    use anyhow::Result;
    use axum::http::header::LOCATION;
    use secrecy::SecretString;
    use std::{sync::Arc, time::Duration};
    use url::Url;
    use uuid::Uuid;

    struct StaticProvider;

    impl IdentityProvider for StaticProvider {
        fn authorize_url(&self, _scopes: &[&str], state: &str) -> Result<Url> {
            let mut url = Url::parse("https://provider.test/authorize")?;
            url.query_pairs_mut().append_pair("state", state);
            Ok(url)
        }

        fn complete<'a>(
            &'a self,
            _params: &'a CallbackParams,
        ) -> BoxFuture<'a, Result<ProviderProfile>> {
            Box::pin(async {
                Ok(ProviderProfile {
                    subject: "42".to_string(),
                    email: Some("ada@example.com".to_string()),
                    display_name: Some("Ada".to_string()),
                    access_token: SecretString::from("t"),
                })
            })
        }
    }

    fn app_state(ns: Option<&str>) -> Result<AppState> {
        let mut providers = ProviderRegistry::new();
        for name in ["github", "tumblr"] {
            let spec = oauth::spec(name).ok_or_else(|| anyhow::anyhow!("missing {name}"))?;
            providers = providers.register(*spec, Arc::new(StaticProvider));
        }
        Ok(AppState::new(
            AppConfig::new(Namespace::new(ns)?),
            Arc::new(MemorySessionStore::new(Duration::from_secs(60))),
            Arc::new(MemoryDirectory::new()),
            Arc::new(LogMailer),
            providers,
        ))
    }

    fn location(response: &Response) -> Option<String> {
        response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string)
    }

    fn pending_state(session: &Session) -> Option<String> {
        session
            .get::<PendingState>(OAUTH_STATE_KEY)
            .map(|pending| pending.state)
    }

    #[tokio::test]
    async fn sign_in_replays_return_to() -> Result<()> {
        let state = app_state(Some("app"))?;
        let session = Session::new();
        return_to::capture(&session, "/app/account");

        let response = initiate(&state, &session, "github");
        assert!(location(&response).is_some_and(|l| l.starts_with("https://provider.test/")));
        let params = CallbackParams {
            code: Some("c".to_string()),
            state: pending_state(&session),
            ..CallbackParams::default()
        };

        let response = callback(&state, &session, "github", &params).await;
        assert_eq!(location(&response).as_deref(), Some("/app/account"));
        assert!(principal::current(&session).is_some_and(|p| p.is_linked("github")));
        assert_eq!(return_to::peek(&session), None);
        Ok(())
    }

    #[tokio::test]
    async fn state_mismatch_fails_to_login_with_generic_notice() -> Result<()> {
        let state = app_state(None)?;
        let session = Session::new();
        let _ = initiate(&state, &session, "github");
        let params = CallbackParams {
            code: Some("c".to_string()),
            state: Some("forged".to_string()),
            ..CallbackParams::default()
        };

        let response = callback(&state, &session, "github", &params).await;
        assert_eq!(location(&response).as_deref(), Some("/login"));
        assert!(principal::current(&session).is_none());
        let notices = flash::drain(&session);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].message, CALLBACK_FAILED_MESSAGE);

        // The state token is single use.
        assert_eq!(pending_state(&session), None);
        Ok(())
    }

    #[tokio::test]
    async fn provider_account_owned_by_another_user_is_refused() -> Result<()> {
        let state = app_state(None)?;
        let owner_profile = ProviderProfile {
            subject: "42".to_string(),
            email: Some("ada@example.com".to_string()),
            display_name: None,
            access_token: SecretString::from("t"),
        };
        let owner = state.directory().resolve_oauth("github", &owner_profile).await?;

        let visitor = state
            .directory()
            .register("grace@example.com", "pass")
            .await?
            .ok_or_else(|| anyhow::anyhow!("registration refused"))?;
        let session = Session::new();
        principal::store(&session, &visitor)?;

        let _ = initiate(&state, &session, "github");
        let params = CallbackParams {
            code: Some("c".to_string()),
            state: pending_state(&session),
            ..CallbackParams::default()
        };
        let response = callback(&state, &session, "github", &params).await;
        assert_eq!(location(&response).as_deref(), Some("/login"));
        let notices = flash::drain(&session);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].message, CALLBACK_FAILED_MESSAGE);

        let current = principal::current(&session).ok_or_else(|| anyhow::anyhow!("signed out"))?;
        assert_eq!(current.user_id, visitor.user_id);
        assert!(!current.is_linked("github"));

        let stored = state
            .directory()
            .authenticate("grace@example.com", "pass")
            .await?
            .ok_or_else(|| anyhow::anyhow!("visitor missing"))?;
        assert!(!stored.is_linked("github"));
        assert_ne!(owner.user_id, visitor.user_id);
        Ok(())
    }

    #[tokio::test]
    async fn provider_error_uses_row_failure_page() -> Result<()> {
        let state = app_state(None)?;
        let session = Session::new();
        principal::store(
            &session,
            &Principal::new(Uuid::new_v4(), "a@example.com".to_string()),
        )?;
        let _ = initiate(&state, &session, "tumblr");
        let params = CallbackParams {
            state: pending_state(&session),
            error: Some("access_denied".to_string()),
            ..CallbackParams::default()
        };

        let response = callback(&state, &session, "tumblr", &params).await;
        assert_eq!(location(&response).as_deref(), Some("/api"));
        Ok(())
    }

    #[tokio::test]
    async fn authorize_requires_principal() -> Result<()> {
        let state = app_state(None)?;
        let session = Session::new();
        let response = initiate(&state, &session, "tumblr");
        assert_eq!(location(&response).as_deref(), Some("/login"));
        assert_eq!(pending_state(&session), None);
        Ok(())
    }

    #[tokio::test]
    async fn unconfigured_provider_is_a_failure() -> Result<()> {
        let state = app_state(None)?;
        let session = Session::new();
        let response = initiate(&state, &session, "steam");
        assert_eq!(location(&response).as_deref(), Some("/login"));
        Ok(())
    }
}
