//! OAuth provider table and registry.
//!
//! Every provider is one row of [`BASELINE`]; the orchestrator is the only code
//! that branches on the row's [`FlowKind`]. A row is mounted only when an
//! [`IdentityProvider`] is registered for it.

pub mod orchestrator;
pub mod provider;

pub use provider::{CallbackParams, IdentityProvider, OAuth2Config, OAuth2Provider, ProviderProfile};

use std::{collections::BTreeMap, sync::Arc};

/// What a successful callback does with the principal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowKind {
    /// Establish (or extend) the principal, then replay the return-to entry.
    SignIn,
    /// Link a credential to the existing principal and land on a fixed page.
    Authorize { success_redirect: &'static str },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProviderSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub scopes: &'static [&'static str],
    pub flow: FlowKind,
    /// Logical path the visitor is sent to when the callback fails.
    pub failure_redirect: &'static str,
}

impl ProviderSpec {
    #[must_use]
    pub fn is_sign_in(&self) -> bool {
        matches!(self.flow, FlowKind::SignIn)
    }
}

const fn sign_in(
    name: &'static str,
    label: &'static str,
    scopes: &'static [&'static str],
) -> ProviderSpec {
    ProviderSpec {
        name,
        label,
        scopes,
        flow: FlowKind::SignIn,
        failure_redirect: "/login",
    }
}

const fn authorize(
    name: &'static str,
    label: &'static str,
    scopes: &'static [&'static str],
    failure_redirect: &'static str,
    success_redirect: &'static str,
) -> ProviderSpec {
    ProviderSpec {
        name,
        label,
        scopes,
        flow: FlowKind::Authorize { success_redirect },
        failure_redirect,
    }
}

pub const BASELINE: &[ProviderSpec] = &[
    sign_in("instagram", "Instagram", &[]),
    sign_in("facebook", "Facebook", &["email", "public_profile"]),
    sign_in("github", "GitHub", &[]),
    sign_in("google", "Google", &["profile", "email"]),
    sign_in("twitter", "Twitter", &[]),
    sign_in("linkedin", "LinkedIn", &[]),
    authorize("foursquare", "Foursquare", &[], "/api", "/api/foursquare"),
    authorize("tumblr", "Tumblr", &[], "/api", "/api/tumblr"),
    authorize("steam", "Steam", &[], "/login", "/api/steam"),
    authorize(
        "pinterest",
        "Pinterest",
        &["read_public", "write_public"],
        "/login",
        "/api/pinterest",
    ),
];

/// Look up a provider row by name.
#[must_use]
pub fn spec(name: &str) -> Option<&'static ProviderSpec> {
    BASELINE.iter().find(|spec| spec.name == name)
}

/// Providers with a configured integration.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<&'static str, (ProviderSpec, Arc<dyn IdentityProvider>)>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `provider` for `spec`, replacing any earlier registration.
    #[must_use]
    pub fn register(mut self, spec: ProviderSpec, provider: Arc<dyn IdentityProvider>) -> Self {
        self.providers.insert(spec.name, (spec, provider));
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<(&ProviderSpec, &Arc<dyn IdentityProvider>)> {
        self.providers
            .get(name)
            .map(|(spec, provider)| (spec, provider))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ProviderSpec, &Arc<dyn IdentityProvider>)> {
        self.providers.values().map(|(spec, provider)| (spec, provider))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_table_rows() {
        assert_eq!(BASELINE.len(), 10);

        let google = spec("google");
        assert_eq!(google.map(|s| s.scopes), Some(&["profile", "email"][..]));
        assert!(google.is_some_and(ProviderSpec::is_sign_in));

        let tumblr = spec("tumblr");
        assert_eq!(tumblr.map(|s| s.failure_redirect), Some("/api"));
        assert_eq!(
            tumblr.map(|s| s.flow),
            Some(FlowKind::Authorize {
                success_redirect: "/api/tumblr"
            })
        );

        let steam = spec("steam");
        assert_eq!(steam.map(|s| s.failure_redirect), Some("/login"));

        assert!(spec("myspace").is_none());
    }

    #[test]
    fn sign_in_rows_fail_to_login() {
        for row in BASELINE.iter().filter(|row| row.is_sign_in()) {
            assert_eq!(row.failure_redirect, "/login", "{}", row.name);
        }
    }
}
