use crate::cli::commands::providers::ProviderOptions;
use crate::portico::{
    self,
    directory::MemoryDirectory,
    mailer::LogMailer,
    oauth::{self, OAuth2Config, OAuth2Provider, ProviderRegistry},
    session::MemorySessionStore,
    AppConfig, AppState, Namespace,
};
use anyhow::{anyhow, Context, Result};
use std::{sync::Arc, time::Duration};
use tracing::debug;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub namespace: Option<String>,
    pub public_base_url: String,
    pub contact_to: String,
    pub session_ttl_seconds: u64,
    pub session_cookie_secure: bool,
    pub providers: Vec<ProviderOptions>,
}

/// Build the provider registry from configured credentials.
///
/// # Errors
/// Returns an error if a provider has no table row or its client cannot be built.
pub fn registry(
    providers: Vec<ProviderOptions>,
    namespace: &Namespace,
    public_base_url: &Url,
) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    for options in providers {
        let spec = oauth::spec(options.name)
            .ok_or_else(|| anyhow!("unknown OAuth provider: {}", options.name))?;
        let callback = namespace.resolve(&format!("/auth/{}/callback", spec.name));
        let redirect_url = public_base_url
            .join(&callback)
            .with_context(|| format!("Failed to build callback URL for {}", spec.name))?;
        debug!(provider = spec.name, %redirect_url, "configuring OAuth provider");

        let provider = OAuth2Provider::new(OAuth2Config {
            client_id: options.client_id,
            client_secret: options.client_secret,
            authorize_url: options.authorize_url,
            token_url: options.token_url,
            profile_url: options.profile_url,
            redirect_url,
        })?;
        registry = registry.register(*spec, Arc::new(provider));
    }
    Ok(registry)
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let namespace = Namespace::new(args.namespace.as_deref())?;
    let public_base_url = Url::parse(&args.public_base_url)
        .with_context(|| format!("Invalid public base URL: {}", args.public_base_url))?;

    let providers = registry(args.providers, &namespace, &public_base_url)?;

    let config = AppConfig::new(namespace)
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_session_cookie_secure(args.session_cookie_secure)
        .with_contact_to(args.contact_to)
        .with_public_base_url(public_base_url.to_string());

    let state = Arc::new(AppState::new(
        config,
        Arc::new(MemorySessionStore::new(Duration::from_secs(
            args.session_ttl_seconds,
        ))),
        Arc::new(MemoryDirectory::new()),
        Arc::new(LogMailer),
        providers,
    ));

    portico::new(args.port, state).await
}
