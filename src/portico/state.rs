//! Front-end state and configuration.

use std::sync::Arc;

use super::{
    csrf::CsrfPolicy, directory::UserDirectory, gate::PublicPaths, mailer::Mailer,
    namespace::Namespace, oauth::ProviderRegistry, session::SessionStore,
};

const DEFAULT_SESSION_TTL_SECONDS: u64 = 14 * 24 * 60 * 60;
const DEFAULT_CONTACT_TO: &str = "your@email.com";
const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:8080";

#[derive(Clone, Debug)]
pub struct AppConfig {
    namespace: Namespace,
    session_ttl_seconds: u64,
    session_cookie_secure: bool,
    contact_to: String,
    public_base_url: String,
}

impl AppConfig {
    #[must_use]
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            session_cookie_secure: false,
            contact_to: DEFAULT_CONTACT_TO.to_string(),
            public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: u64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_cookie_secure(mut self, secure: bool) -> Self {
        self.session_cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_contact_to(mut self, contact_to: String) -> Self {
        self.contact_to = contact_to;
        self
    }

    /// Externally visible origin used in links sent by mail.
    #[must_use]
    pub fn with_public_base_url(mut self, url: String) -> Self {
        self.public_base_url = url;
        self
    }

    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> u64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.session_cookie_secure
    }

    #[must_use]
    pub fn contact_to(&self) -> &str {
        &self.contact_to
    }

    #[must_use]
    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }
}

/// Everything a request needs, shared behind an `Arc` extension.
pub struct AppState {
    config: AppConfig,
    public_paths: PublicPaths,
    csrf_policy: CsrfPolicy,
    sessions: Arc<dyn SessionStore>,
    directory: Arc<dyn UserDirectory>,
    mailer: Arc<dyn Mailer>,
    providers: ProviderRegistry,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: AppConfig,
        sessions: Arc<dyn SessionStore>,
        directory: Arc<dyn UserDirectory>,
        mailer: Arc<dyn Mailer>,
        providers: ProviderRegistry,
    ) -> Self {
        let public_paths = PublicPaths::new(config.namespace());
        let csrf_policy = CsrfPolicy::new(config.namespace());
        Self {
            config,
            public_paths,
            csrf_policy,
            sessions,
            directory,
            mailer,
            providers,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn public_paths(&self) -> &PublicPaths {
        &self.public_paths
    }

    #[must_use]
    pub fn csrf_policy(&self) -> &CsrfPolicy {
        &self.csrf_policy
    }

    #[must_use]
    pub fn sessions(&self) -> &dyn SessionStore {
        self.sessions.as_ref()
    }

    #[must_use]
    pub fn directory(&self) -> &dyn UserDirectory {
        self.directory.as_ref()
    }

    #[must_use]
    pub fn mailer(&self) -> &dyn Mailer {
        self.mailer.as_ref()
    }

    #[must_use]
    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Resolve a logical path against the configured namespace.
    #[must_use]
    pub fn path(&self, logical: &str) -> String {
        self.config.namespace.resolve(logical)
    }

    /// Resolve a logical path into an absolute URL on the public origin.
    #[must_use]
    pub fn absolute_url(&self, logical: &str) -> String {
        format!(
            "{}{}",
            self.config.public_base_url.trim_end_matches('/'),
            self.path(logical)
        )
    }
}
