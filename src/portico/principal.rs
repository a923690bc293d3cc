//! Authenticated principal stored in the session.
//!
//! Flow Overview: sign-in (password or OAuth) writes the principal into the
//! session and renews the session id. Every later request reads it back from
//! the session; nothing else in the gate creates or destroys it.

use axum::extract::Request;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use super::session::Session;

pub const PRINCIPAL_KEY: &str = "portico.principal";

/// Provider credential linked to a principal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkedCredential {
    pub provider: String,
    pub subject: String,
    #[serde(
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub access_token: SecretString,
}

/// Authenticated user context derived from the session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub linked: Vec<LinkedCredential>,
}

impl Principal {
    #[must_use]
    pub fn new(user_id: Uuid, email: String) -> Self {
        Self {
            user_id,
            email,
            display_name: None,
            linked: Vec::new(),
        }
    }

    #[must_use]
    pub fn credential(&self, provider: &str) -> Option<&LinkedCredential> {
        self.linked.iter().find(|c| c.provider == provider)
    }

    #[must_use]
    pub fn is_linked(&self, provider: &str) -> bool {
        self.credential(provider).is_some()
    }

    /// Link a credential, replacing any earlier one for the same provider.
    pub fn link(&mut self, credential: LinkedCredential) {
        self.linked.retain(|c| c.provider != credential.provider);
        self.linked.push(credential);
    }

    /// Returns `false` if nothing was linked for `provider`.
    pub fn unlink(&mut self, provider: &str) -> bool {
        let before = self.linked.len();
        self.linked.retain(|c| c.provider != provider);
        self.linked.len() != before
    }
}

/// Principal for the session, if signed in.
#[must_use]
pub fn current(session: &Session) -> Option<Principal> {
    session.get(PRINCIPAL_KEY)
}

/// Principal for the request's session, if the session layer ran and the
/// visitor is signed in.
#[must_use]
pub fn current_principal(request: &Request) -> Option<Principal> {
    request.extensions().get::<Session>().and_then(current)
}

/// Sign `principal` in, moving the session to a fresh id.
///
/// # Errors
/// Returns an error if the principal cannot be serialized.
pub fn establish(session: &Session, principal: &Principal) -> serde_json::Result<()> {
    store(session, principal)?;
    session.renew();
    Ok(())
}

/// Replace the stored principal without renewing the session id.
///
/// # Errors
/// Returns an error if the principal cannot be serialized.
pub fn store(session: &Session, principal: &Principal) -> serde_json::Result<()> {
    session.insert(PRINCIPAL_KEY, principal)
}

fn serialize_secret<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

fn deserialize_secret<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}
