//! User directory backing password sign-in, signup, password reset and OAuth
//! account linking.
//!
//! `MemoryDirectory` is the development implementation. Passwords are stored
//! as Argon2id PHC strings; reset tokens live next to the account and expire
//! after [`RESET_TOKEN_TTL`].

use anyhow::{anyhow, Result};
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{
    oauth::ProviderProfile,
    principal::{LinkedCredential, Principal},
    utils::{constant_time_eq, normalize_email, random_token},
    BoxFuture,
};

/// How long a password reset link stays usable.
pub const RESET_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

pub trait UserDirectory: Send + Sync {
    /// Principal for matching credentials, or `None`.
    fn authenticate<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Option<Principal>>>;

    /// Create an account; `None` if the email is already taken.
    fn register<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Option<Principal>>>;

    /// Find the account linked to `profile` or create one for it.
    ///
    /// The returned principal has the profile's credential linked.
    fn resolve_oauth<'a>(
        &'a self,
        provider: &'a str,
        profile: &'a ProviderProfile,
    ) -> BoxFuture<'a, Result<Principal>>;

    /// Persist profile and linked credential changes.
    ///
    /// Fails if the email or any linked provider account belongs to another user.
    fn update<'a>(&'a self, principal: &'a Principal) -> BoxFuture<'a, Result<()>>;

    fn set_password<'a>(&'a self, user_id: Uuid, password: &'a str) -> BoxFuture<'a, Result<()>>;

    fn remove(&self, user_id: Uuid) -> BoxFuture<'_, Result<()>>;

    /// Start a password reset; `None` if no account uses `email`.
    ///
    /// Issuing a new token replaces any earlier one for the account.
    fn issue_reset_token<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<Option<String>>>;

    /// Whether `token` names a live reset.
    fn reset_token_valid<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// Set a new password through a live token, consuming it.
    ///
    /// Returns `None` for unknown, used or expired tokens.
    fn reset_password<'a>(
        &'a self,
        token: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Option<Principal>>>;
}

struct ResetToken {
    token: SecretString,
    expires_at: Instant,
}

impl ResetToken {
    fn matches(&self, token: &str) -> bool {
        Instant::now() < self.expires_at
            && constant_time_eq(self.token.expose_secret().as_bytes(), token.as_bytes())
    }
}

struct UserRecord {
    principal: Principal,
    /// Argon2id PHC string; `None` for accounts created through OAuth.
    password_hash: Option<String>,
    reset: Option<ResetToken>,
}

pub struct MemoryDirectory {
    users: Mutex<HashMap<Uuid, UserRecord>>,
    reset_ttl: Duration,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            reset_ttl: RESET_TOKEN_TTL,
        }
    }

    #[must_use]
    pub fn with_reset_ttl(mut self, ttl: Duration) -> Self {
        self.reset_ttl = ttl;
        self
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?
        .to_string();
    Ok(hash)
}

fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

fn find_by_email<'m>(
    users: &'m mut HashMap<Uuid, UserRecord>,
    email: &str,
) -> Option<&'m mut UserRecord> {
    users
        .values_mut()
        .find(|record| record.principal.email == email)
}

fn find_by_reset<'m>(
    users: &'m mut HashMap<Uuid, UserRecord>,
    token: &str,
) -> Option<&'m mut UserRecord> {
    users
        .values_mut()
        .find(|record| record.reset.as_ref().is_some_and(|reset| reset.matches(token)))
}

fn credential(provider: &str, profile: &ProviderProfile) -> LinkedCredential {
    LinkedCredential {
        provider: provider.to_string(),
        subject: profile.subject.clone(),
        access_token: profile.access_token.clone(),
    }
}

/// First provider account of `principal` that another user already holds.
fn linked_elsewhere<'p>(
    users: &HashMap<Uuid, UserRecord>,
    principal: &'p Principal,
) -> Option<&'p LinkedCredential> {
    principal.linked.iter().find(|linked| {
        users.values().any(|record| {
            record.principal.user_id != principal.user_id
                && record
                    .principal
                    .credential(&linked.provider)
                    .is_some_and(|other| other.subject == linked.subject)
        })
    })
}

impl UserDirectory for MemoryDirectory {
    fn authenticate<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Option<Principal>>> {
        Box::pin(async move {
            let email = normalize_email(email);
            let candidate = {
                let mut users = self.users.lock().await;
                find_by_email(&mut users, &email).and_then(|record| {
                    let hash = record.password_hash.clone()?;
                    Some((record.principal.clone(), hash))
                })
            };
            let principal = candidate
                .filter(|(_, hash)| verify_password(password, hash))
                .map(|(principal, _)| principal);
            debug!(found = principal.is_some(), "password authentication");
            Ok(principal)
        })
    }

    fn register<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Option<Principal>>> {
        Box::pin(async move {
            let email = normalize_email(email);
            let password_hash = hash_password(password)?;
            let mut users = self.users.lock().await;
            if find_by_email(&mut users, &email).is_some() {
                return Ok(None);
            }
            let principal = Principal::new(Uuid::new_v4(), email);
            users.insert(
                principal.user_id,
                UserRecord {
                    principal: principal.clone(),
                    password_hash: Some(password_hash),
                    reset: None,
                },
            );
            Ok(Some(principal))
        })
    }

    fn resolve_oauth<'a>(
        &'a self,
        provider: &'a str,
        profile: &'a ProviderProfile,
    ) -> BoxFuture<'a, Result<Principal>> {
        Box::pin(async move {
            let mut users = self.users.lock().await;

            if let Some(record) = users.values_mut().find(|record| {
                record
                    .principal
                    .credential(provider)
                    .is_some_and(|c| c.subject == profile.subject)
            }) {
                record.principal.link(credential(provider, profile));
                return Ok(record.principal.clone());
            }

            let email = profile
                .email
                .as_deref()
                .map(normalize_email)
                .unwrap_or_else(|| format!("{}@{provider}", profile.subject));

            if find_by_email(&mut users, &email).is_some() {
                return Err(anyhow!(
                    "an account with the {provider} email already exists and is not linked"
                ));
            }

            let mut principal = Principal::new(Uuid::new_v4(), email);
            principal.display_name.clone_from(&profile.display_name);
            principal.link(credential(provider, profile));
            users.insert(
                principal.user_id,
                UserRecord {
                    principal: principal.clone(),
                    password_hash: None,
                    reset: None,
                },
            );
            Ok(principal)
        })
    }

    fn update<'a>(&'a self, principal: &'a Principal) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut users = self.users.lock().await;
            let email_taken = users.values().any(|record| {
                record.principal.user_id != principal.user_id
                    && record.principal.email == principal.email
            });
            if email_taken {
                return Err(anyhow!("email already in use"));
            }
            if let Some(linked) = linked_elsewhere(&users, principal) {
                return Err(anyhow!(
                    "{} account {} is linked to another user",
                    linked.provider,
                    linked.subject
                ));
            }
            match users.get_mut(&principal.user_id) {
                Some(record) => {
                    record.principal = principal.clone();
                    Ok(())
                }
                None => Err(anyhow!("unknown user {}", principal.user_id)),
            }
        })
    }

    fn set_password<'a>(&'a self, user_id: Uuid, password: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let password_hash = hash_password(password)?;
            let mut users = self.users.lock().await;
            let record = users
                .get_mut(&user_id)
                .ok_or_else(|| anyhow!("unknown user {user_id}"))?;
            record.password_hash = Some(password_hash);
            Ok(())
        })
    }

    fn remove(&self, user_id: Uuid) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.users.lock().await.remove(&user_id);
            Ok(())
        })
    }

    fn issue_reset_token<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let email = normalize_email(email);
            let token = random_token()?;
            let mut users = self.users.lock().await;
            let Some(record) = find_by_email(&mut users, &email) else {
                return Ok(None);
            };
            record.reset = Some(ResetToken {
                token: SecretString::from(token.clone()),
                expires_at: Instant::now() + self.reset_ttl,
            });
            debug!(user_id = %record.principal.user_id, "password reset issued");
            Ok(Some(token))
        })
    }

    fn reset_token_valid<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let mut users = self.users.lock().await;
            Ok(find_by_reset(&mut users, token).is_some())
        })
    }

    fn reset_password<'a>(
        &'a self,
        token: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Option<Principal>>> {
        Box::pin(async move {
            let password_hash = hash_password(password)?;
            let mut users = self.users.lock().await;
            let Some(record) = find_by_reset(&mut users, token) else {
                return Ok(None);
            };
            record.reset = None;
            record.password_hash = Some(password_hash);
            Ok(Some(record.principal.clone()))
        })
    }
}
