//! Per-visitor session state.
//!
//! Flow Overview: the middleware reads the `portico_session` cookie, loads the
//! bag from the [`SessionStore`], and hands a [`Session`] handle to the rest of
//! the request through the request extensions. After the handler runs, the bag
//! is written back if anything changed or the session was already known; the
//! write and a re-issued cookie push the expiry out on every visit.
//!
//! Concurrency: the bag is loaded as a snapshot and written back whole, so two
//! requests racing on one session id resolve as last-writer-wins. Browsers
//! navigate one page at a time, so this is accepted rather than locked.

mod memory;

pub use memory::MemorySessionStore;

use anyhow::Result;
use axum::{
    extract::{Extension, Request},
    http::{
        header::{InvalidHeaderValue, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue,
    },
    middleware::Next,
    response::Response,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use tracing::{debug, error};

use super::{error::GateError, utils::random_token, AppConfig, AppState, BoxFuture};

pub const SESSION_COOKIE_NAME: &str = "portico_session";

/// Key-value state stored per session.
pub type SessionBag = HashMap<String, Value>;

/// Opaque session identifier carried by the session cookie.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new random session id.
    ///
    /// # Errors
    /// Returns an error if the OS random source fails.
    pub fn generate() -> Result<Self> {
        Ok(Self(random_token()?))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Storage backend for session bags.
pub trait SessionStore: Send + Sync {
    /// Load the bag for `id`, or `None` if the session is unknown or expired.
    fn get<'a>(&'a self, id: &'a SessionId) -> BoxFuture<'a, Result<Option<SessionBag>>>;

    /// Replace the bag stored for `id`.
    fn set<'a>(&'a self, id: &'a SessionId, bag: SessionBag) -> BoxFuture<'a, Result<()>>;

    /// Forget `id` entirely.
    fn remove<'a>(&'a self, id: &'a SessionId) -> BoxFuture<'a, Result<()>>;
}

#[derive(Debug, Default)]
struct SessionState {
    bag: SessionBag,
    dirty: bool,
    renewed: bool,
}

/// Handle to the current request's session bag.
///
/// Clones share the same bag, so middleware and handlers see each other's
/// writes within one request.
#[derive(Clone, Debug, Default)]
pub struct Session {
    inner: Arc<Mutex<SessionState>>,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_bag(bag: SessionBag) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionState {
                bag,
                dirty: false,
                renewed: false,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.with(|state| state.bag.get(key).cloned())
    }

    /// Read and deserialize a value; malformed values read as absent.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key)?;
        match serde_json::from_value(value) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!("Ignoring malformed session value for {key}: {err}");
                None
            }
        }
    }

    pub fn set_value(&self, key: &str, value: Value) {
        self.with(|state| {
            state.bag.insert(key.to_string(), value);
            state.dirty = true;
        });
    }

    /// Serialize and store a value.
    ///
    /// # Errors
    /// Returns an error if `value` cannot be represented as JSON.
    pub fn insert<T: Serialize>(&self, key: &str, value: &T) -> serde_json::Result<()> {
        let value = serde_json::to_value(value)?;
        self.set_value(key, value);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.with(|state| {
            let removed = state.bag.remove(key);
            if removed.is_some() {
                state.dirty = true;
            }
            removed
        })
    }

    /// Read and clear a value under a single lock.
    #[must_use]
    pub fn take<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.remove(key)?;
        serde_json::from_value(value).ok()
    }

    /// Move the bag to a fresh session id when the response is written.
    pub fn renew(&self) {
        self.with(|state| {
            state.renewed = true;
            state.dirty = true;
        });
    }

    /// Drop every value and move to a fresh session id.
    pub fn destroy(&self) {
        self.with(|state| {
            state.bag.clear();
            state.renewed = true;
            state.dirty = true;
        });
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.with(|state| state.bag.is_empty())
    }

    fn snapshot(&self) -> (SessionBag, bool, bool) {
        self.with(|state| (state.bag.clone(), state.dirty, state.renewed))
    }
}

/// Load the session before the rest of the stack and persist it afterwards.
///
/// A failing store is fatal for the request: no session state can be trusted.
pub async fn middleware(
    Extension(state): Extension<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    match load_and_persist(&state, request, next).await {
        Ok(response) => response,
        Err(err) => {
            error!("Session handling failed: {err}");
            err.respond(state.config().namespace())
        }
    }
}

async fn load_and_persist(
    state: &AppState,
    mut request: Request,
    next: Next,
) -> Result<Response, GateError> {
    let store = state.sessions();

    let presented = extract_session_id(request.headers());
    let loaded = match &presented {
        Some(id) => store.get(id).await.map_err(GateError::store)?,
        None => None,
    };

    // Unknown ids are never reused, so a client cannot pick its own session id.
    let (id, bag, known) = match (presented, loaded) {
        (Some(id), Some(bag)) => (id, bag, true),
        _ => (
            SessionId::generate().map_err(GateError::store)?,
            SessionBag::new(),
            false,
        ),
    };

    let session = Session::from_bag(bag);
    request.extensions_mut().insert(session.clone());

    let mut response = next.run(request).await;

    let (bag, dirty, renewed) = session.snapshot();
    if renewed {
        if known {
            store.remove(&id).await.map_err(GateError::store)?;
        }
        if bag.is_empty() {
            if known {
                append_cookie(&mut response, clear_session_cookie(state.config()));
            }
        } else {
            let fresh = SessionId::generate().map_err(GateError::store)?;
            store.set(&fresh, bag).await.map_err(GateError::store)?;
            append_cookie(&mut response, session_cookie(state.config(), &fresh));
        }
    } else if dirty || known {
        // Known sessions are written back on every request so the store entry
        // and the cookie's Max-Age both slide with activity.
        store.set(&id, bag).await.map_err(GateError::store)?;
        append_cookie(&mut response, session_cookie(state.config(), &id));
    }

    Ok(response)
}

fn append_cookie(response: &mut Response, cookie: Result<HeaderValue, InvalidHeaderValue>) {
    match cookie {
        Ok(cookie) => {
            response.headers_mut().append(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build session cookie: {err}"),
    }
}

/// Build an `HttpOnly` cookie for the session id.
fn session_cookie(config: &AppConfig, id: &SessionId) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = config.session_ttl_seconds();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}",
        id.as_str()
    );
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_session_cookie(config: &AppConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn extract_session_id(headers: &HeaderMap) -> Option<SessionId> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            let val = val.trim();
            if key.trim() == SESSION_COOKIE_NAME && !val.is_empty() {
                return Some(SessionId(val.to_string()));
            }
        }
    }
    None
}
