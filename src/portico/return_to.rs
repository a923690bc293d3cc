//! Single-slot record of where a visitor was headed before authenticating.
//!
//! The entry is written by the capture stage and consumed exactly once per
//! successful sign-in. Consuming clears it, so a second consume in the same
//! sign-in returns the fallback. Concurrent requests on one session can
//! overwrite a capture or race a consume; see the session module.

use serde_json::Value;

use super::session::Session;

pub const RETURN_TO_KEY: &str = "portico.return_to";

/// Remember `path` as the pending destination, replacing any previous one.
pub fn capture(session: &Session, path: &str) {
    session.set_value(RETURN_TO_KEY, Value::String(path.to_string()));
}

/// Take the pending destination, or `fallback` if none was captured.
#[must_use]
pub fn consume_or_default(session: &Session, fallback: &str) -> String {
    session
        .take::<String>(RETURN_TO_KEY)
        .unwrap_or_else(|| fallback.to_string())
}

/// Read the pending destination without clearing it.
#[must_use]
pub fn peek(session: &Session) -> Option<String> {
    session.get(RETURN_TO_KEY)
}
