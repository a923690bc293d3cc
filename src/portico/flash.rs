//! One-shot notices carried in the session until the next rendered page.

use serde::{Deserialize, Serialize};

use super::session::Session;

pub const FLASH_KEY: &str = "portico.flash";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashKind {
    Errors,
    Success,
    Info,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub kind: FlashKind,
    pub message: String,
}

/// Queue a notice for the next page the visitor sees.
pub fn push(session: &Session, kind: FlashKind, message: impl Into<String>) {
    let mut queued: Vec<Flash> = session.get(FLASH_KEY).unwrap_or_default();
    queued.push(Flash {
        kind,
        message: message.into(),
    });
    if let Err(err) = session.insert(FLASH_KEY, &queued) {
        tracing::error!("Failed to queue flash message: {err}");
    }
}

/// Take every queued notice.
#[must_use]
pub fn drain(session: &Session) -> Vec<Flash> {
    session.take(FLASH_KEY).unwrap_or_default()
}
