//! Mount-point resolution for routes and redirect targets.
//!
//! The namespace is fixed at startup and cloned into everything that builds a
//! path. Resolution is not idempotent: resolving an already resolved path
//! prefixes it twice, so only logical paths (as written in route tables) may be
//! passed in.

use anyhow::{anyhow, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Namespace {
    prefix: Option<String>,
}

impl Namespace {
    /// Build a namespace from its configured value.
    ///
    /// Surrounding slashes are ignored and an empty value means "mounted at the
    /// root".
    ///
    /// # Errors
    /// Returns an error if the value contains an inner `/` or whitespace.
    pub fn new(raw: Option<&str>) -> Result<Self> {
        let Some(raw) = raw else {
            return Ok(Self::root());
        };

        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        if trimmed.contains('/') || trimmed.chars().any(char::is_whitespace) {
            return Err(anyhow!(
                "invalid namespace '{raw}': must be a single path segment"
            ));
        }

        Ok(Self {
            prefix: Some(trimmed.to_string()),
        })
    }

    /// Namespace for an application mounted at `/`.
    #[must_use]
    pub fn root() -> Self {
        Self { prefix: None }
    }

    #[must_use]
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Map a logical path (starting with `/`) to its physical mount path.
    #[must_use]
    pub fn resolve(&self, logical: &str) -> String {
        match &self.prefix {
            None => logical.to_string(),
            Some(prefix) if logical == "/" => format!("/{prefix}"),
            Some(prefix) => format!("/{prefix}{logical}"),
        }
    }
}
