//! # Portico (mountable web front-end)
//!
//! `portico` serves a small web front-end that can be mounted under an optional
//! path namespace. Most routes are plain pages; the interesting part is the
//! request gate in front of them.
//!
//! ## Request Gate
//!
//! Every request passes through, in order:
//!
//! - **Session load:** the `portico_session` cookie is resolved against the
//!   session store. Unknown or expired ids get a fresh session; a store failure
//!   fails the request.
//! - **Return-to capture:** anonymous visits to non-public, non-asset paths are
//!   remembered so sign-in can send the visitor back where they were going.
//! - **CSRF verification:** state-changing requests must carry the session's
//!   anti-forgery token, except for the file upload endpoint.
//! - **Route guards:** protected routes redirect anonymous visitors to the login
//!   page and visitors without the required linked provider to a connect page.
//!
//! ## OAuth
//!
//! Providers are described by a table (name, scopes, flow kind, failure
//! redirect). Sign-in providers establish the principal and replay the
//! return-to destination; authorize providers only link a credential to an
//! already signed-in principal and land on the provider's feature page.

pub mod cli;
pub mod portico;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
