//! Command-line argument dispatch.
//!
//! This module maps validated CLI arguments to the action to run, which today
//! is always the web server with its full configuration.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{
    providers, session, ARG_CONTACT_TO, ARG_NAMESPACE, ARG_PORT, ARG_PUBLIC_BASE_URL,
};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let namespace = matches
        .get_one::<String>(ARG_NAMESPACE)
        .cloned()
        .filter(|v| !v.trim().is_empty());
    let public_base_url = matches
        .get_one::<String>(ARG_PUBLIC_BASE_URL)
        .cloned()
        .context("missing required argument: --public-base-url")?;
    let contact_to = matches
        .get_one::<String>(ARG_CONTACT_TO)
        .cloned()
        .context("missing required argument: --contact-to")?;

    let session_opts = session::Options::parse(matches)?;
    let provider_opts = providers::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        namespace,
        public_base_url,
        contact_to,
        session_ttl_seconds: session_opts.ttl_seconds,
        session_cookie_secure: session_opts.cookie_secure,
        providers: provider_opts.providers,
    }))
}
