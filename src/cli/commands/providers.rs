//! OAuth client credentials, five arguments per provider row.
//!
//! A provider is mounted only when its client id is set. Once it is, the
//! secret and all three endpoint URLs are required.

use anyhow::{bail, Context};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use url::Url;

use crate::portico::oauth::BASELINE;

const FIELDS: [(&str, &str); 5] = [
    ("client-id", "OAuth client id"),
    ("client-secret", "OAuth client secret"),
    ("authorize-url", "Authorization endpoint URL"),
    ("token-url", "Token endpoint URL"),
    ("profile-url", "Profile (user info) endpoint URL"),
];

#[must_use]
pub fn arg_id(provider: &str, field: &str) -> String {
    format!("oauth-{provider}-{field}")
}

fn env_name(provider: &str, field: &str) -> String {
    format!("PORTICO_OAUTH_{provider}_{field}")
        .to_uppercase()
        .replace('-', "_")
}

#[derive(Debug)]
pub struct ProviderOptions {
    pub name: &'static str,
    pub client_id: String,
    pub client_secret: SecretString,
    pub authorize_url: Url,
    pub token_url: Url,
    pub profile_url: Url,
}

#[derive(Debug, Default)]
pub struct Options {
    pub providers: Vec<ProviderOptions>,
}

impl Options {
    /// Parse provider credentials from matches.
    ///
    /// # Errors
    /// Returns an error if a provider is partially configured or a URL is invalid.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let mut providers = Vec::new();
        for spec in BASELINE {
            let Some(client_id) = get_non_empty(&arg_id(spec.name, "client-id")) else {
                continue;
            };

            let required = |field: &str| -> anyhow::Result<String> {
                let id = arg_id(spec.name, field);
                match get_non_empty(&id) {
                    Some(value) => Ok(value),
                    None => bail!("missing required argument: --{id}"),
                }
            };
            let url = |field: &str| -> anyhow::Result<Url> {
                let value = required(field)?;
                Url::parse(&value)
                    .with_context(|| format!("invalid --{}: {value}", arg_id(spec.name, field)))
            };

            providers.push(ProviderOptions {
                name: spec.name,
                client_id,
                client_secret: SecretString::from(required("client-secret")?),
                authorize_url: url("authorize-url")?,
                token_url: url("token-url")?,
                profile_url: url("profile-url")?,
            });
        }

        Ok(Self { providers })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let mut command = command;
    for spec in BASELINE {
        for (field, help) in FIELDS {
            command = command.arg(
                Arg::new(arg_id(spec.name, field))
                    .long(arg_id(spec.name, field))
                    .help(format!("{} {help}", spec.label))
                    .env(env_name(spec.name, field))
                    .hide_env_values(field == "client-secret"),
            );
        }
    }
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_names_are_upper_snake_case() {
        assert_eq!(
            env_name("github", "client-secret"),
            "PORTICO_OAUTH_GITHUB_CLIENT_SECRET"
        );
        assert_eq!(arg_id("steam", "token-url"), "oauth-steam-token-url");
    }
}
