//! Identity provider contract and the generic OAuth 2.0 authorization-code
//! integration.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use crate::{portico::BoxFuture, APP_USER_AGENT};

const HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Identity returned by a provider after a successful callback.
#[derive(Clone, Debug)]
pub struct ProviderProfile {
    pub subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub access_token: SecretString,
}

/// Query parameters the provider sends back to the callback route.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

pub trait IdentityProvider: Send + Sync {
    /// URL the browser is sent to when the flow starts.
    ///
    /// # Errors
    /// Returns an error if the URL cannot be built.
    fn authorize_url(&self, scopes: &[&str], state: &str) -> Result<Url>;

    /// Turn a callback into a profile; the state token has already been checked.
    fn complete<'a>(&'a self, params: &'a CallbackParams) -> BoxFuture<'a, Result<ProviderProfile>>;
}

pub struct OAuth2Config {
    pub client_id: String,
    pub client_secret: SecretString,
    pub authorize_url: Url,
    pub token_url: Url,
    pub profile_url: Url,
    pub redirect_url: Url,
}

pub struct OAuth2Provider {
    config: OAuth2Config,
    client: Client,
}

impl OAuth2Provider {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: OAuth2Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECONDS))
            .build()?;
        Ok(Self { config, client })
    }

    #[instrument(skip(self, code))]
    async fn exchange(&self, code: &str) -> Result<SecretString> {
        let response = self
            .client
            .post(self.config.token_url.as_str())
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose_secret()),
            ])
            .send()
            .await
            .context("token request failed")?;

        let status = response.status();
        let json_response: Value = response.json().await.context("invalid token response")?;
        if !status.is_success() {
            return Err(anyhow!(
                "{} - {}, {}",
                self.config.token_url,
                status,
                error_message(&json_response)
            ));
        }

        json_response
            .get("access_token")
            .and_then(Value::as_str)
            .map(SecretString::from)
            .ok_or_else(|| anyhow!("Error parsing JSON response: no access_token found"))
    }

    #[instrument(skip(self, access_token))]
    async fn profile(&self, access_token: SecretString) -> Result<ProviderProfile> {
        let response = self
            .client
            .get(self.config.profile_url.as_str())
            .bearer_auth(access_token.expose_secret())
            .header("Accept", "application/json")
            .send()
            .await
            .context("profile request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("{} - {}", self.config.profile_url, status));
        }

        let json_response: Value = response.json().await.context("invalid profile response")?;
        debug!("Fetched provider profile");
        profile_from_json(&json_response, access_token)
    }
}

impl IdentityProvider for OAuth2Provider {
    fn authorize_url(&self, scopes: &[&str], state: &str) -> Result<Url> {
        let mut url = self.config.authorize_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", self.config.redirect_url.as_str())
                .append_pair("state", state);
            if !scopes.is_empty() {
                query.append_pair("scope", &scopes.join(" "));
            }
        }
        Ok(url)
    }

    fn complete<'a>(&'a self, params: &'a CallbackParams) -> BoxFuture<'a, Result<ProviderProfile>> {
        Box::pin(async move {
            let code = params
                .code
                .as_deref()
                .filter(|code| !code.is_empty())
                .ok_or_else(|| anyhow!("callback is missing the authorization code"))?;
            let access_token = self.exchange(code).await?;
            self.profile(access_token).await
        })
    }
}

fn error_message(json_response: &Value) -> &str {
    json_response
        .get("error_description")
        .or_else(|| json_response.get("error"))
        .and_then(Value::as_str)
        .unwrap_or("")
}

fn profile_from_json(json: &Value, access_token: SecretString) -> Result<ProviderProfile> {
    let subject = match json.get("id") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => return Err(anyhow!("Error parsing JSON response: no id found")),
    };
    let email = json
        .get("email")
        .and_then(Value::as_str)
        .map(ToString::to_string);
    let display_name = json
        .get("name")
        .and_then(Value::as_str)
        .or_else(|| json.get("login").and_then(Value::as_str))
        .map(ToString::to_string);

    Ok(ProviderProfile {
        subject,
        email,
        display_name,
        access_token,
    })
}
