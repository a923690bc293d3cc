//! End-to-end tests for the request gate.
//!
//! The suite drives the full router in-process with `tower::ServiceExt::oneshot`
//! and a tiny cookie jar:
//! 1. Password sign-in replays the captured destination, with and without a
//!    namespace.
//! 2. OAuth sign-in and authorize callbacks land where the provider table says.
//! 3. Provider link guards redirect to the connect page without touching the
//!    return-to entry.
//! 4. Anti-forgery checks reject unsigned form posts except for uploads.
//! 5. A mailed reset link works once and signs the visitor in.
//! 6. Activity keeps a session alive past the store's idle timeout.

use anyhow::{anyhow, Context, Result};
use axum::{
    body::{to_bytes, Body},
    http::{
        header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
        Request, StatusCode,
    },
    response::Response,
    Router,
};
use portico::portico::{
    directory::{MemoryDirectory, UserDirectory},
    mailer::{MailMessage, Mailer},
    oauth::{self, CallbackParams, IdentityProvider, ProviderProfile, ProviderRegistry},
    return_to::RETURN_TO_KEY,
    router,
    session::{MemorySessionStore, SessionId, SessionStore},
    AppConfig, AppState, BoxFuture, Namespace,
};
use secrecy::SecretString;
use serde_json::Value;
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tower::ServiceExt;
use url::Url;

const EMAIL: &str = "ada@example.com";
const PASSWORD: &str = "hunter2";

struct FakeProvider {
    subject: &'static str,
    email: &'static str,
}

impl IdentityProvider for FakeProvider {
    fn authorize_url(&self, _scopes: &[&str], state: &str) -> Result<Url> {
        let mut url = Url::parse("https://provider.test/authorize")?;
        url.query_pairs_mut().append_pair("state", state);
        Ok(url)
    }

    fn complete<'a>(&'a self, _params: &'a CallbackParams) -> BoxFuture<'a, Result<ProviderProfile>> {
        Box::pin(async move {
            Ok(ProviderProfile {
                subject: self.subject.to_string(),
                email: Some(self.email.to_string()),
                display_name: None,
                access_token: SecretString::from("token"),
            })
        })
    }
}

/// Mailer that keeps every message so tests can follow mailed links.
#[derive(Clone, Default)]
struct Outbox(Arc<Mutex<Vec<MailMessage>>>);

impl Outbox {
    fn messages(&self) -> Vec<MailMessage> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Mailer for Outbox {
    fn send(&self, message: &MailMessage) -> Result<()> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}

struct Client {
    app: Router,
    store: Arc<MemorySessionStore>,
    outbox: Outbox,
    cookie: Option<String>,
}

impl Client {
    async fn new(namespace: Option<&str>) -> Result<Self> {
        Self::with(namespace, Duration::from_secs(60), MemoryDirectory::new()).await
    }

    async fn with(
        namespace: Option<&str>,
        session_ttl: Duration,
        directory: MemoryDirectory,
    ) -> Result<Self> {
        directory.register(EMAIL, PASSWORD).await?;

        let mut providers = ProviderRegistry::new();
        for (name, subject, email) in [
            ("github", "gh-1", "octo@example.com"),
            ("steam", "st-1", "gamer@example.com"),
        ] {
            let spec = oauth::spec(name).ok_or_else(|| anyhow!("missing row {name}"))?;
            providers = providers.register(*spec, Arc::new(FakeProvider { subject, email }));
        }

        let store = Arc::new(MemorySessionStore::new(session_ttl));
        let outbox = Outbox::default();
        let state = Arc::new(AppState::new(
            AppConfig::new(Namespace::new(namespace)?),
            store.clone(),
            Arc::new(directory),
            Arc::new(outbox.clone()),
            providers,
        ));

        Ok(Self {
            app: router(state),
            store,
            outbox,
            cookie: None,
        })
    }

    async fn send(&mut self, mut request: Request<Body>) -> Result<Response> {
        if let Some(cookie) = &self.cookie {
            request
                .headers_mut()
                .insert(COOKIE, format!("portico_session={cookie}").parse()?);
        }
        let response = self.app.clone().oneshot(request).await?;

        for header in response.headers().get_all(SET_COOKIE) {
            let value = header.to_str()?;
            if let Some(rest) = value.strip_prefix("portico_session=") {
                let id = rest.split(';').next().unwrap_or_default();
                self.cookie = (!id.is_empty()).then(|| id.to_string());
            }
        }
        Ok(response)
    }

    async fn get(&mut self, uri: &str) -> Result<Response> {
        self.send(Request::builder().uri(uri).body(Body::empty())?)
            .await
    }

    async fn post_form(&mut self, uri: &str, form: &str) -> Result<Response> {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form.to_string()))?,
        )
        .await
    }

    /// Render `page` and pull the anti-forgery token out of its form.
    async fn csrf_token(&mut self, page: &str) -> Result<String> {
        let html = body_text(self.get(page).await?).await?;
        let marker = r#"name="_csrf" value=""#;
        let start = html.find(marker).context("no CSRF field on page")? + marker.len();
        let end = html[start..].find('"').context("unterminated CSRF field")?;
        Ok(html[start..start + end].to_string())
    }

    async fn sign_in(&mut self, login_path: &str) -> Result<Response> {
        let token = self.csrf_token(login_path).await?;
        self.post_form(
            login_path,
            &format!("email=ada%40example.com&password={PASSWORD}&_csrf={token}"),
        )
        .await
    }

    async fn pending_return_to(&self) -> Result<Option<Value>> {
        let cookie = self.cookie.as_deref().context("no session cookie")?;
        let bag = self
            .store
            .get(&SessionId::from(cookie))
            .await?
            .context("session not stored")?;
        Ok(bag.get(RETURN_TO_KEY).cloned())
    }
}

fn location(response: &Response) -> Option<&str> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
}

async fn body_text(response: Response) -> Result<String> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(String::from_utf8(bytes.to_vec())?)
}

/// Path of the reset link in the latest reset mail.
fn mailed_reset_path(outbox: &Outbox) -> Result<String> {
    let message = outbox
        .messages()
        .into_iter()
        .rev()
        .find(|message| message.subject.starts_with("Reset your password"))
        .context("no reset mail sent")?;
    assert_eq!(message.to, EMAIL);
    let link = message
        .text
        .split_whitespace()
        .find(|word| word.starts_with("http"))
        .context("no link in reset mail")?;
    Ok(Url::parse(link)?.path().to_string())
}

fn state_param(response: &Response) -> Result<String> {
    let url = Url::parse(location(response).context("no provider redirect")?)?;
    url.query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
        .context("no state parameter")
}

#[tokio::test]
async fn anonymous_account_visit_returns_after_login() -> Result<()> {
    let mut client = Client::new(None).await?;

    let response = client.get("/account").await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/login"));

    let response = client.sign_in("/login").await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/account"));

    let response = client.get("/account").await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await?.contains(EMAIL));
    Ok(())
}

#[tokio::test]
async fn namespaced_mount_resolves_every_redirect() -> Result<()> {
    let mut client = Client::new(Some("app")).await?;

    let response = client.get("/app/account").await?;
    assert_eq!(location(&response), Some("/app/login"));

    let response = client.sign_in("/app/login").await?;
    assert_eq!(location(&response), Some("/app/account"));

    let response = client.get("/account").await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn login_without_capture_falls_back_to_home() -> Result<()> {
    let mut client = Client::new(None).await?;
    let response = client.sign_in("/login").await?;
    assert_eq!(location(&response), Some("/"));
    Ok(())
}

#[tokio::test]
async fn wrong_password_returns_to_login_with_notice() -> Result<()> {
    let mut client = Client::new(None).await?;
    let token = client.csrf_token("/login").await?;
    let response = client
        .post_form(
            "/login",
            &format!("email=ada%40example.com&password=nope&_csrf={token}"),
        )
        .await?;
    assert_eq!(location(&response), Some("/login"));

    let html = body_text(client.get("/login").await?).await?;
    assert!(html.contains("Invalid email or password."));
    Ok(())
}

#[tokio::test]
async fn session_id_changes_on_sign_in() -> Result<()> {
    let mut client = Client::new(None).await?;
    client.get("/account").await?;
    let before = client.cookie.clone();
    client.sign_in("/login").await?;
    assert!(client.cookie.is_some());
    assert_ne!(client.cookie, before);
    Ok(())
}

#[tokio::test]
async fn oauth_sign_in_replays_captured_destination() -> Result<()> {
    let mut client = Client::new(None).await?;
    client.get("/contact").await?;

    let response = client.get("/auth/github").await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let state = state_param(&response)?;

    let response = client
        .get(&format!("/auth/github/callback?code=c&state={state}"))
        .await?;
    assert_eq!(location(&response), Some("/contact"));

    let response = client.get("/account").await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await?.contains("octo@example.com"));
    Ok(())
}

#[tokio::test]
async fn oauth_state_mismatch_fails_to_login() -> Result<()> {
    let mut client = Client::new(None).await?;
    client.get("/auth/github").await?;

    let response = client
        .get("/auth/github/callback?code=c&state=forged")
        .await?;
    assert_eq!(location(&response), Some("/login"));

    let html = body_text(client.get("/login").await?).await?;
    assert!(html.contains("Sign-in failed. Please try again."));

    let response = client.get("/account").await?;
    assert_eq!(location(&response), Some("/login"));
    Ok(())
}

#[tokio::test]
async fn unconfigured_provider_is_not_mounted() -> Result<()> {
    let mut client = Client::new(None).await?;
    let response = client.get("/auth/twitter").await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn missing_provider_link_redirects_to_connect_page() -> Result<()> {
    let mut client = Client::new(None).await?;

    let response = client.get("/api/steam").await?;
    assert_eq!(location(&response), Some("/login"));

    client.sign_in("/login").await?;
    client.get("/account").await?;
    assert_eq!(
        client.pending_return_to().await?,
        Some(Value::String("/account".to_string()))
    );

    let response = client.get("/api/steam").await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/connect/steam"));
    assert_eq!(
        client.pending_return_to().await?,
        Some(Value::String("/account".to_string()))
    );

    let response = client.get("/connect/steam").await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await?.contains("/auth/steam"));
    Ok(())
}

#[tokio::test]
async fn authorize_callback_lands_on_feature_page() -> Result<()> {
    let mut client = Client::new(None).await?;
    client.sign_in("/login").await?;
    client.get("/account").await?;

    let response = client.get("/auth/steam").await?;
    let state = state_param(&response)?;
    let response = client
        .get(&format!("/auth/steam/callback?code=c&state={state}"))
        .await?;
    assert_eq!(location(&response), Some("/api/steam"));
    assert_eq!(
        client.pending_return_to().await?,
        Some(Value::String("/account".to_string()))
    );

    let response = client.get("/api/steam").await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn authorize_flow_requires_sign_in() -> Result<()> {
    let mut client = Client::new(None).await?;
    let response = client.get("/auth/steam").await?;
    assert_eq!(location(&response), Some("/login"));
    Ok(())
}

#[tokio::test]
async fn form_post_without_token_is_forbidden() -> Result<()> {
    let mut client = Client::new(None).await?;
    client.get("/contact").await?;

    let response = client
        .post_form("/contact", "name=Ada&email=ada%40example.com&message=hi")
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let token = client.csrf_token("/contact").await?;
    let response = client
        .post_form(
            "/contact",
            &format!("name=Ada&email=ada%40example.com&message=hi&_csrf={token}"),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/contact"));

    let html = body_text(client.get("/contact").await?).await?;
    assert!(html.contains("Email has been sent successfully!"));
    Ok(())
}

#[tokio::test]
async fn header_token_is_accepted() -> Result<()> {
    let mut client = Client::new(None).await?;
    client.sign_in("/login").await?;
    let token = client.csrf_token("/account").await?;

    let response = client
        .send(
            Request::builder()
                .method("POST")
                .uri("/account/profile")
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header("x-csrf-token", token)
                .body(Body::from("email=ada%40example.com&name=Ada"))?,
        )
        .await?;
    assert_eq!(location(&response), Some("/account"));

    let html = body_text(client.get("/account").await?).await?;
    assert!(html.contains("Profile information has been updated."));
    assert!(html.contains(r#"value="Ada""#));
    Ok(())
}

#[tokio::test]
async fn upload_is_exempt_from_token_check() -> Result<()> {
    let mut client = Client::new(None).await?;
    let response = client
        .send(
            Request::builder()
                .method("POST")
                .uri("/api/upload")
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(Body::from(vec![0_u8; 16]))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/api/upload"));

    let html = body_text(client.get("/api/upload").await?).await?;
    assert!(html.contains("File was uploaded successfully."));
    Ok(())
}

#[tokio::test]
async fn logout_destroys_session() -> Result<()> {
    let mut client = Client::new(None).await?;
    client.sign_in("/login").await?;

    let response = client.get("/logout").await?;
    assert_eq!(location(&response), Some("/"));
    assert!(client.cookie.is_none());

    let response = client.get("/account").await?;
    assert_eq!(location(&response), Some("/login"));
    Ok(())
}

#[tokio::test]
async fn status_and_security_headers() -> Result<()> {
    let mut client = Client::new(None).await?;
    let response = client.get("/status").await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("x-frame-options")
            .and_then(|v| v.to_str().ok()),
        Some("SAMEORIGIN")
    );
    assert!(response.headers().contains_key("x-request-id"));
    assert!(response.headers().contains_key("x-app"));
    Ok(())
}

async fn request_reset(client: &mut Client, email: &str) -> Result<Response> {
    let token = client.csrf_token("/forgot").await?;
    client
        .post_form("/forgot", &format!("email={email}&_csrf={token}"))
        .await
}

#[tokio::test]
async fn reset_link_works_once() -> Result<()> {
    let mut client = Client::new(None).await?;

    let response = request_reset(&mut client, "nobody%40example.com").await?;
    assert_eq!(location(&response), Some("/forgot"));
    assert!(client.outbox.messages().is_empty());
    let html = body_text(client.get("/forgot").await?).await?;
    assert!(html.contains("If an account exists for nobody@example.com"));

    let response = request_reset(&mut client, "ada%40example.com").await?;
    assert_eq!(location(&response), Some("/forgot"));
    let reset_path = mailed_reset_path(&client.outbox)?;
    assert!(reset_path.starts_with("/reset/"));

    let token = client.csrf_token(&reset_path).await?;
    let response = client
        .post_form(
            &reset_path,
            &format!("password=correct-horse&confirmPassword=correct-horse&_csrf={token}"),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/"));

    let response = client.get("/account").await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(client
        .outbox
        .messages()
        .iter()
        .any(|message| message.subject == "Your Portico password has been changed"));

    client.get("/logout").await?;
    let response = client.get(&reset_path).await?;
    assert_eq!(location(&response), Some("/forgot"));
    let html = body_text(client.get("/forgot").await?).await?;
    assert!(html.contains("Password reset token is invalid or has expired."));

    let response = client.sign_in("/login").await?;
    assert_eq!(location(&response), Some("/login"));

    let token = client.csrf_token("/login").await?;
    let response = client
        .post_form(
            "/login",
            &format!("email=ada%40example.com&password=correct-horse&_csrf={token}"),
        )
        .await?;
    // The last anonymous page visited was /forgot.
    assert_eq!(location(&response), Some("/forgot"));
    Ok(())
}

#[tokio::test]
async fn expired_reset_link_is_refused() -> Result<()> {
    let directory = MemoryDirectory::new().with_reset_ttl(Duration::ZERO);
    let mut client = Client::with(None, Duration::from_secs(60), directory).await?;

    request_reset(&mut client, "ada%40example.com").await?;
    let reset_path = mailed_reset_path(&client.outbox)?;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let response = client.get(&reset_path).await?;
    assert_eq!(location(&response), Some("/forgot"));

    let token = client.csrf_token("/forgot").await?;
    let response = client
        .post_form(
            &reset_path,
            &format!("password=correct-horse&confirmPassword=correct-horse&_csrf={token}"),
        )
        .await?;
    assert_eq!(location(&response), Some("/forgot"));

    let response = client.sign_in("/login").await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_ne!(location(&response), Some("/login"));
    Ok(())
}

#[tokio::test]
async fn active_session_outlives_idle_timeout() -> Result<()> {
    let mut client = Client::with(None, Duration::from_millis(400), MemoryDirectory::new()).await?;
    client.sign_in("/login").await?;
    let signed_in = client.cookie.clone();

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let response = client.get("/api").await?;
        assert!(response.headers().contains_key(SET_COOKIE));
    }
    assert_eq!(client.cookie, signed_in);

    let response = client.get("/account").await?;
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(500)).await;
    let response = client.get("/account").await?;
    assert_eq!(location(&response), Some("/login"));
    Ok(())
}
