use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware::from_fn,
    Extension, Router,
};
use std::{future::Future, pin::Pin, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer,
    set_header::{SetRequestHeaderLayer, SetResponseHeaderLayer},
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

pub mod csrf;
pub mod directory;
pub mod error;
pub mod flash;
pub mod gate;
pub mod handlers;
pub mod mailer;
pub mod namespace;
pub mod oauth;
pub mod principal;
pub mod return_to;
pub mod routes;
pub mod session;
mod state;
mod utils;

pub use namespace::Namespace;
pub use state::{AppConfig, AppState};

/// Boxed future used by the async trait seams (session store, identity
/// providers) so they stay object safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Build the front-end router with the request gate in front of every route.
///
/// Layer order, outermost first: request id, tracing, security headers, state,
/// session load, return-to capture, CSRF verification. Route guards run last,
/// as route layers.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    routes::register(&state)
        .into_router()
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(SetResponseHeaderLayer::if_not_present(
                    HeaderName::from_static("x-frame-options"),
                    HeaderValue::from_static("SAMEORIGIN"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    HeaderName::from_static("x-xss-protection"),
                    HeaderValue::from_static("1; mode=block"),
                ))
                .layer(Extension(state))
                .layer(from_fn(session::middleware))
                .layer(from_fn(gate::capture_stage))
                .layer(from_fn(csrf::verify)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, state: Arc<AppState>) -> Result<()> {
    let namespace = state.config().namespace().clone();
    let providers: Vec<&str> = state.providers().iter().map(|(spec, _)| spec.name).collect();
    info!(
        mount = namespace.resolve("/"),
        providers = providers.join(","),
        "Routes registered"
    );

    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Gracefully shutdown");
            }
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
