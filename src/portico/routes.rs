//! Route registration.
//!
//! Routes are declared with logical paths and an ordered guard list. The
//! namespace is applied here, once, so handlers and guards never see physical
//! paths they did not build themselves.

use axum::{
    extract::{Extension, Query, Request},
    middleware::{from_fn, Next},
    routing::{get, post, MethodRouter},
    Router,
};
use std::sync::Arc;
use tracing::debug;

use super::{
    gate::{self, Guard},
    handlers::{api, contact, home, reset, status, user},
    namespace::Namespace,
    oauth::{orchestrator, CallbackParams},
    session::Session,
    AppState,
};

/// Router builder that resolves logical paths and attaches guards.
pub struct Routes {
    namespace: Namespace,
    router: Router,
}

impl Routes {
    #[must_use]
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            router: Router::new(),
        }
    }

    /// Register `method_router` at `logical`, guarded by `guards` in order.
    #[must_use]
    pub fn route(mut self, logical: &str, guards: &[Guard], method_router: MethodRouter) -> Self {
        let path = self.namespace.resolve(logical);
        debug!(path, ?guards, "registering route");

        let method_router = if guards.is_empty() {
            method_router
        } else {
            let guards: Arc<[Guard]> = guards.into();
            method_router.route_layer(from_fn(move |request: Request, next: Next| {
                gate::enforce(guards.clone(), request, next)
            }))
        };

        self.router = self.router.route(&path, method_router);
        self
    }

    #[must_use]
    pub fn into_router(self) -> Router {
        self.router
    }
}

/// Every route the front-end serves, including one set per configured provider.
#[must_use]
pub fn register(state: &AppState) -> Routes {
    let signed_in = [Guard::RequiresPrincipal];

    let mut routes = Routes::new(state.config().namespace().clone())
        .route("/", &[], get(home::index))
        .route("/login", &[], get(user::login_page).post(user::login))
        .route("/logout", &[], get(user::logout))
        .route("/signup", &[], get(user::signup_page).post(user::signup))
        .route("/forgot", &[], get(reset::forgot_page).post(reset::forgot))
        .route("/reset/:token", &[], get(reset::reset_page).post(reset::reset))
        .route("/contact", &[], get(contact::contact_page).post(contact::send))
        .route("/account", &signed_in, get(user::account))
        .route("/account/profile", &signed_in, post(user::update_profile))
        .route("/account/password", &signed_in, post(user::update_password))
        .route("/account/delete", &signed_in, post(user::delete_account))
        .route("/account/unlink/:provider", &signed_in, get(user::unlink))
        .route("/api", &[], get(api::landing))
        .route("/api/upload", &[], get(api::upload_page).post(api::upload))
        .route("/connect/:provider", &signed_in, get(api::connect_page))
        .route("/status", &[], get(status::status));

    for (spec, _) in state.providers().iter() {
        let name = spec.name;
        routes = routes
            .route(
                &format!("/auth/{name}"),
                &[],
                get(
                    move |Extension(state): Extension<Arc<AppState>>,
                          Extension(session): Extension<Session>| async move {
                        orchestrator::initiate(&state, &session, name)
                    },
                ),
            )
            .route(
                &format!("/auth/{name}/callback"),
                &[],
                get(
                    move |Extension(state): Extension<Arc<AppState>>,
                          Extension(session): Extension<Session>,
                          Query(params): Query<CallbackParams>| async move {
                        orchestrator::callback(&state, &session, name, &params).await
                    },
                ),
            )
            .route(
                &format!("/api/{name}"),
                &Guard::authorized(name),
                get(
                    move |Extension(state): Extension<Arc<AppState>>,
                          Extension(session): Extension<Session>| async move {
                        api::provider_page(&state, &session, name)
                    },
                ),
            );
    }

    routes
}
