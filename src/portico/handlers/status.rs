use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Method},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::GIT_COMMIT_HASH;

#[derive(Serialize, Deserialize, Debug)]
pub struct Status {
    name: String,
    version: String,
    build: String,
}

// axum handler for status
pub async fn status(method: Method) -> impl IntoResponse {
    let status = Status {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build: GIT_COMMIT_HASH.to_string(),
    };

    let short_hash = if status.build.len() > 7 {
        &status.build[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", status.name, status.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();

            headers.insert("X-App", x_app_header_value);

            headers
        })
        .map_err(|err| {
            error!("Failed to parse X-App header: {}", err);
        });

    let headers = headers.unwrap_or_else(|()| HeaderMap::new());

    let body = if method == Method::GET {
        Json(&status).into_response()
    } else {
        Body::empty().into_response()
    };

    (headers, body).into_response()
}
