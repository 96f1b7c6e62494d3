//! HTTP surface: resource routes under [`API_PREFIX`], the health probe and
//! the generated `OpenAPI` document.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod openapi;
pub mod query;
pub mod reference;
pub mod resource;

use crate::store::SharedStore;
use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Method, Request},
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

/// Path prefix of every resource route.
pub const API_PREFIX: &str = "/api/v1";

/// Build the application with its middleware stack.
#[must_use]
pub fn router(store: SharedStore) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_origin(Any);

    Router::new()
        .nest(API_PREFIX, handlers::resources())
        .route("/health", get(handlers::health::health).options(handlers::health::health))
        .route("/openapi.json", get(openapi_json))
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
                .layer(cors)
                .layer(Extension(store)),
        )
}

async fn openapi_json() -> impl IntoResponse {
    Json(openapi::openapi())
}

/// Serve the API until ctrl-c.
///
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn new(port: u16, store: SharedStore) -> Result<()> {
    let app = router(store);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    info_span!(
        "http.request",
        method = %request.method(),
        route,
        request_id
    )
}
