//! Defines the routes of the CineDB HTTP API.
//!
//! ## Structure
//! - **Movies**
//!   - `GET    /movies`      — list (optional `limit` / `continuation-token`)
//!   - `POST   /movies`      — add
//!   - `GET    /movies/{id}` — get one
//!   - `PUT    /movies/{id}` — partial update
//!   - `DELETE /movies/{id}` — delete, then drop the poster
//!
//! - **Links**
//!   - `GET  /links?key=&expiration=` — issue a temporary link
//!   - `POST /links`                  — same, JSON body
//!
//! - **Objects**
//!   - `GET /objects/{bucket}/{*key}?expires=&signature=` — signed download
//!
//! The wildcard `*key` allows nested keys like `posters/2025/img.jpg`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        link_handlers::{link_from_body, link_from_query},
        movie_handlers::{add_movie, delete_movie, get_movie, list_movies, update_movie},
        object_handlers::get_signed_object,
    },
    services::movie_service::MovieService,
};
use axum::{Router, extract::DefaultBodyLimit, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Largest request body accepted, poster uploads included.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Build the router for every endpoint, sharing `MovieService` as state.
pub fn routes() -> Router<MovieService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/movies", get(list_movies).post(add_movie))
        .route(
            "/movies/{id}",
            get(get_movie).put(update_movie).delete(delete_movie),
        )
        .route("/links", get(link_from_query).post(link_from_body))
        .route("/objects/{bucket}/{*key}", get(get_signed_object))
}

/// The complete application: routes, state, CORS, request tracing and the
/// body size limit.
pub fn app(service: MovieService) -> Router {
    routes()
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}
