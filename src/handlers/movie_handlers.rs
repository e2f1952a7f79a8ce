//! HTTP handlers for the movie catalog.
//!
//! Bodies are accepted as `application/json` or `multipart/form-data`;
//! both are turned into a [`FormSubmission`] before reaching the service.

use crate::{
    errors::AppError,
    models::{form::FormSubmission, movie::MovieView},
    services::{
        movie_service::{MovieListing, MovieService},
        movie_store::{MAX_PAGE_SIZE, ScanParams},
        multipart::{self, RequestBody},
    },
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Default, Deserialize)]
pub struct ListMoviesQuery {
    pub limit: Option<usize>,
    #[serde(rename = "continuation-token")]
    pub continuation_token: Option<String>,
}

impl ListMoviesQuery {
    /// `None` asks for every movie; any paging parameter asks for one page.
    pub fn scan_params(&self) -> Option<ScanParams> {
        if self.limit.is_none() && self.continuation_token.is_none() {
            return None;
        }
        Some(ScanParams {
            start_after: self
                .continuation_token
                .as_deref()
                .map(decode_continuation_token),
            limit: self.limit.unwrap_or(MAX_PAGE_SIZE),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMoviesResponse {
    pub movies: Vec<MovieView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
}

impl From<MovieListing> for ListMoviesResponse {
    fn from(listing: MovieListing) -> Self {
        Self {
            movies: listing.movies,
            continuation_token: listing.next_token.as_deref().map(encode_continuation_token),
        }
    }
}

/// Turn a request body into a submission according to its content type.
pub fn read_submission(content_type: &str, body: RequestBody) -> Result<FormSubmission, AppError> {
    let media_type = content_type.to_ascii_lowercase();
    if media_type.contains("multipart/form-data") {
        return Ok(multipart::decode(content_type, body)?);
    }
    if !media_type.contains("application/json") {
        return Err(AppError::bad_request(
            "Content-Type must be application/json or multipart/form-data",
        ));
    }

    let raw = match body {
        RequestBody::Text(text) => Bytes::from(text),
        other => other.into_bytes()?,
    };
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(FormSubmission::default());
    }
    serde_json::from_slice(&raw)
        .map(FormSubmission::from_json)
        .map_err(|_| AppError::bad_request("Invalid JSON in request body"))
}

fn content_type(headers: &HeaderMap) -> &str {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// `GET /movies`
pub async fn list_movies(
    State(service): State<MovieService>,
    Query(query): Query<ListMoviesQuery>,
) -> Result<Json<ListMoviesResponse>, AppError> {
    let listing = service.list_movies(query.scan_params()).await?;
    Ok(Json(listing.into()))
}

/// `GET /movies/{id}`
pub async fn get_movie(
    State(service): State<MovieService>,
    Path(id): Path<String>,
) -> Result<Json<MovieView>, AppError> {
    Ok(Json(service.get_movie(&id).await?))
}

/// `POST /movies`
pub async fn add_movie(
    State(service): State<MovieService>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let form = read_submission(content_type(&headers), RequestBody::Binary(body))?;
    let movie = service.add_movie(form).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Movie added successfully",
            "movie": movie
        })),
    ))
}

/// `PUT /movies/{id}`
pub async fn update_movie(
    State(service): State<MovieService>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let form = read_submission(content_type(&headers), RequestBody::Binary(body))?;
    let movie = service.update_movie(&id, form).await?;
    Ok(Json(json!({
        "message": "Movie updated successfully",
        "movie": movie
    })))
}

/// `DELETE /movies/{id}`
pub async fn delete_movie(
    State(service): State<MovieService>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let movie = service.delete_movie(&id).await?;
    Ok(Json(json!({
        "message": "Movie deleted successfully",
        "id": movie.id
    })))
}

pub fn encode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD.encode(token)
}

pub fn decode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| token.to_string())
}
