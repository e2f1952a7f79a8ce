//! Gateway-style request handlers.
//!
//! Each catalog operation can also be deployed on its own behind an API
//! gateway. A handler receives one event (`httpMethod`, `headers`, `body`,
//! `isBase64Encoded`, `pathParameters`, `queryStringParameters`) and
//! answers with `{statusCode, headers, body}`, where `body` is a JSON
//! string. Both shapes share [`MovieService`] and the [`AppError`] body.

use crate::{
    errors::AppError,
    handlers::{
        link_handlers::{LinkRequest, LinkResponse},
        movie_handlers::{ListMoviesResponse, read_submission},
    },
    services::{movie_service::MovieService, multipart::RequestBody},
};
use axum::http::StatusCode;
use base64::{Engine as _, engine::general_purpose};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

const ALLOW_HEADERS: &str = "Content-Type,X-Amz-Date,Authorization,X-Api-Key,X-Amz-Security-Token";

/// The stand-alone handlers, one per catalog operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Handler {
    ListMovies,
    GetMovie,
    AddMovie,
    UpdateMovie,
    DeleteMovie,
    GenerateLink,
}

impl Handler {
    fn allowed_methods(self) -> &'static str {
        match self {
            Handler::ListMovies | Handler::GetMovie => "GET,OPTIONS",
            Handler::AddMovie => "POST,OPTIONS",
            Handler::UpdateMovie => "PUT,OPTIONS",
            Handler::DeleteMovie => "DELETE,OPTIONS",
            Handler::GenerateLink => "GET,POST,OPTIONS",
        }
    }
}

/// An inbound gateway event. Every member may be absent or `null`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayEvent {
    pub http_method: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub body: Option<String>,
    pub is_base64_encoded: bool,
    pub path_parameters: Option<HashMap<String, String>>,
    pub query_string_parameters: Option<HashMap<String, String>>,
}

impl GatewayEvent {
    /// Header lookup ignoring case, as gateways disagree on it.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()?
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_parameters.as_ref()?.get(name).map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_string_parameters
            .as_ref()?
            .get(name)
            .map(String::as_str)
    }

    fn request_body(&self) -> RequestBody {
        let body = self.body.clone().unwrap_or_default();
        if self.is_base64_encoded {
            RequestBody::Base64(body)
        } else {
            RequestBody::Text(body)
        }
    }

    /// The body parsed as JSON, when it is JSON at all.
    fn json_body(&self) -> Option<Value> {
        let raw = self.body.as_deref()?;
        if self.is_base64_encoded {
            let decoded = general_purpose::STANDARD.decode(raw.trim()).ok()?;
            serde_json::from_slice(&decoded).ok()
        } else {
            serde_json::from_str(raw).ok()
        }
    }

    /// `id` from the path, else from a JSON body.
    fn movie_id(&self) -> Result<String, AppError> {
        self.path_param("id")
            .map(str::to_string)
            .or_else(|| {
                self.json_body()?
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| AppError::bad_request("Movie ID is required"))
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl GatewayResponse {
    fn new(handler: Handler, status: StatusCode, body: String) -> Self {
        let headers = BTreeMap::from([
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Access-Control-Allow-Origin".to_string(), "*".to_string()),
            ("Access-Control-Allow-Headers".to_string(), ALLOW_HEADERS.to_string()),
            (
                "Access-Control-Allow-Methods".to_string(),
                handler.allowed_methods().to_string(),
            ),
        ]);
        Self {
            status_code: status.as_u16(),
            headers,
            body,
        }
    }

    fn json(handler: Handler, status: StatusCode, body: &Value) -> Self {
        Self::new(handler, status, body.to_string())
    }
}

/// Run one handler against one event. Never fails: every error becomes a
/// response carrying the usual `{"error", "status"}` body.
pub async fn dispatch(service: &MovieService, handler: Handler, event: GatewayEvent) -> GatewayResponse {
    let method = event.http_method.as_deref().unwrap_or_default();
    if method.eq_ignore_ascii_case("OPTIONS") {
        debug!(?handler, "answering preflight");
        return GatewayResponse::new(handler, StatusCode::OK, String::new());
    }

    let outcome = match handler {
        Handler::ListMovies => list_movies(service).await,
        Handler::GetMovie => get_movie(service, &event).await,
        Handler::AddMovie => add_movie(service, &event).await,
        Handler::UpdateMovie => update_movie(service, &event).await,
        Handler::DeleteMovie => delete_movie(service, &event).await,
        Handler::GenerateLink => generate_link(service, &event),
    };

    match outcome {
        Ok((status, body)) => {
            info!(?handler, status = status.as_u16(), "handled gateway event");
            GatewayResponse::json(handler, status, &body)
        }
        Err(err) => {
            info!(?handler, status = err.status.as_u16(), error = %err, "gateway event failed");
            GatewayResponse::json(handler, err.status, &err.body())
        }
    }
}

type Outcome = Result<(StatusCode, Value), AppError>;

fn to_json<T: Serialize>(value: T) -> Result<Value, AppError> {
    serde_json::to_value(value).map_err(|err| AppError::internal(err.to_string()))
}

async fn list_movies(service: &MovieService) -> Outcome {
    let listing = service.list_movies(None).await?;
    Ok((StatusCode::OK, to_json(ListMoviesResponse::from(listing))?))
}

async fn get_movie(service: &MovieService, event: &GatewayEvent) -> Outcome {
    let id = event.movie_id()?;
    Ok((StatusCode::OK, to_json(service.get_movie(&id).await?)?))
}

async fn add_movie(service: &MovieService, event: &GatewayEvent) -> Outcome {
    let content_type = event.header("content-type").unwrap_or_default();
    let form = read_submission(content_type, event.request_body())?;
    let movie = service.add_movie(form).await?;
    Ok((
        StatusCode::CREATED,
        json!({ "message": "Movie added successfully", "movie": to_json(movie)? }),
    ))
}

async fn update_movie(service: &MovieService, event: &GatewayEvent) -> Outcome {
    let content_type = event.header("content-type").unwrap_or_default();
    let form = read_submission(content_type, event.request_body())?;

    let id = match event.path_param("id") {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ => form
            .non_empty("id")
            .map(str::to_string)
            .ok_or_else(|| AppError::bad_request("Movie ID is required"))?,
    };

    let movie = service.update_movie(&id, form).await?;
    Ok((
        StatusCode::OK,
        json!({ "message": "Movie updated successfully", "movie": to_json(movie)? }),
    ))
}

async fn delete_movie(service: &MovieService, event: &GatewayEvent) -> Outcome {
    let id = event.movie_id()?;
    let movie = service.delete_movie(&id).await?;
    Ok((
        StatusCode::OK,
        json!({ "message": "Movie deleted successfully", "id": movie.id }),
    ))
}

/// The key comes from the path, the query string or a JSON body, in that
/// order; `expiration` from the query string or the body.
fn generate_link(service: &MovieService, event: &GatewayEvent) -> Outcome {
    let from_body: LinkRequest = event
        .json_body()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default();

    let key = event
        .path_param("key")
        .or_else(|| event.query_param("key"))
        .map(str::to_string)
        .or_else(|| from_body.key.clone())
        .unwrap_or_default();
    let expiration = event
        .query_param("expiration")
        .map(str::to_string)
        .or_else(|| from_body.expiration_text());

    let link = service.generate_link(&key, expiration.as_deref())?;
    Ok((StatusCode::OK, to_json(LinkResponse::from(link))?))
}
