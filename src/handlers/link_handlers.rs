//! Temporary link issuance.
//!
//! - `GET  /links?key=&expiration=`
//! - `POST /links` with `{"key": ..., "expiration": ...}`

use crate::{
    errors::AppError,
    services::{link_issuer::IssuedLink, movie_service::MovieService},
};
use axum::{
    Json,
    extract::{Query, State},
};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Default, Deserialize)]
pub struct LinkQuery {
    pub key: Option<String>,
    pub expiration: Option<String>,
}

/// JSON request body. `expiration` may be a number or a string.
#[derive(Debug, Default, Deserialize)]
pub struct LinkRequest {
    pub key: Option<String>,
    pub expiration: Option<Value>,
}

impl LinkRequest {
    /// The requested lifetime as text. Fractional numbers are truncated
    /// toward zero before clamping.
    pub fn expiration_text(&self) -> Option<String> {
        match self.expiration.as_ref()? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) if n.is_f64() => n.as_f64().map(|secs| format!("{:.0}", secs.trunc())),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkResponse {
    pub presigned_url: String,
    pub expiration: u64,
    pub key: String,
    pub expires_at: String,
}

impl From<IssuedLink> for LinkResponse {
    fn from(link: IssuedLink) -> Self {
        Self {
            presigned_url: link.url,
            expiration: link.effective_seconds,
            key: link.key,
            expires_at: link.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// `GET /links`
pub async fn link_from_query(
    State(service): State<MovieService>,
    Query(query): Query<LinkQuery>,
) -> Result<Json<LinkResponse>, AppError> {
    let link = service.generate_link(
        query.key.as_deref().unwrap_or_default(),
        query.expiration.as_deref(),
    )?;
    Ok(Json(link.into()))
}

/// `POST /links`
pub async fn link_from_body(
    State(service): State<MovieService>,
    Json(request): Json<LinkRequest>,
) -> Result<Json<LinkResponse>, AppError> {
    let expiration = request.expiration_text();
    let link = service.generate_link(
        request.key.as_deref().unwrap_or_default(),
        expiration.as_deref(),
    )?;
    Ok(Json(link.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(expiration: Value) -> LinkRequest {
        serde_json::from_value(json!({ "key": "posters/a.jpg", "expiration": expiration })).unwrap()
    }

    #[test]
    fn expiration_numbers_and_strings() {
        assert_eq!(request(json!(120)).expiration_text().as_deref(), Some("120"));
        assert_eq!(request(json!("90")).expiration_text().as_deref(), Some("90"));
        assert_eq!(request(json!(30.5)).expiration_text().as_deref(), Some("30"));
        assert_eq!(request(Value::Null).expiration_text(), None);
        assert_eq!(LinkRequest::default().expiration_text(), None);
    }

    #[tokio::test]
    async fn fractional_expiration_is_truncated_then_clamped() {
        let (service, _dir) = crate::test_support::service().await;
        let request = request(json!(30.5));

        let link = service
            .generate_link("posters/a.jpg", request.expiration_text().as_deref())
            .unwrap();
        assert_eq!(link.effective_seconds, 60);
    }
}
