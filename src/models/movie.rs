//! Movie records and the partial updates applied to them.

use crate::models::form::FormSubmission;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};

/// A movie in the catalog.
///
/// `id` is assigned once at creation and never changes. `poster` holds
/// either a bare object key or a full URL embedding one.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Movie {
    pub id: String,
    pub title: String,
    pub rating: f64,
    pub synopsis: String,
    pub year: Option<i32>,
    pub duration: Option<i32>,
    pub director: Option<String>,
    pub genre: Option<String>,
    #[sqlx(rename = "cast_members")]
    pub cast: Option<Json<Vec<String>>>,
    pub poster: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A movie as returned to clients: the record plus a temporary link for
/// its poster (or the raw reference when no link could be issued).
#[derive(Serialize, Debug)]
pub struct MovieView {
    #[serde(flatten)]
    pub movie: Movie,
    pub poster_url: Option<String>,
}

/// Fields to overwrite on an existing record. `None` leaves a column alone.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MovieUpdate {
    pub title: Option<String>,
    pub rating: Option<f64>,
    pub synopsis: Option<String>,
    pub year: Option<i32>,
    pub duration: Option<i32>,
    pub director: Option<String>,
    pub genre: Option<String>,
    pub cast: Option<Vec<String>>,
    pub poster: Option<String>,
}

impl MovieUpdate {
    /// Collect every non-empty movie field from a submission.
    ///
    /// `poster_url` maps onto the poster reference; file attachments are
    /// left to the caller. Numbers that do not parse are rejected with a
    /// message naming the field.
    pub fn from_form(form: &FormSubmission) -> Result<Self, String> {
        Ok(Self {
            title: form.non_empty("title").map(str::to_string),
            rating: parse_rating(form)?,
            synopsis: form.non_empty("synopsis").map(str::to_string),
            year: parse_field(form, "year")?,
            duration: parse_field(form, "duration")?,
            director: form.non_empty("director").map(str::to_string),
            genre: form.non_empty("genre").map(str::to_string),
            cast: form.non_empty("cast").map(split_cast),
            poster: form.non_empty("poster_url").map(str::to_string),
        })
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn parse_field<T: std::str::FromStr>(form: &FormSubmission, name: &str) -> Result<Option<T>, String> {
    form.non_empty(name)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| format!("Invalid value for {}: {}", name, raw))
        })
        .transpose()
}

/// Ratings must be finite; `NaN` and `inf` parse as `f64` but cannot be stored.
fn parse_rating(form: &FormSubmission) -> Result<Option<f64>, String> {
    match parse_field::<f64>(form, "rating")? {
        Some(rating) if !rating.is_finite() => Err(format!(
            "Invalid value for rating: {}",
            form.non_empty("rating").unwrap_or_default()
        )),
        rating => Ok(rating),
    }
}

/// Comma-separated names, trimmed, blanks dropped.
fn split_cast(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
