//! The catalog operations shared by the HTTP routes and the
//! gateway handlers: list, get, add, update, delete and link issuance.
//!
//! Records live in [`MovieStore`], poster payloads in [`StorageService`],
//! and posters are exposed through links minted by [`LinkIssuer`].

use crate::{
    models::{
        form::{FilePart, FormSubmission},
        movie::{Movie, MovieUpdate, MovieView},
    },
    services::{
        link_issuer::{IssuedLink, LinkError, LinkIssuer},
        movie_store::{MovieStore, ScanPage, ScanParams},
        multipart::MultipartError,
        storage_service::{StorageError, StorageService},
    },
};
use chrono::Utc;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

const POSTER_PREFIX: &str = "posters/";

#[derive(Debug, Error)]
pub enum MovieError {
    #[error("Movie with ID {0} not found")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Multipart(#[from] MultipartError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("error uploading image: {0}")]
    Upload(#[source] StorageError),
    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

pub type MovieResult<T> = Result<T, MovieError>;

/// A page of decorated movies.
#[derive(Debug)]
pub struct MovieListing {
    pub movies: Vec<MovieView>,
    pub next_token: Option<String>,
}

#[derive(Clone)]
pub struct MovieService {
    movies: MovieStore,
    storage: StorageService,
    links: LinkIssuer,
    bucket: String,
}

impl MovieService {
    pub fn new(
        movies: MovieStore,
        storage: StorageService,
        links: LinkIssuer,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            movies,
            storage,
            links,
            bucket: bucket.into(),
        }
    }

    pub fn storage(&self) -> &StorageService {
        &self.storage
    }

    /// Every movie, or a single page when `page` is given.
    pub async fn list_movies(&self, page: Option<ScanParams>) -> MovieResult<MovieListing> {
        let ScanPage { movies, next_token } = match page {
            Some(params) => self.movies.scan(params).await?,
            None => ScanPage {
                movies: self.movies.scan_all().await?,
                next_token: None,
            },
        };

        Ok(MovieListing {
            movies: movies.into_iter().map(|movie| self.decorate(movie)).collect(),
            next_token,
        })
    }

    pub async fn get_movie(&self, id: &str) -> MovieResult<MovieView> {
        let movie = self
            .movies
            .get(id)
            .await?
            .ok_or_else(|| MovieError::NotFound(id.to_string()))?;
        Ok(self.decorate(movie))
    }

    /// Create a movie from a submission. `title` is required; a `poster`
    /// attachment is uploaded and wins over `poster_url`.
    pub async fn add_movie(&self, form: FormSubmission) -> MovieResult<Movie> {
        let fields = MovieUpdate::from_form(&form).map_err(MovieError::Validation)?;
        let title = fields
            .title
            .clone()
            .ok_or_else(|| MovieError::Validation("Missing required field: title".into()))?;

        let id = Uuid::new_v4().to_string();
        let uploaded = match form.files.get("poster") {
            Some(file) => Some(
                self.upload_poster(file, &Uuid::new_v4().to_string())
                    .await?,
            ),
            None => None,
        };

        let movie = Movie {
            id,
            title,
            rating: fields.rating.unwrap_or(0.0),
            synopsis: fields.synopsis.unwrap_or_default(),
            year: fields.year,
            duration: fields.duration,
            director: fields.director,
            genre: fields.genre,
            cast: fields.cast.map(sqlx::types::Json),
            poster: uploaded.clone().or(fields.poster),
            created_at: Utc::now(),
            updated_at: None,
        };

        if let Err(err) = self.movies.put(&movie).await {
            if let Some(key) = uploaded {
                self.remove_poster(&key).await;
            }
            return Err(err.into());
        }

        info!(id = %movie.id, title = %movie.title, "added movie");
        Ok(movie)
    }

    /// Apply the non-empty fields of a submission to an existing movie.
    /// A replaced poster object is removed once the record points elsewhere.
    pub async fn update_movie(&self, id: &str, form: FormSubmission) -> MovieResult<Movie> {
        let previous = self
            .movies
            .get(id)
            .await?
            .ok_or_else(|| MovieError::NotFound(id.to_string()))?;

        let mut update = MovieUpdate::from_form(&form).map_err(MovieError::Validation)?;
        if let Some(file) = form.files.get("poster") {
            update.poster = Some(self.upload_poster(file, id).await?);
        }
        if update.is_empty() {
            return Err(MovieError::Validation("No fields to update".into()));
        }

        let movie = self
            .movies
            .update(id, &update, Utc::now())
            .await?
            .ok_or_else(|| MovieError::NotFound(id.to_string()))?;

        if let (Some(old), Some(new)) = (previous.poster.as_deref(), movie.poster.as_deref()) {
            let old_key = self.links.key_for(old);
            if old_key != self.links.key_for(new) {
                self.remove_poster(&old_key).await;
            }
        }

        info!(id = %movie.id, "updated movie");
        Ok(movie)
    }

    /// Delete a movie, then its poster. Poster cleanup never fails the call.
    pub async fn delete_movie(&self, id: &str) -> MovieResult<Movie> {
        let movie = self
            .movies
            .delete(id)
            .await?
            .ok_or_else(|| MovieError::NotFound(id.to_string()))?;

        if let Some(poster) = movie.poster.as_deref() {
            self.remove_poster(&self.links.key_for(poster)).await;
        }

        info!(id = %movie.id, "deleted movie");
        Ok(movie)
    }

    /// Issue a temporary link for an object key or URL.
    pub fn generate_link(&self, key_or_url: &str, expiration: Option<&str>) -> MovieResult<IssuedLink> {
        let key_or_url = key_or_url.trim();
        if key_or_url.is_empty() {
            return Err(MovieError::Validation("object key is required".into()));
        }
        Ok(self.links.issue(key_or_url, expiration)?)
    }

    /// Attach a poster link to a movie. A signing failure keeps the raw
    /// reference and affects only this record.
    fn decorate(&self, movie: Movie) -> MovieView {
        let poster_url = movie.poster.as_deref().map(|poster| {
            match self.links.issue(poster, None) {
                Ok(link) => link.url,
                Err(err) => {
                    warn!(id = %movie.id, poster, error = %err, "keeping original poster reference");
                    poster.to_string()
                }
            }
        });
        MovieView { movie, poster_url }
    }

    /// Upload a poster as `posters/<stem><ext>`, keeping the file extension.
    async fn upload_poster(&self, file: &FilePart, stem: &str) -> MovieResult<String> {
        let extension = Path::new(&file.filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();
        let key = format!("{}{}{}", POSTER_PREFIX, stem, extension);

        self.storage
            .put_object(&self.bucket, &key, file.content.clone(), &file.content_type)
            .await
            .map_err(MovieError::Upload)?;
        Ok(key)
    }

    async fn remove_poster(&self, key: &str) {
        if let Err(err) = self.storage.delete_object(&self.bucket, key).await {
            warn!(key, error = %err, "failed to delete poster");
        }
    }
}
