//! Movie records kept in SQLite, addressed key-value style by `id`.

use crate::models::movie::{Movie, MovieUpdate};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite, types::Json};
use std::sync::Arc;

const MOVIE_COLUMNS: &str = "id, title, rating, synopsis, year, duration, director, genre, \
                             cast_members, poster, created_at, updated_at";

pub const MAX_PAGE_SIZE: usize = 1000;

#[derive(Clone, Debug)]
pub struct ScanParams {
    /// Resume after this id (exclusive).
    pub start_after: Option<String>,
    pub limit: usize,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            start_after: None,
            limit: MAX_PAGE_SIZE,
        }
    }
}

#[derive(Debug)]
pub struct ScanPage {
    pub movies: Vec<Movie>,
    /// Present when more records follow; pass back as `start_after`.
    pub next_token: Option<String>,
}

#[derive(Clone)]
pub struct MovieStore {
    db: Arc<SqlitePool>,
}

impl MovieStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn get(&self, id: &str) -> sqlx::Result<Option<Movie>> {
        sqlx::query_as::<_, Movie>(&format!("SELECT {} FROM movies WHERE id = ?", MOVIE_COLUMNS))
            .bind(id)
            .fetch_optional(&*self.db)
            .await
    }

    /// Insert a record, replacing any existing record with the same id.
    pub async fn put(&self, movie: &Movie) -> sqlx::Result<()> {
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO movies ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            MOVIE_COLUMNS
        ))
        .bind(&movie.id)
        .bind(&movie.title)
        .bind(movie.rating)
        .bind(&movie.synopsis)
        .bind(movie.year)
        .bind(movie.duration)
        .bind(&movie.director)
        .bind(&movie.genre)
        .bind(movie.cast.as_ref())
        .bind(&movie.poster)
        .bind(movie.created_at)
        .bind(movie.updated_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Apply `update` and stamp `updated_at`. Returns the updated record,
    /// or `None` if no record has this id.
    pub async fn update(
        &self,
        id: &str,
        update: &MovieUpdate,
        updated_at: DateTime<Utc>,
    ) -> sqlx::Result<Option<Movie>> {
        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE movies SET updated_at = ");
        builder.push_bind(updated_at);

        if let Some(title) = &update.title {
            builder.push(", title = ").push_bind(title.clone());
        }
        if let Some(rating) = update.rating {
            builder.push(", rating = ").push_bind(rating);
        }
        if let Some(synopsis) = &update.synopsis {
            builder.push(", synopsis = ").push_bind(synopsis.clone());
        }
        if let Some(year) = update.year {
            builder.push(", year = ").push_bind(year);
        }
        if let Some(duration) = update.duration {
            builder.push(", duration = ").push_bind(duration);
        }
        if let Some(director) = &update.director {
            builder.push(", director = ").push_bind(director.clone());
        }
        if let Some(genre) = &update.genre {
            builder.push(", genre = ").push_bind(genre.clone());
        }
        if let Some(cast) = &update.cast {
            builder.push(", cast_members = ").push_bind(Json(cast.clone()));
        }
        if let Some(poster) = &update.poster {
            builder.push(", poster = ").push_bind(poster.clone());
        }

        builder.push(" WHERE id = ").push_bind(id.to_string());
        builder.push(" RETURNING ").push(MOVIE_COLUMNS);

        builder.build_query_as().fetch_optional(&*self.db).await
    }

    /// Delete a record, returning it if it existed.
    pub async fn delete(&self, id: &str) -> sqlx::Result<Option<Movie>> {
        sqlx::query_as::<_, Movie>(&format!(
            "DELETE FROM movies WHERE id = ? RETURNING {}",
            MOVIE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await
    }

    /// One page of records in id order.
    ///
    /// Fetches one row past the page size to learn whether more remain.
    pub async fn scan(&self, params: ScanParams) -> sqlx::Result<ScanPage> {
        let limit = params.limit.clamp(1, MAX_PAGE_SIZE);
        let fetch_limit = limit + 1;

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT ");
        builder.push(MOVIE_COLUMNS).push(" FROM movies");
        if let Some(token) = params.start_after {
            builder.push(" WHERE id > ").push_bind(token);
        }
        builder.push(" ORDER BY id ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut movies: Vec<Movie> = builder.build_query_as().fetch_all(&*self.db).await?;

        let next_token = if movies.len() == fetch_limit {
            movies.pop();
            movies.last().map(|movie| movie.id.clone())
        } else {
            None
        };

        Ok(ScanPage { movies, next_token })
    }

    /// Every record, following continuation tokens until exhausted.
    pub async fn scan_all(&self) -> sqlx::Result<Vec<Movie>> {
        let mut params = ScanParams::default();
        let mut movies = Vec::new();
        loop {
            let page = self.scan(params.clone()).await?;
            movies.extend(page.movies);
            match page.next_token {
                Some(token) => params.start_after = Some(token),
                None => break,
            }
        }
        Ok(movies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    fn movie(id: &str, title: &str) -> Movie {
        Movie {
            id: id.to_string(),
            title: title.to_string(),
            rating: 7.5,
            synopsis: String::new(),
            year: Some(1999),
            duration: None,
            director: None,
            genre: None,
            cast: Some(Json(vec!["Keanu Reeves".to_string()])),
            poster: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn put_get_delete() {
        let store = MovieStore::new(test_support::pool().await);
        let matrix = movie("m-1", "The Matrix");

        store.put(&matrix).await.unwrap();
        let fetched = store.get("m-1").await.unwrap().unwrap();
        assert_eq!(fetched.title, "The Matrix");
        assert_eq!(fetched.cast, Some(Json(vec!["Keanu Reeves".to_string()])));

        let deleted = store.delete("m-1").await.unwrap().unwrap();
        assert_eq!(deleted.id, "m-1");
        assert!(store.get("m-1").await.unwrap().is_none());
        assert!(store.delete("m-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_touches_only_given_fields() {
        let store = MovieStore::new(test_support::pool().await);
        store.put(&movie("m-1", "The Matrix")).await.unwrap();

        let update = MovieUpdate {
            rating: Some(9.0),
            genre: Some("Sci-Fi".into()),
            cast: Some(vec!["Carrie-Anne Moss".into()]),
            ..Default::default()
        };
        let now = Utc::now();
        let updated = store.update("m-1", &update, now).await.unwrap().unwrap();

        assert_eq!(updated.title, "The Matrix");
        assert_eq!(updated.rating, 9.0);
        assert_eq!(updated.genre.as_deref(), Some("Sci-Fi"));
        assert_eq!(updated.year, Some(1999));
        assert_eq!(updated.cast, Some(Json(vec!["Carrie-Anne Moss".to_string()])));
        assert!(updated.updated_at.is_some());

        let missing = store.update("nope", &update, now).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn scan_pages_through_every_record() {
        let store = MovieStore::new(test_support::pool().await);
        for i in 0..5 {
            store.put(&movie(&format!("m-{}", i), "Film")).await.unwrap();
        }

        let first = store
            .scan(ScanParams {
                start_after: None,
                limit: 2,
            })
            .await
            .unwrap();
        assert_eq!(first.movies.len(), 2);
        assert_eq!(first.next_token.as_deref(), Some("m-1"));

        let second = store
            .scan(ScanParams {
                start_after: first.next_token,
                limit: 2,
            })
            .await
            .unwrap();
        let ids: Vec<_> = second.movies.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m-2", "m-3"]);

        let last = store
            .scan(ScanParams {
                start_after: second.next_token,
                limit: 2,
            })
            .await
            .unwrap();
        assert_eq!(last.movies.len(), 1);
        assert!(last.next_token.is_none());

        assert_eq!(store.scan_all().await.unwrap().len(), 5);
    }
}
