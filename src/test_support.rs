//! Fixtures shared by the unit tests: an in-memory database with the schema
//! applied, object storage under a temp directory, and a wired-up service.

use crate::{
    db,
    services::{
        link_issuer::{LinkIssuer, LinkPolicy},
        movie_service::MovieService,
        movie_store::MovieStore,
        storage_service::StorageService,
    },
};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::sync::Arc;
use tempfile::TempDir;
use url::Url;

pub const BUCKET: &str = "cinedb-posters";
pub const PUBLIC_URL: &str = "http://localhost:8080";

/// A single-connection in-memory pool. The connection is never recycled,
/// so the database lives as long as the pool.
pub async fn pool() -> Arc<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    Arc::new(pool)
}

pub async fn storage() -> (StorageService, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageService::new(
        pool().await,
        dir.path(),
        Url::parse(PUBLIC_URL).unwrap(),
        b"test-signing-secret",
    )
    .unwrap();
    (storage, dir)
}

pub async fn service() -> (MovieService, TempDir) {
    service_with_policy(LinkPolicy::default()).await
}

pub async fn service_with_policy(policy: LinkPolicy) -> (MovieService, TempDir) {
    let (storage, dir) = storage().await;
    storage.ensure_bucket(BUCKET).await.unwrap();

    let movies = MovieStore::new(storage.db.clone());
    let links = LinkIssuer::new(Arc::new(storage.clone()), BUCKET, policy);
    (MovieService::new(movies, storage, links, BUCKET), dir)
}
