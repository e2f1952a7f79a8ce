//! src/services/storage_service.rs
//!
//! StorageService — poster object storage backed by SQLite for metadata
//! and local disk for payloads, sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`. It also mints and verifies
//! the HMAC-signed GET links that grant temporary access to those objects.

use crate::{models::object::Object, services::link_issuer::UrlSigner};
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use url::Url;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("link signature does not match")]
    InvalidSignature,
    #[error("link expired")]
    LinkExpired,
    #[error("link signing key is unusable")]
    InvalidSigningKey,
    #[error("link lifetime of {0}s runs past the representable time range")]
    LifetimeOutOfRange(u64),
    #[error("public base URL `{0}` cannot carry object paths")]
    InvalidPublicUrl(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// StorageService provides the object-store side of CineDB:
/// - Put an object (writes bytes to disk and upserts metadata into SQLite)
/// - Get object (reads metadata from SQLite and payload from disk)
/// - Delete object (removes metadata and the payload file)
/// - Sign / verify temporary GET links
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Externally reachable base URL that signed links are rooted at.
    public_url: Url,

    /// Keyed HMAC state for signed links, cloned per signature.
    mac: HmacSha256,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool and
    /// using `base_path` as the root directory for object payloads.
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        public_url: Url,
        signing_key: &[u8],
    ) -> StorageResult<Self> {
        if public_url.cannot_be_a_base() {
            return Err(StorageError::InvalidPublicUrl(public_url.to_string()));
        }
        let mac = HmacSha256::new_from_slice(signing_key)
            .map_err(|_| StorageError::InvalidSigningKey)?;
        Ok(Self {
            db,
            base_path: base_path.into(),
            public_url,
            mac,
        })
    }

    /// Rejects empty or oversized keys, keys that begin with `/` or
    /// contain `..`, and keys with control characters or backslashes.
    fn ensure_key_safe(key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// Enforces S3-like naming rules:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    pub fn ensure_bucket_name_safe(name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }

        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }

        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }

        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(invalid(
                "cannot contain consecutive dots or dot-hyphen combinations",
            ));
        }

        if is_ipv4_like(name) {
            return Err(invalid("must not be formatted like an IP address"));
        }

        Ok(())
    }

    /// Validate the bucket name and create its directory.
    pub async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        Self::ensure_bucket_name_safe(bucket)?;
        fs::create_dir_all(self.bucket_root(bucket)).await?;
        Ok(())
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Two-level shard identifiers: the first two bytes of MD5(bucket/key)
    /// as lowercase hex.
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_object(&self, bucket: &str, key: &str) -> StorageResult<Object> {
        sqlx::query_as::<_, Object>(
            "SELECT bucket, key, content_type, size_bytes, etag, last_modified
             FROM objects
             WHERE bucket = ? AND key = ?",
        )
        .bind(bucket)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    /// Write an object to disk and upsert its metadata.
    ///
    /// The payload goes to a temp file that is fsynced and then renamed
    /// into place; the temp file is removed on any failure. Overwrites an
    /// existing object with the same key.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        content: Bytes,
        content_type: &str,
    ) -> StorageResult<Object> {
        Self::ensure_key_safe(key)?;

        let file_path = self.object_path(bucket, key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        if let Err(err) = write_synced(&tmp_path, &content).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        let etag = format!("{:x}", md5::compute(&content));

        let upserted = sqlx::query_as::<_, Object>(
            r#"
            INSERT INTO objects (bucket, key, content_type, size_bytes, etag, last_modified)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING bucket, key, content_type, size_bytes, etag, last_modified
            "#,
        )
        .bind(bucket)
        .bind(key)
        .bind(content_type)
        .bind(content.len() as i64)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match upserted {
            Ok(object) => {
                debug!(bucket, key, size = object.size_bytes, "stored object");
                Ok(object)
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StorageError::Sqlx(err))
            }
        }
    }

    /// Fetch an object for reading: its metadata plus an open file handle.
    ///
    /// Returns ObjectNotFound if metadata exists but the payload is missing.
    pub async fn get_object_reader(&self, bucket: &str, key: &str) -> StorageResult<(Object, File)> {
        Self::ensure_key_safe(key)?;
        let object = self.fetch_object(bucket, key).await?;

        let file = File::open(self.object_path(bucket, key))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StorageError::ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    StorageError::Io(err)
                }
            })?;

        Ok((object, file))
    }

    /// Remove an object's metadata and payload, then prune empty shard
    /// directories.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<Object> {
        Self::ensure_key_safe(key)?;

        let object = sqlx::query_as::<_, Object>(
            "DELETE FROM objects WHERE bucket = ? AND key = ?
             RETURNING bucket, key, content_type, size_bytes, etag, last_modified",
        )
        .bind(bucket)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StorageError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;

        let file_path = self.object_path(bucket, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.bucket_root(bucket)).await;
        }

        Ok(object)
    }

    /// Check a signed link's expiry and signature.
    pub fn verify_signed_get(
        &self,
        bucket: &str,
        key: &str,
        expires: i64,
        signature: &str,
    ) -> StorageResult<()> {
        if expires < Utc::now().timestamp() {
            return Err(StorageError::LinkExpired);
        }
        let provided = hex::decode(signature).map_err(|_| StorageError::InvalidSignature)?;
        self.mac_for(bucket, key, expires)
            .verify_slice(&provided)
            .map_err(|_| StorageError::InvalidSignature)
    }

    fn mac_for(&self, bucket: &str, key: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(format!("GET\n{}\n{}\n{}", bucket, key, expires).as_bytes());
        mac
    }

    /// Recursively remove empty directories up to the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

impl UrlSigner for StorageService {
    /// `{public_url}/objects/{bucket}/{key}?expires={unix}&signature={hex}`
    fn sign_get_url(&self, bucket: &str, key: &str, lifetime_secs: u64) -> StorageResult<String> {
        Self::ensure_key_safe(key)?;
        let expires = i64::try_from(lifetime_secs)
            .ok()
            .and_then(|secs| Utc::now().timestamp().checked_add(secs))
            .ok_or(StorageError::LifetimeOutOfRange(lifetime_secs))?;
        let signature = hex::encode(self.mac_for(bucket, key, expires).finalize().into_bytes());

        let mut url = self.public_url.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::InvalidPublicUrl(self.public_url.to_string()))?
            .pop_if_empty()
            .push("objects")
            .push(bucket)
            .extend(key.split('/'));
        url.query_pairs_mut()
            .clear()
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &signature);

        Ok(url.to_string())
    }
}

async fn write_synced(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(content).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let (storage, _dir) = test_support::storage().await;

        let stored = storage
            .put_object("posters", "posters/1.jpg", Bytes::from_static(b"\x01\x02\x03"), "image/jpeg")
            .await
            .unwrap();
        assert_eq!(stored.size_bytes, 3);
        assert_eq!(stored.content_type, "image/jpeg");
        assert_eq!(stored.etag, format!("{:x}", md5::compute(b"\x01\x02\x03")));

        let (meta, mut file) = storage.get_object_reader("posters", "posters/1.jpg").await.unwrap();
        let mut content = Vec::new();
        file.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"\x01\x02\x03");
        assert_eq!(meta.key, "posters/1.jpg");

        storage.delete_object("posters", "posters/1.jpg").await.unwrap();
        let missing = storage.get_object_reader("posters", "posters/1.jpg").await;
        assert!(matches!(missing, Err(StorageError::ObjectNotFound { .. })));

        let again = storage.delete_object("posters", "posters/1.jpg").await;
        assert!(matches!(again, Err(StorageError::ObjectNotFound { .. })));
    }

    #[tokio::test]
    async fn put_overwrites_existing_object() {
        let (storage, _dir) = test_support::storage().await;

        storage
            .put_object("posters", "a.png", Bytes::from_static(b"old"), "image/png")
            .await
            .unwrap();
        let updated = storage
            .put_object("posters", "a.png", Bytes::from_static(b"newer"), "image/webp")
            .await
            .unwrap();

        assert_eq!(updated.size_bytes, 5);
        assert_eq!(updated.content_type, "image/webp");
    }

    #[tokio::test]
    async fn unsafe_keys_are_rejected() {
        let (storage, _dir) = test_support::storage().await;
        for key in ["", "/abs.png", "../escape.png", "a\\b.png"] {
            let result = storage
                .put_object("posters", key, Bytes::from_static(b"x"), "image/png")
                .await;
            assert!(matches!(result, Err(StorageError::InvalidObjectKey)), "key {:?}", key);
            assert!(storage.sign_get_url("posters", key, 60).is_err());
        }
    }

    #[tokio::test]
    async fn signed_links_verify_until_tampered() {
        let (storage, _dir) = test_support::storage().await;

        let link = storage.sign_get_url("posters", "posters/a b.jpg", 60).unwrap();
        let url = Url::parse(&link).unwrap();
        assert_eq!(url.path(), "/objects/posters/posters/a%20b.jpg");

        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        let expires: i64 = query["expires"].parse().unwrap();
        let signature = &query["signature"];

        storage
            .verify_signed_get("posters", "posters/a b.jpg", expires, signature)
            .unwrap();

        let wrong_key = storage.verify_signed_get("posters", "posters/other.jpg", expires, signature);
        assert!(matches!(wrong_key, Err(StorageError::InvalidSignature)));

        let stretched = storage.verify_signed_get("posters", "posters/a b.jpg", expires + 1, signature);
        assert!(matches!(stretched, Err(StorageError::InvalidSignature)));

        let garbage = storage.verify_signed_get("posters", "posters/a b.jpg", expires, "zz");
        assert!(matches!(garbage, Err(StorageError::InvalidSignature)));
    }

    #[tokio::test]
    async fn oversized_lifetimes_are_refused() {
        let (storage, _dir) = test_support::storage().await;
        for secs in [i64::MAX as u64 - 1000, u64::MAX] {
            let result = storage.sign_get_url("posters", "a.jpg", secs);
            assert!(matches!(result, Err(StorageError::LifetimeOutOfRange(s)) if s == secs));
        }
    }

    #[tokio::test]
    async fn expired_links_are_rejected() {
        let (storage, _dir) = test_support::storage().await;
        let past = Utc::now().timestamp() - 10;
        let result = storage.verify_signed_get("posters", "a.jpg", past, "00");
        assert!(matches!(result, Err(StorageError::LinkExpired)));
    }

    #[test]
    fn bucket_names_follow_s3_rules() {
        for ok in ["cinedb-posters", "cinedb-bucket-2025", "a.b.c"] {
            assert!(StorageService::ensure_bucket_name_safe(ok).is_ok(), "{}", ok);
        }
        for bad in ["ab", "Upper", "-lead", "trail.", "a..b", "a-.b", "192.168.1.1", "has space"] {
            assert!(StorageService::ensure_bucket_name_safe(bad).is_err(), "{}", bad);
        }
    }
}
