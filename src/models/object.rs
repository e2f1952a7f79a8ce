//! Represents a stored object (a poster image) inside the bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata for a single object. The payload bytes live on disk.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Object {
    /// Bucket the object belongs to.
    pub bucket: String,

    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Content type (MIME type) declared at upload.
    pub content_type: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Hex MD5 of the payload.
    pub etag: String,

    /// Timestamp when object was last written.
    pub last_modified: DateTime<Utc>,
}
