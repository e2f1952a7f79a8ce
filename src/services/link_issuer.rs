//! Temporary download links with a bounded lifetime.
//!
//! The issuer accepts either a bare object key or a full object URL,
//! clamps the requested lifetime into the configured [`LinkPolicy`] and
//! asks a [`UrlSigner`] for the actual link.

use crate::services::storage_service::StorageError;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_LINK_SECONDS: u64 = 3600;
pub const MIN_LINK_SECONDS: u64 = 60;
pub const MAX_LINK_SECONDS: u64 = 604_800;
/// Upper limit for a configured maximum: ten years.
pub const LINK_SECONDS_CEILING: u64 = 10 * 365 * 86_400;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to generate a link for `{key}`: {source}")]
    Generation {
        key: String,
        #[source]
        source: StorageError,
    },
    #[error("invalid link policy: {0}")]
    InvalidPolicy(String),
}

/// Why a requested lifetime was replaced by the default.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifetimeError {
    #[error("`{0}` is not an integer number of seconds")]
    NotAnInteger(String),
}

/// Something that can mint a signed, time-limited GET link for an object.
pub trait UrlSigner: Send + Sync {
    fn sign_get_url(&self, bucket: &str, key: &str, lifetime_secs: u64) -> Result<String, StorageError>;
}

/// Lifetime bounds for issued links, fixed at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkPolicy {
    default_secs: u64,
    min_secs: u64,
    max_secs: u64,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            default_secs: DEFAULT_LINK_SECONDS,
            min_secs: MIN_LINK_SECONDS,
            max_secs: MAX_LINK_SECONDS,
        }
    }
}

impl LinkPolicy {
    /// Build a policy, rejecting bounds that would let the default escape
    /// `[min, max]` or push expiry times past [`LINK_SECONDS_CEILING`].
    pub fn new(default_secs: u64, min_secs: u64, max_secs: u64) -> Result<Self, LinkError> {
        if min_secs == 0 {
            return Err(LinkError::InvalidPolicy(
                "minimum lifetime must be at least one second".into(),
            ));
        }
        if max_secs > LINK_SECONDS_CEILING {
            return Err(LinkError::InvalidPolicy(format!(
                "maximum lifetime {}s exceeds the ceiling of {}s",
                max_secs, LINK_SECONDS_CEILING
            )));
        }
        if min_secs > max_secs {
            return Err(LinkError::InvalidPolicy(format!(
                "minimum lifetime {}s exceeds maximum {}s",
                min_secs, max_secs
            )));
        }
        if !(min_secs..=max_secs).contains(&default_secs) {
            return Err(LinkError::InvalidPolicy(format!(
                "default lifetime {}s is outside [{}s, {}s]",
                default_secs, min_secs, max_secs
            )));
        }
        Ok(Self {
            default_secs,
            min_secs,
            max_secs,
        })
    }

    pub fn default_secs(&self) -> u64 {
        self.default_secs
    }

    pub fn min_secs(&self) -> u64 {
        self.min_secs
    }

    pub fn max_secs(&self) -> u64 {
        self.max_secs
    }

    /// Lifetime to use for a request. Absent means default; a malformed
    /// value falls back to the default; integers are clamped.
    pub fn effective_secs(&self, requested: Option<&str>) -> u64 {
        match requested {
            None => self.default_secs,
            Some(raw) => match self.clamp_requested(raw) {
                Ok(secs) => secs,
                Err(err) => {
                    debug!(%err, default = self.default_secs, "using default link lifetime");
                    self.default_secs
                }
            },
        }
    }

    fn clamp_requested(&self, raw: &str) -> Result<u64, LifetimeError> {
        let trimmed = raw.trim();
        match trimmed.parse::<i64>() {
            Ok(secs) if secs <= self.min_secs as i64 => Ok(self.min_secs),
            Ok(secs) => Ok((secs as u64).min(self.max_secs)),
            // Integers too wide for i64 still clamp by sign.
            Err(_) if is_integer_literal(trimmed) => {
                if trimmed.starts_with('-') {
                    Ok(self.min_secs)
                } else {
                    Ok(self.max_secs)
                }
            }
            Err(_) => Err(LifetimeError::NotAnInteger(raw.to_string())),
        }
    }
}

fn is_integer_literal(value: &str) -> bool {
    let digits = value.strip_prefix(['+', '-']).unwrap_or(value);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// A minted link and the parameters it was minted with.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct IssuedLink {
    pub url: String,
    pub effective_seconds: u64,
    pub key: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Issues temporary links for objects in one bucket.
#[derive(Clone)]
pub struct LinkIssuer {
    signer: Arc<dyn UrlSigner>,
    bucket: String,
    policy: LinkPolicy,
}

impl LinkIssuer {
    pub fn new(signer: Arc<dyn UrlSigner>, bucket: impl Into<String>, policy: LinkPolicy) -> Self {
        Self {
            signer,
            bucket: bucket.into(),
            policy,
        }
    }

    /// Issue a link for `key_or_url`. Signing failures are returned, never
    /// papered over with a partial URL.
    pub fn issue(&self, key_or_url: &str, requested_secs: Option<&str>) -> Result<IssuedLink, LinkError> {
        let key = self.key_for(key_or_url);
        let lifetime = self.policy.effective_secs(requested_secs);

        let issued_at = Utc::now();
        let expires_at = i64::try_from(lifetime)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| issued_at.checked_add_signed(ttl))
            .ok_or_else(|| LinkError::Generation {
                key: key.clone(),
                source: StorageError::LifetimeOutOfRange(lifetime),
            })?;
        let url = self
            .signer
            .sign_get_url(&self.bucket, &key, lifetime)
            .map_err(|source| LinkError::Generation {
                key: key.clone(),
                source,
            })?;

        info!(
            key = %key,
            lifetime_secs = lifetime,
            issued_at = %issued_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            expires_at = %expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            "issued temporary link, valid until {}",
            expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        Ok(IssuedLink {
            url: normalize_url(url),
            effective_seconds: lifetime,
            key,
            issued_at,
            expires_at,
        })
    }

    /// The key in this bucket that `key_or_url` refers to. Links minted
    /// by this service (`.../objects/<bucket>/<key>`) resolve to `<key>`.
    pub fn key_for(&self, key_or_url: &str) -> String {
        let key = object_key(key_or_url);
        if key == key_or_url {
            return key;
        }
        let own_prefix = format!("objects/{}/", self.bucket);
        match key.strip_prefix(&own_prefix) {
            Some(rest) if !rest.is_empty() => percent_decode_str(rest).decode_utf8_lossy().into_owned(),
            _ => key,
        }
    }
}

/// The object key behind a reference: the raw path text of an `http(s)`
/// URL (without the leading slash or query), or the input itself.
fn object_key(key_or_url: &str) -> String {
    let is_web_url = matches!(
        Url::parse(key_or_url),
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host()
    );
    if !is_web_url {
        return key_or_url.to_string();
    }

    let after_scheme = key_or_url
        .split_once("://")
        .map_or(key_or_url, |(_, rest)| rest);
    let path = after_scheme
        .split_once('/')
        .map_or("", |(_, path)| path);
    let path = path.split_once('?').map_or(path, |(path, _)| path);
    if path.is_empty() {
        key_or_url.to_string()
    } else {
        path.to_string()
    }
}

/// Drop one trailing backslash and collapse doubled backslashes.
fn normalize_url(url: String) -> String {
    let trimmed = url.strip_suffix('\\').unwrap_or(&url);
    trimmed.replace("\\\\", "\\")
}
