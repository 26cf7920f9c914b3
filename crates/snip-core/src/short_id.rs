use crate::error::CoreError;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// A content-derived identifier for a stored URL.
///
/// Ids produced by [`ShortIdGenerator`] are lowercase hex prefixes of the
/// URL's MD5 digest. Ids received from callers are taken as-is; a malformed
/// id simply never matches a stored record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortId(String);

impl ShortId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Generates the full shortened URL based on the provided base URL.
    pub fn to_url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.0)
    }
}

impl Display for ShortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShortId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ShortId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Derives a [`ShortId`] from the original URL.
///
/// `shortId = first N hex chars of MD5(url)`. The same URL always maps to
/// the same id, which is what makes repeated submissions idempotent. With
/// the default length of 4 the keyspace is only 65536 ids, so two distinct
/// URLs sharing an id is an expected event and backends must report it as a
/// conflict instead of overwriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortIdGenerator {
    length: usize,
}

impl ShortIdGenerator {
    pub const DEFAULT_LENGTH: usize = 4;
    /// Hex length of a full MD5 digest.
    pub const MAX_LENGTH: usize = 32;

    /// Creates a generator producing ids of `length` hex characters.
    pub fn new(length: usize) -> Result<Self, CoreError> {
        if length == 0 || length > Self::MAX_LENGTH {
            return Err(CoreError::InvalidIdLength {
                length,
                max: Self::MAX_LENGTH,
            });
        }
        Ok(Self { length })
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn generate(&self, url: &str) -> ShortId {
        let digest = Md5::digest(url.as_bytes());
        let mut encoded = hex::encode(digest);
        encoded.truncate(self.length);
        ShortId(encoded)
    }
}

impl Default for ShortIdGenerator {
    fn default() -> Self {
        Self {
            length: Self::DEFAULT_LENGTH,
        }
    }
}
