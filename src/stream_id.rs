//! Stream identifiers.
//!
//! An identifier keys exactly one live worker and doubles as the file stem of
//! the contact sheet, so it is restricted to `[A-Za-z0-9._-]`.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SupervisorError;

const MAX_LEN: usize = 64;
const HASH_CHARS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamId(String);

impl StreamId {
    /// Validate a caller-supplied identifier.
    pub fn new(id: impl Into<String>) -> Result<Self, SupervisorError> {
        let id = id.into();
        let dots_only = id.chars().all(|c| c == '.');
        if id.is_empty() || id.len() > MAX_LEN || dots_only || !id.chars().all(is_key_char) {
            return Err(SupervisorError::InvalidStreamId(id));
        }
        Ok(Self(id))
    }

    /// Derive an identifier from a stream address.
    ///
    /// The last path segment keeps ids readable; the hash suffix keeps
    /// `rtsp://a/cam` and `rtsp://b/cam` apart.
    pub fn from_address(address: &str) -> Self {
        let trimmed = address.split(['?', '#']).next().unwrap_or(address);
        let basename = trimmed
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default();

        let mut stem: String = basename
            .chars()
            .map(|c| if is_key_char(c) { c } else { '_' })
            .take(MAX_LEN - HASH_CHARS - 1)
            .collect();
        if stem.is_empty() || stem.chars().all(|c| c == '.') {
            stem = "stream".to_string();
        }

        let digest = Sha256::digest(address.as_bytes());
        let suffix = &hex::encode(digest)[..HASH_CHARS];
        Self(format!("{stem}-{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StreamId {
    type Error = SupervisorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StreamId> for String {
    fn from(id: StreamId) -> Self {
        id.0
    }
}
