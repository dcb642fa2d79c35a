//! Client identity presented at connection time.
//!
//! A [`ClientIdentity`] is an opaque string chosen by the client (the `userId`
//! query parameter).  The server does not authenticate it and does not
//! enforce uniqueness across connections; it only rejects values that cannot
//! sensibly be used as a lock owner or printed in a log line.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest accepted identity, in bytes.
pub const MAX_IDENTITY_LEN: usize = 128;

/// Why an identity string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// No identity was supplied, or it was blank.
    #[error("client identity is missing")]
    Missing,

    /// The identity exceeds [`MAX_IDENTITY_LEN`] bytes.
    #[error("client identity is {0} bytes long (max {MAX_IDENTITY_LEN})")]
    TooLong(usize),

    /// The identity contains control characters.
    #[error("client identity contains control characters")]
    ControlCharacters,

    /// The identity starts or ends with whitespace.
    #[error("client identity has leading or trailing whitespace")]
    SurroundingWhitespace,
}

/// Opaque identity of a connected client; also the lock owner id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Validates `raw` and wraps it.
    ///
    /// The value is kept byte for byte; `" u1"` is not `"u1"`, so padded
    /// values are refused rather than normalised.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if the value is blank, padded with
    /// whitespace, too long, or contains control characters.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        if raw.trim().is_empty() {
            return Err(IdentityError::Missing);
        }
        if raw.len() > MAX_IDENTITY_LEN {
            return Err(IdentityError::TooLong(raw.len()));
        }
        if raw.chars().any(char::is_control) {
            return Err(IdentityError::ControlCharacters);
        }
        if raw.trim() != raw {
            return Err(IdentityError::SurroundingWhitespace);
        }
        Ok(Self(raw.to_string()))
    }

    /// Validates an optional raw value, treating `None` as missing.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Missing`] for `None`, otherwise as [`Self::parse`].
    pub fn from_optional(raw: Option<&str>) -> Result<Self, IdentityError> {
        raw.map_or(Err(IdentityError::Missing), Self::parse)
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ClientIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
