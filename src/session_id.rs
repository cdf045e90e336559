//! Opaque session identifiers.

use crate::error::{Error, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};
use std::str::FromStr;

/// Unguessable token naming one session.
///
/// Drawn from the operating system's secure random source and rendered as
/// lowercase hex, so it can be embedded in a URL path as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Generate a token from `num_bytes` random bytes.
    pub fn generate(num_bytes: usize) -> Self {
        let mut bytes = vec![0u8; num_bytes];
        OsRng.fill_bytes(&mut bytes);

        let mut hex = String::with_capacity(num_bytes * 2);
        for b in &bytes {
            let _ = write!(hex, "{:02x}", b);
        }
        Self(hex)
    }

    /// Parse an externally supplied token.
    ///
    /// Only the shape is checked; whether a session exists is the
    /// registry's business.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() || s.len() % 2 != 0 {
            return Err(Error::not_found(format!("malformed session id '{}'", s)));
        }
        if !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(Error::not_found(format!("malformed session id '{}'", s)));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}
