//! Validated checksum newtypes.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Errors produced when a checksum string is not a SHA256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigestError {
    /// The hex portion is not 64 characters long.
    #[error("Invalid SHA256 digest: expected 64 hex characters, got {len} in '{input}'")]
    Length {
        /// Length of the offending hex portion.
        len: usize,
        /// The raw input.
        input: String,
    },

    /// The input contains characters outside `[0-9a-fA-F]`.
    #[error("Invalid SHA256 digest: contains non-hex characters in '{0}'")]
    NonHex(String),
}

/// A validated SHA256 digest (64 lowercase hex characters).
///
/// Checksums arrive from index lines, `.sha256` sidecar files and
/// manifests; validating at the boundary keeps malformed strings from
/// reaching comparison code, where they would only ever show up as a
/// confusing mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Create a new `Sha256Digest`, validating the input.
    ///
    /// Accepts strings with or without a `sha256:` prefix and normalizes
    /// to lowercase.
    pub fn new(s: impl Into<String>) -> Result<Self, DigestError> {
        let s = s.into();
        let hex = s.strip_prefix("sha256:").unwrap_or(&s);

        if hex.len() != 64 {
            return Err(DigestError::Length {
                len: hex.len(),
                input: s.clone(),
            });
        }

        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError::NonHex(s.clone()));
        }

        Ok(Self(hex.to_lowercase()))
    }

    /// Wrap raw digest bytes (as returned by a hasher).
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Get the digest as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Sha256Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl std::str::FromStr for Sha256Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl std::fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Sha256Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn accepts_prefixed_and_uppercase() {
        let d = Sha256Digest::new(format!("sha256:{}", HELLO.to_uppercase())).unwrap();
        assert_eq!(d.as_str(), HELLO);
    }

    #[test]
    fn rejects_short_and_non_hex() {
        assert!(matches!(
            Sha256Digest::new("abc"),
            Err(DigestError::Length { len: 3, .. })
        ));
        let bad = "g".repeat(64);
        assert!(matches!(Sha256Digest::new(bad), Err(DigestError::NonHex(_))));
    }

    #[test]
    fn from_bytes_is_lower_hex() {
        let d = Sha256Digest::from_bytes(&[0xAB; 32]);
        assert_eq!(d.as_str(), "ab".repeat(32));
    }

    #[test]
    fn deserialize_validates() {
        let ok: Result<Sha256Digest, _> = serde_json::from_str(&format!("\"{HELLO}\""));
        assert!(ok.is_ok());
        let bad: Result<Sha256Digest, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());
    }
}
