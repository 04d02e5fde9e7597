//! Content-derived record identity
//!
//! Provides [`RecordIdentity`], a strongly-typed 32-byte Blake3 digest of a
//! record's canonical encoding. Two records are the same entity iff their
//! identities match.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A 32-byte record identity (Blake3)
///
/// Immutable and cheap to clone (Copy). Not a security primitive: it only
/// has to make accidental collisions between distinct records negligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordIdentity([u8; 32]);

impl RecordIdentity {
    /// Create identity from raw digest bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get reference to the underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create identity from byte slice
    ///
    /// # Errors
    /// Returns error if slice length is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdentityError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| IdentityError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Short string representation (first 16 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for RecordIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for RecordIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

impl serde::Serialize for RecordIdentity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for RecordIdentity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur when parsing record identities
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Invalid identity length
    #[error("invalid identity length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected byte count
        expected: usize,
        /// Actual byte count
        actual: usize,
    },

    /// Hex encoding error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Record;

    #[test]
    fn from_slice_invalid_length() {
        let result = RecordIdentity::from_slice(&[1u8; 31]);
        assert!(matches!(
            result,
            Err(IdentityError::InvalidLength {
                expected: 32,
                actual: 31
            })
        ));
    }

    #[test]
    fn display_and_parse() {
        let id = Record::new().with("type", "URI").identity();
        let parsed: RecordIdentity = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(id.to_string().starts_with(&id.short()));
        assert_eq!(id.short().len(), 16);
    }

    #[test]
    fn serde_as_hex_string() {
        let id = Record::new().with("type", "URI").identity();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json.len(), 66);
        let decoded: RecordIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(id, decoded);
    }
}
