//! Deterministic digests for change tracking.
//!
//! ## Digest Types
//!
//! - **Source hash**: SHA-256 of the raw source bytes. Identical files give
//!   identical snapshot hashes regardless of when they were imported.
//! - **Record hash**: SHA-256 over a row's semantic column values only.
//!   Callers never pass `snapshot_id` or surrogate keys, so identical
//!   logical rows in different snapshots hash identically.
//!
//! ## Encoding
//!
//! Each value is written as a one-byte type tag followed, for variable
//! length values, by a big-endian `u64` length and the payload. The
//! encoding is prefix-free, so `["ab", "c"]` and `["a", "bc"]` differ.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;

use crate::errors::{ExError, ExErrorKind, Result};
use crate::model::value::Value;

/// A SHA-256 digest
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 32]);

impl Digest {
    pub const LEN: usize = 32;

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Rebuild a digest from stored bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            ExError::new(ExErrorKind::Serialization)
                .with_op("digest_from_slice")
                .with_message(format!("expected {} digest bytes, got {}", Self::LEN, bytes.len()))
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        Digest::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Compute the source hash of raw file bytes.
pub fn source_hash(bytes: &[u8]) -> Digest {
    Digest(Sha256::digest(bytes).into())
}

/// Compute the record hash of a row's semantic column values.
///
/// Column order is significant; table maps always pass values in their
/// declared column order.
pub fn record_hash(values: &[Value]) -> Digest {
    let mut hasher = Sha256::new();
    for value in values {
        match value {
            Value::Null => hasher.update([0u8]),
            Value::Bool(b) => hasher.update([1u8, u8::from(*b)]),
            Value::Integer(i) => {
                hasher.update([2u8]);
                hasher.update(i.to_be_bytes());
            }
            Value::Text(s) => {
                hasher.update([3u8]);
                hasher.update((s.len() as u64).to_be_bytes());
                hasher.update(s.as_bytes());
            }
            Value::Bytes(b) => {
                hasher.update([4u8]);
                hasher.update((b.len() as u64).to_be_bytes());
                hasher.update(b);
            }
        }
    }
    Digest(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_hash_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            source_hash(b"abc").to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_record_hash_is_prefix_free() {
        let a = record_hash(&[Value::from("ab"), Value::from("c")]);
        let b = record_hash(&[Value::from("a"), Value::from("bc")]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_record_hash_distinguishes_null_from_empty_text() {
        assert_ne!(record_hash(&[Value::Null]), record_hash(&[Value::from("")]));
    }

    #[test]
    fn test_digest_round_trips_through_slice_and_serde() {
        let d = source_hash(b"plc");
        assert_eq!(Digest::from_slice(d.as_bytes()).unwrap(), d);
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(serde_json::from_str::<Digest>(&json).unwrap(), d);
    }

    #[test]
    fn test_digest_from_wrong_length_fails() {
        let err = Digest::from_slice(&[0u8; 4]).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::Serialization);
    }
}
