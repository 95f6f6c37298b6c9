//! Identifier types for vm2mqtt.
//!
//! This module provides the provider identity ([`ManagerKey`]) and the
//! broker-facing unit identifier ([`ExternalId`]).

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;

/// Identity of an inventory provider.
///
/// Derived from the provider's connection parameters so it stays stable for
/// the lifetime of the process, and across restarts with the same settings.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManagerKey(String);

impl ManagerKey {
    /// Create a `ManagerKey` from an already-derived string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Return the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ManagerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ManagerKey({})", self.0)
    }
}

impl fmt::Display for ManagerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ManagerKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A 20-byte broker-facing unit identifier, hex-encoded for display.
///
/// External IDs are the SHA-1 digest of a unit's unique key. No salt is
/// mixed in: the same unit maps to the same ID across restarts, so retained
/// messages and Home Assistant entities from an earlier run stay
/// addressable.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExternalId([u8; DIGEST_LEN]);

const DIGEST_LEN: usize = 20;

impl ExternalId {
    /// Digest length in bytes.
    pub const LEN: usize = DIGEST_LEN;

    /// Create a new `ExternalId` from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Compute the `ExternalId` for a unique key.
    #[must_use]
    pub fn for_key(unique_key: &str) -> Self {
        let mut bytes = [0u8; Self::LEN];
        bytes.copy_from_slice(&Sha1::digest(unique_key.as_bytes()));
        Self(bytes)
    }

    /// Parse an `ExternalId` from a hex-encoded string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex or not exactly 40 characters.
    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        let bytes = hex::decode(s).map_err(|_| IdError::InvalidHex)?;
        let arr: [u8; Self::LEN] = bytes.try_into().map_err(|_| IdError::InvalidLength {
            expected: Self::LEN,
            got: s.len() / 2,
        })?;
        Ok(Self(arr))
    }

    /// Return the underlying bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Return the hex-encoded string representation.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExternalId({})", self.to_hex())
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ExternalId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for ExternalId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<ExternalId> for String {
    fn from(id: ExternalId) -> Self {
        id.to_hex()
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input string contains invalid hexadecimal characters.
    #[error("invalid hex encoding")]
    InvalidHex,

    /// The input has an incorrect length.
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// The expected number of bytes.
        expected: usize,
        /// The actual number of bytes.
        got: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_id_deterministic() {
        let a = ExternalId::for_key("proxmox@pve/node1/lxc/100");
        let b = ExternalId::for_key("proxmox@pve/node1/lxc/100");
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 40);

        let c = ExternalId::for_key("proxmox@pve/node1/qemu/100");
        assert_ne!(a, c);
    }

    #[test]
    fn external_id_stable_value() {
        // Pinned: Home Assistant keeps entities keyed by this value.
        let id = ExternalId::for_key("abc");
        assert_eq!(id.to_hex(), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn external_id_hex_roundtrip() {
        let id = ExternalId::for_key("portainer--156908512/stack/3");
        let parsed: ExternalId = id.to_hex().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn external_id_invalid_hex() {
        assert!(matches!(
            ExternalId::from_hex("not-valid-hex"),
            Err(IdError::InvalidHex)
        ));
    }

    #[test]
    fn external_id_wrong_length() {
        assert!(matches!(
            ExternalId::from_hex("deadbeef"),
            Err(IdError::InvalidLength { expected: 20, got: 4 })
        ));
    }

    #[test]
    fn external_id_serde_json() {
        let id = ExternalId::for_key("key");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let parsed: ExternalId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn manager_key_serializes_as_string() {
        let key = ManagerKey::new("proxmox@pve.local");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"proxmox@pve.local\"");
    }
}
