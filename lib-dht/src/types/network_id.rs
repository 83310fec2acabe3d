//! NetworkId - canonical 512-bit DHT routing address
//!
//! A network id is the SHA-512 digest of a peer's public key string. Two
//! peers presenting the same public key therefore share an id, and the id
//! space doubles as the key space: compound item keys are SHA-512 digests
//! too, so items and peers are ordered by the same XOR metric.

use crate::error::{DhtError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Size of a network id in bytes
pub const NETWORK_ID_BYTES: usize = 64;

/// Size of a network id in bits
pub const NETWORK_ID_BITS: u32 = 512;

/// Canonical 512-bit routing address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId([u8; NETWORK_ID_BYTES]);

/// XOR distance between two network ids
///
/// Byte arrays compare lexicographically, which for big-endian digests is
/// exactly unsigned 512-bit integer ordering: smaller is closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance([u8; NETWORK_ID_BYTES]);

impl NetworkId {
    /// Derive the network id of a public key
    ///
    /// Hashes the ASCII encoding of the key string with SHA-512. An empty
    /// key has no identity and is rejected.
    pub fn from_public_key(public_key: &str) -> Result<Self> {
        if public_key.is_empty() {
            return Err(DhtError::InvalidKey);
        }
        Ok(Self(lib_crypto::sha512(public_key.as_bytes())))
    }

    /// Parse a 128-character hex digest
    pub fn from_hex(digest: &str) -> Result<Self> {
        if digest.len() != 2 * NETWORK_ID_BYTES {
            return Err(DhtError::InvalidKey);
        }
        let decoded = hex::decode(digest).map_err(|_| DhtError::InvalidKey)?;
        let mut bytes = [0u8; NETWORK_ID_BYTES];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }

    /// Create from a raw 64-byte array
    pub fn from_bytes(bytes: [u8; NETWORK_ID_BYTES]) -> Self {
        Self(bytes)
    }

    /// Get reference to the underlying bytes
    pub fn as_bytes(&self) -> &[u8; NETWORK_ID_BYTES] {
        &self.0
    }

    /// Lowercase hex digest of this id
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// XOR distance to another id
    pub fn distance(&self, other: &NetworkId) -> Distance {
        let mut out = [0u8; NETWORK_ID_BYTES];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }

    /// Number of leading bits shared with another id (0..=512)
    ///
    /// Used by the routing table as the bucket depth of a contact.
    pub fn common_prefix_bits(&self, other: &NetworkId) -> u32 {
        let mut bits = 0;
        for i in 0..NETWORK_ID_BYTES {
            let diff = self.0[i] ^ other.0[i];
            if diff == 0 {
                bits += 8;
            } else {
                bits += diff.leading_zeros();
                break;
            }
        }
        bits
    }

    /// Value of the bit at `index`, most significant first
    pub fn bit(&self, index: u32) -> bool {
        let byte = (index / 8) as usize;
        let shift = 7 - (index % 8);
        (self.0[byte] >> shift) & 1 == 1
    }

    /// Set the bit at `index`, most significant first
    pub fn set_bit(&mut self, index: u32, value: bool) {
        let byte = (index / 8) as usize;
        let mask = 1u8 << (7 - (index % 8));
        if value {
            self.0[byte] |= mask;
        } else {
            self.0[byte] &= !mask;
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetworkId({}..)", &self.to_hex()[..16])
    }
}

impl Serialize for NetworkId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for NetworkId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let digest = String::deserialize(deserializer)?;
        NetworkId::from_hex(&digest).map_err(serde::de::Error::custom)
    }
}

impl Distance {
    /// The zero distance (an id's distance to itself)
    pub fn zero() -> Self {
        Distance([0u8; NETWORK_ID_BYTES])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_id_is_sha512_of_ascii_key() {
        let id = NetworkId::from_public_key("ABC").unwrap();
        let expected = lib_crypto::sha512_hex(b"ABC");

        assert_eq!(id.to_hex(), expected);
        assert_eq!(id.to_hex().len(), 128);
    }

    #[test]
    fn test_empty_key_is_rejected() {
        assert!(matches!(
            NetworkId::from_public_key(""),
            Err(DhtError::InvalidKey)
        ));
    }

    #[test]
    fn test_same_key_same_id() {
        let a = NetworkId::from_public_key("shared key").unwrap();
        let b = NetworkId::from_public_key("shared key").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_hex_round_trip() {
        let id = NetworkId::from_public_key("round trip").unwrap();
        let parsed = NetworkId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(NetworkId::from_hex("abc").is_err());
        assert!(NetworkId::from_hex(&"zz".repeat(64)).is_err());
    }

    #[test]
    fn test_distance_is_xor() {
        let a = NetworkId::from_bytes([0xAA; 64]);
        let b = NetworkId::from_bytes([0x0F; 64]);

        let d = a.distance(&b);
        assert_eq!(d, Distance([0xA5; 64]));

        // Symmetric, and zero to self
        assert_eq!(b.distance(&a), d);
        assert_eq!(a.distance(&a), Distance::zero());
    }

    #[test]
    fn test_distance_ordering_matches_integer_ordering() {
        let origin = NetworkId::from_bytes([0u8; 64]);

        let mut near = [0u8; 64];
        near[63] = 1;
        let mut far = [0u8; 64];
        far[0] = 1;

        let near_id = NetworkId::from_bytes(near);
        let far_id = NetworkId::from_bytes(far);

        assert!(origin.distance(&near_id) < origin.distance(&far_id));
    }

    #[test]
    fn test_common_prefix_bits() {
        let a = NetworkId::from_bytes([0u8; 64]);
        assert_eq!(a.common_prefix_bits(&a), 512);

        let mut flipped_first = [0u8; 64];
        flipped_first[0] = 0x80;
        assert_eq!(a.common_prefix_bits(&NetworkId::from_bytes(flipped_first)), 0);

        let mut flipped_mid = [0u8; 64];
        flipped_mid[1] = 0x10;
        assert_eq!(a.common_prefix_bits(&NetworkId::from_bytes(flipped_mid)), 11);
    }

    #[test]
    fn test_bit_accessors() {
        let mut id = NetworkId::from_bytes([0u8; 64]);
        assert!(!id.bit(0));

        id.set_bit(0, true);
        assert!(id.bit(0));
        assert_eq!(id.as_bytes()[0], 0x80);

        id.set_bit(11, true);
        assert!(id.bit(11));
        id.set_bit(11, false);
        assert!(!id.bit(11));
    }

    #[test]
    fn test_serde_as_hex_string() {
        let id = NetworkId::from_public_key("serde").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));

        let back: NetworkId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
