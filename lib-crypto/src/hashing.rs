//! Hashing for Drogulus identifiers
//!
//! SHA-512 is the canonical hash for network ids and compound keys: the
//! 128-character lowercase hex digest addresses the whole 512-bit id space.

use sha2::{Digest, Sha512};

/// SHA-512 hash function
pub fn sha512(data: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash multiple data segments as one message
pub fn sha512_multiple(data_segments: &[&[u8]]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    for segment in data_segments {
        hasher.update(segment);
    }
    hasher.finalize().into()
}

/// SHA-512 hash as a lowercase hex digest
pub fn sha512_hex(data: &[u8]) -> String {
    hex::encode(sha512(data))
}

/// SHA-512 hex digest of multiple data segments hashed as one message
pub fn sha512_hex_multiple(data_segments: &[&[u8]]) -> String {
    hex::encode(sha512_multiple(data_segments))
}
