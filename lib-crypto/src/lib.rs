//! Drogulus Cryptography Module
//!
//! Signing, verification and hashing primitives consumed by the DHT layer.
//! Keys and signatures travel as hex strings so callers can treat them as
//! opaque values.

pub mod hashing;
pub mod keys;

// Re-export commonly used functions
pub use hashing::{sha512, sha512_hex, sha512_hex_multiple, sha512_multiple};
pub use keys::{generate_keypair, keypair_from_seed, sign, verify, CryptoError};
