//! DHT error taxonomy
//!
//! Every failure the core can produce is one of these kinds. RPC handlers
//! map a subset of them onto wire `error` replies, so each kind carries a
//! stable numeric code.

use thiserror::Error;

/// Errors produced by the DHT core
#[derive(Debug, Error)]
pub enum DhtError {
    /// A public key or network id failed structural validation
    #[error("invalid key")]
    InvalidKey,

    /// A signed item failed authenticity or schema checks
    #[error("invalid item: {0}")]
    InvalidItem(String),

    /// The item's expiry has already passed
    #[error("item expired")]
    Expired,

    /// An inbound frame's signature did not verify
    #[error("bad message signature")]
    BadSignature,

    /// The remote peer speaks an incompatible protocol version
    #[error("incompatible version: {0}")]
    IncompatibleVersion(String),

    /// The sender's public key is blacklisted
    #[error("sender refused")]
    Refused,

    /// An outstanding RPC hit its deadline
    #[error("rpc timed out")]
    Timeout,

    /// The operation was cancelled before completion
    #[error("cancelled")]
    Cancelled,

    /// The connector failed to deliver a frame
    #[error("transport error: {0}")]
    Transport(String),

    /// No peers were available to start the operation
    #[error("no peers available")]
    NoPeers,

    /// A value lookup converged without finding the item
    #[error("value not found")]
    NotFound,

    /// Every replica store failed
    #[error("replication failed: no peer acknowledged the store")]
    ReplicationFailed,

    /// The signing primitive failed
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl DhtError {
    /// Stable numeric code used by wire `error` replies
    pub fn wire_code(&self) -> u32 {
        match self {
            DhtError::InvalidKey => 1,
            DhtError::InvalidItem(_) => 2,
            DhtError::Expired => 3,
            DhtError::BadSignature => 4,
            DhtError::IncompatibleVersion(_) => 5,
            DhtError::Refused => 6,
            DhtError::Timeout => 7,
            DhtError::Cancelled => 8,
            DhtError::Transport(_) => 9,
            DhtError::NoPeers => 10,
            DhtError::NotFound => 11,
            DhtError::ReplicationFailed => 12,
            DhtError::Crypto(_) => 13,
        }
    }

    /// Short title for the wire `error` payload
    pub fn title(&self) -> &'static str {
        match self {
            DhtError::InvalidKey => "invalid key",
            DhtError::InvalidItem(_) => "invalid item",
            DhtError::Expired => "expired",
            DhtError::BadSignature => "bad signature",
            DhtError::IncompatibleVersion(_) => "incompatible version",
            DhtError::Refused => "refused",
            DhtError::Timeout => "timeout",
            DhtError::Cancelled => "cancelled",
            DhtError::Transport(_) => "transport error",
            DhtError::NoPeers => "no peers",
            DhtError::NotFound => "not found",
            DhtError::ReplicationFailed => "replication failed",
            DhtError::Crypto(_) => "crypto error",
        }
    }

    /// Rebuild an error kind from a wire `error` reply
    pub fn from_wire(code: u32, details: &str) -> Self {
        match code {
            1 => DhtError::InvalidKey,
            2 => DhtError::InvalidItem(details.to_string()),
            3 => DhtError::Expired,
            4 => DhtError::BadSignature,
            5 => DhtError::IncompatibleVersion(details.to_string()),
            6 => DhtError::Refused,
            7 => DhtError::Timeout,
            8 => DhtError::Cancelled,
            10 => DhtError::NoPeers,
            11 => DhtError::NotFound,
            12 => DhtError::ReplicationFailed,
            13 => DhtError::Crypto(details.to_string()),
            _ => DhtError::Transport(format!("unknown error code {}: {}", code, details)),
        }
    }
}

impl From<lib_crypto::CryptoError> for DhtError {
    fn from(e: lib_crypto::CryptoError) -> Self {
        DhtError::Crypto(e.to_string())
    }
}

/// Result alias used throughout the DHT core
pub type Result<T> = std::result::Result<T, DhtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes_round_trip() {
        let errors = [
            DhtError::InvalidKey,
            DhtError::InvalidItem("bad".into()),
            DhtError::Expired,
            DhtError::NotFound,
            DhtError::ReplicationFailed,
        ];

        for err in errors {
            let code = err.wire_code();
            let rebuilt = DhtError::from_wire(code, "bad");
            assert_eq!(rebuilt.wire_code(), code);
        }
    }

    #[test]
    fn test_unknown_code_maps_to_transport() {
        let err = DhtError::from_wire(999, "mystery");
        assert!(matches!(err, DhtError::Transport(_)));
    }
}
