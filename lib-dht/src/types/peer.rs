//! Peer contacts
//!
//! A `PeerNode` is the routing table's view of a remote node: identity,
//! endpoint and liveness bookkeeping. Identity is the network id derived
//! from the peer's public key, so equality and hashing go through the id
//! alone.

use crate::error::Result;
use crate::types::network_id::NetworkId;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// A known remote peer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerNode {
    network_id: NetworkId,
    /// The peer's public key string
    pub public_key: String,
    /// The peer's software version
    pub version: String,
    /// Transport endpoint, e.g. `netstring://192.168.0.1:1908`
    pub uri: String,
    /// Timestamp of the last successful exchange (0 for never)
    pub last_seen: u64,
    /// Consecutive failed RPCs since the last success
    pub failed_rpcs: u32,
}

impl PeerNode {
    /// Create a contact, deriving its network id from the public key
    pub fn new(public_key: &str, version: &str, uri: &str, last_seen: u64) -> Result<Self> {
        Ok(Self {
            network_id: NetworkId::from_public_key(public_key)?,
            public_key: public_key.to_string(),
            version: version.to_string(),
            uri: uri.to_string(),
            last_seen,
            failed_rpcs: 0,
        })
    }

    /// Build a contact with a hand-picked id, bypassing key derivation
    ///
    /// Only for tests that need deterministic bucket placement.
    pub(crate) fn from_parts(
        network_id: NetworkId,
        public_key: &str,
        version: &str,
        uri: &str,
        last_seen: u64,
    ) -> Self {
        Self {
            network_id,
            public_key: public_key.to_string(),
            version: version.to_string(),
            uri: uri.to_string(),
            last_seen,
            failed_rpcs: 0,
        }
    }

    /// The peer's network id
    pub fn network_id(&self) -> &NetworkId {
        &self.network_id
    }

    /// Check whether this contact carries the given network id
    ///
    /// Routing table lookups key on ids rather than whole contacts, so this
    /// predicate is the single place id-to-peer matching happens.
    pub fn matches_id(&self, id: &NetworkId) -> bool {
        self.network_id == *id
    }

    /// Projection persisted by routing table dumps
    pub fn dump(&self) -> PeerDump {
        PeerDump {
            public_key: self.public_key.clone(),
            version: self.version.clone(),
            uri: self.uri.clone(),
        }
    }
}

impl PartialEq for PeerNode {
    fn eq(&self, other: &Self) -> bool {
        self.network_id == other.network_id
    }
}

impl Eq for PeerNode {}

impl Hash for PeerNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.network_id.hash(state);
    }
}

/// Persisted form of a contact: exactly what a fresh node needs to dial it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDump {
    pub public_key: String,
    pub version: String,
    pub uri: String,
}

impl PeerDump {
    /// Rehydrate into a contact with no liveness history
    pub fn to_peer(&self) -> Result<PeerNode> {
        PeerNode::new(&self.public_key, &self.version, &self.uri, 0)
    }
}
