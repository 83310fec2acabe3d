//! Drogulus DHT core
//!
//! A federated, peer-to-peer key/value store organised as a Kademlia-style
//! distributed hash table in which every stored item is cryptographically
//! signed by its author. A node accepts lookups and stores from remote
//! peers, maintains a routing table of known peers, replicates its own
//! writes and refuses any item or frame whose signature does not verify.
//!
//! The wire transport is pluggable through [`dht::transport::Connector`];
//! signing and hashing come from `lib-crypto` and are treated as opaque.

pub mod config;
pub mod dht;
pub mod error;
pub mod types;
pub mod version;

// Re-export the public surface
pub use config::DhtConfig;
pub use dht::lookup::{Lookup, LookupKind, LookupResult};
pub use dht::messaging::{Frame, Payload};
pub use dht::network::{LocalIdentity, RpcService};
pub use dht::node::Node;
pub use dht::routing::{AddOutcome, RoutingTable, RoutingTableDump};
pub use dht::storage::{ItemStore, PutOutcome};
pub use dht::transport::{Connector, MemoryConnector, MemoryHub, NetstringConnector};
pub use error::{DhtError, Result};
pub use types::{construct_key, NetworkId, PeerDump, PeerNode, SignedItem};

/// Current wall-clock time in UNIX seconds
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
