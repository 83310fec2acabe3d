//! Core DHT type definitions
//!
//! Network identifiers, peer contacts and signed items, shared by every
//! layer of the DHT core.

pub mod item;
pub mod network_id;
pub mod peer;

// Re-export commonly used types for convenience
pub use item::{construct_key, SignedItem};
pub use network_id::{Distance, NetworkId, NETWORK_ID_BITS, NETWORK_ID_BYTES};
pub use peer::{PeerDump, PeerNode};
