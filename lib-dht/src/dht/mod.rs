//! DHT subsystems
//!
//! Routing, storage, wire messaging, RPC correlation, iterative lookups,
//! transport and the node facade that composes them.

pub mod lookup;
pub mod messaging;
pub mod network;
pub mod node;
pub mod routing;
pub mod storage;
pub mod transport;

pub use lookup::{Lookup, LookupKind, LookupResult};
pub use messaging::{Frame, Payload};
pub use network::{LocalIdentity, RpcService};
pub use node::Node;
pub use routing::{AddOutcome, RoutingTable, RoutingTableDump};
pub use storage::{ItemStore, PutOutcome};
pub use transport::{Connector, MemoryConnector, MemoryHub, NetstringConnector};
