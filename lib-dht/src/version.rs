//! Protocol version gating
//!
//! Peers on a different major version speak an incompatible wire protocol
//! and are refused at the RPC gate.

/// The software version stamped on every outbound frame
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the local software version
pub fn get_version() -> &'static str {
    PROTOCOL_VERSION
}

/// Major component of a version string, if it parses
fn major(version: &str) -> Option<u64> {
    version.split('.').next()?.parse().ok()
}

/// Check whether a remote version is compatible with the local one
///
/// Compatibility is major-version equality; unparseable versions are
/// incompatible.
pub fn is_compatible(remote: &str) -> bool {
    match (major(PROTOCOL_VERSION), major(remote)) {
        (Some(local), Some(remote)) => local == remote,
        _ => false,
    }
}
