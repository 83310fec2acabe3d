//! DHT configuration
//!
//! All Kademlia parameters are carried in an explicit record passed at node
//! construction, never read from ambient state, so test suites can shrink
//! bucket sizes and timeouts freely.

use std::time::Duration;

/// Kademlia and maintenance parameters for a DHT node
#[derive(Debug, Clone)]
pub struct DhtConfig {
    /// K-bucket capacity (Kademlia K)
    pub k: usize,
    /// Concurrent outstanding RPCs per lookup (Kademlia alpha)
    pub alpha: usize,
    /// Lookup shortlist capacity (B)
    pub shortlist_size: usize,
    /// Number of peers a published item is replicated to
    pub duplication_count: usize,
    /// Default item TTL in seconds (0 means "no expiry")
    pub expiry_duration: u64,
    /// Deadline for a single outbound RPC
    pub rpc_timeout: Duration,
    /// Idle period after which a bucket is refreshed (seconds)
    pub refresh_interval: u64,
    /// Period between republishes of locally authored items (seconds)
    pub republish_interval: u64,
    /// Consecutive RPC failures before a peer is evicted
    pub failed_rpc_threshold: u32,
    /// Capacity of each bucket's replacement cache
    pub replacement_cache_size: usize,
    /// Tick period of the background maintenance loop
    pub maintenance_interval: Duration,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            k: 20,
            alpha: 3,
            shortlist_size: 20,
            duplication_count: 6,
            expiry_duration: 60 * 60 * 24 * 7,
            rpc_timeout: Duration::from_secs(5),
            refresh_interval: 60 * 60,
            republish_interval: 60 * 60 * 24,
            failed_rpc_threshold: 3,
            replacement_cache_size: 20,
            maintenance_interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_parameters() {
        let config = DhtConfig::default();

        assert_eq!(config.k, 20);
        assert_eq!(config.alpha, 3);
        assert_eq!(config.shortlist_size, 20);
        assert_eq!(config.duplication_count, 6);
        assert_eq!(config.rpc_timeout, Duration::from_secs(5));
        assert_eq!(config.refresh_interval, 3600);
        assert_eq!(config.republish_interval, 86400);
        assert_eq!(config.failed_rpc_threshold, 3);
    }
}
