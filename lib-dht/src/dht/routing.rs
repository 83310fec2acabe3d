//! Kademlia routing table
//!
//! K-buckets ordered by common-prefix depth against the local id. Bucket
//! `i` (for every `i` before the deepest) holds contacts whose common
//! prefix with the local id is exactly `i` bits; the deepest bucket holds
//! the remainder and is the only one that splits. Within a bucket contacts
//! are ordered by `last_seen` ascending, so the head is always the
//! least-recently-seen candidate for eviction probes.
//!
//! The table never talks to the network itself. When a full bucket cannot
//! absorb a newcomer, [`RoutingTable::add_contact`] parks it in the
//! bucket's replacement cache and hands the bucket head back to the caller
//! to ping; eviction of the head promotes the freshest cache entry.

use crate::config::DhtConfig;
use crate::types::network_id::NETWORK_ID_BITS;
use crate::types::{NetworkId, PeerDump, PeerNode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Result of offering a contact to the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// New contact appended to a bucket
    Added,
    /// Contact was already present; endpoint and liveness refreshed
    Updated,
    /// The contact's public key is blacklisted
    Refused,
    /// The contact is the local node itself
    Ignored,
    /// Bucket full: the newcomer was cached and the returned head should be
    /// pinged; evict it on failure to promote the newcomer
    PingHead(PeerNode),
}

#[derive(Debug)]
struct KBucket {
    /// Contacts ordered by `last_seen` ascending (head = least recent)
    contacts: Vec<PeerNode>,
    /// Replacement cache, LRU with the freshest entry at the tail
    cache: Vec<PeerNode>,
    /// Timestamp of the last insert, update or lookup touching this bucket
    last_activity: u64,
}

impl KBucket {
    fn new(now: u64) -> Self {
        Self {
            contacts: Vec::new(),
            cache: Vec::new(),
            last_activity: now,
        }
    }

    fn position(&self, id: &NetworkId) -> Option<usize> {
        self.contacts.iter().position(|c| c.matches_id(id))
    }
}

/// Persisted routing table state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingTableDump {
    pub contacts: Vec<PeerDump>,
    pub blacklist: Vec<String>,
}

/// Kademlia routing table with replacement caches and a blacklist
#[derive(Debug)]
pub struct RoutingTable {
    local_id: NetworkId,
    buckets: Vec<KBucket>,
    /// Public keys whose traffic is permanently refused
    blacklist: HashSet<String>,
    k: usize,
    cache_size: usize,
    failed_rpc_threshold: u32,
}

impl RoutingTable {
    /// Create a table centred on the local id
    pub fn new(local_id: NetworkId, config: &DhtConfig) -> Self {
        Self {
            local_id,
            buckets: vec![KBucket::new(crate::unix_now())],
            blacklist: HashSet::new(),
            k: config.k,
            cache_size: config.replacement_cache_size,
            failed_rpc_threshold: config.failed_rpc_threshold,
        }
    }

    /// The local node's id
    pub fn local_id(&self) -> &NetworkId {
        &self.local_id
    }

    fn bucket_index(&self, id: &NetworkId) -> usize {
        let prefix = self.local_id.common_prefix_bits(id) as usize;
        prefix.min(self.buckets.len() - 1)
    }

    /// Offer a contact to the table
    pub fn add_contact(&mut self, peer: PeerNode, now: u64) -> AddOutcome {
        if peer.matches_id(&self.local_id) {
            return AddOutcome::Ignored;
        }
        if self.blacklist.contains(&peer.public_key) {
            debug!(peer = %peer.network_id(), "refusing blacklisted contact");
            return AddOutcome::Refused;
        }

        let mut peer = peer;
        peer.last_seen = now;
        peer.failed_rpcs = 0;

        loop {
            let last = self.buckets.len() - 1;
            let idx = self.bucket_index(peer.network_id());

            {
                let k = self.k;
                let bucket = &mut self.buckets[idx];
                bucket.last_activity = now;

                if let Some(pos) = bucket.position(peer.network_id()) {
                    // Move to tail with refreshed endpoint and liveness
                    let mut existing = bucket.contacts.remove(pos);
                    existing.last_seen = now;
                    existing.failed_rpcs = 0;
                    existing.uri = peer.uri;
                    existing.version = peer.version;
                    bucket.contacts.push(existing);
                    return AddOutcome::Updated;
                }

                if bucket.contacts.len() < k {
                    bucket.contacts.push(peer);
                    return AddOutcome::Added;
                }
            }

            // The deepest bucket covers the local id's own neighbourhood and
            // may split; everywhere else the newcomer goes to the cache.
            if idx == last && self.buckets.len() <= NETWORK_ID_BITS as usize {
                self.split(now);
                continue;
            }

            let cache_size = self.cache_size;
            let bucket = &mut self.buckets[idx];
            bucket.cache.retain(|c| !c.matches_id(peer.network_id()));
            if bucket.cache.len() >= cache_size {
                bucket.cache.remove(0);
            }
            bucket.cache.push(peer);

            let head = bucket.contacts[0].clone();
            debug!(head = %head.network_id(), "bucket full, probing least-recently-seen head");
            return AddOutcome::PingHead(head);
        }
    }

    /// Split the deepest bucket along the next prefix bit
    fn split(&mut self, now: u64) {
        let depth = (self.buckets.len() - 1) as u32;
        let mut deeper = KBucket::new(now);

        let old = self.buckets.last_mut().expect("at least one bucket");
        let mut stay = Vec::new();
        for contact in old.contacts.drain(..) {
            if self.local_id.common_prefix_bits(contact.network_id()) > depth {
                deeper.contacts.push(contact);
            } else {
                stay.push(contact);
            }
        }
        old.contacts = stay;

        let mut stay_cache = Vec::new();
        for contact in old.cache.drain(..) {
            if self.local_id.common_prefix_bits(contact.network_id()) > depth {
                deeper.cache.push(contact);
            } else {
                stay_cache.push(contact);
            }
        }
        old.cache = stay_cache;

        debug!(depth = depth + 1, "split deepest bucket");
        self.buckets.push(deeper);
    }

    /// Remove a contact, promoting the freshest replacement-cache entry
    pub fn remove(&mut self, id: &NetworkId) -> Option<PeerNode> {
        let idx = self.bucket_index(id);
        let bucket = &mut self.buckets[idx];
        let pos = bucket.position(id)?;
        let removed = bucket.contacts.remove(pos);

        if let Some(promoted) = bucket.cache.pop() {
            debug!(promoted = %promoted.network_id(), "promoted contact from replacement cache");
            bucket.contacts.push(promoted);
        }
        Some(removed)
    }

    /// Drop a contact from a bucket's replacement cache
    ///
    /// Used when the bucket head answered its probe: the cached newcomer
    /// lost the race and is forgotten.
    pub fn remove_cached(&mut self, id: &NetworkId) {
        let idx = self.bucket_index(id);
        self.buckets[idx].cache.retain(|c| !c.matches_id(id));
    }

    /// Record a failed RPC against a contact
    ///
    /// Returns `true` when the failure crossed the threshold and the
    /// contact was evicted.
    pub fn record_failure(&mut self, id: &NetworkId) -> bool {
        let idx = self.bucket_index(id);
        let bucket = &mut self.buckets[idx];
        let Some(pos) = bucket.position(id) else {
            return false;
        };

        bucket.contacts[pos].failed_rpcs += 1;
        if bucket.contacts[pos].failed_rpcs >= self.failed_rpc_threshold {
            warn!(peer = %id, "evicting contact after repeated RPC failures");
            self.remove(id);
            return true;
        }
        false
    }

    /// Record a successful exchange with a contact
    pub fn record_success(&mut self, id: &NetworkId, now: u64) {
        let idx = self.bucket_index(id);
        let bucket = &mut self.buckets[idx];
        if let Some(pos) = bucket.position(id) {
            let mut contact = bucket.contacts.remove(pos);
            contact.last_seen = now;
            contact.failed_rpcs = 0;
            bucket.contacts.push(contact);
            bucket.last_activity = now;
        }
    }

    /// Up to `count` contacts closest to `target`, distance ascending
    pub fn find_close(&self, target: &NetworkId, count: usize) -> Vec<PeerNode> {
        let mut contacts: Vec<PeerNode> = self
            .buckets
            .iter()
            .flat_map(|b| b.contacts.iter().cloned())
            .collect();
        contacts.sort_by_key(|c| c.network_id().distance(target));
        contacts.truncate(count);
        contacts
    }

    /// Look up a contact by id
    pub fn get_contact(&self, id: &NetworkId) -> Option<&PeerNode> {
        let idx = self.bucket_index(id);
        let bucket = &self.buckets[idx];
        bucket.position(id).map(|pos| &bucket.contacts[pos])
    }

    /// Permanently refuse a public key and evict any matching contacts
    pub fn blacklist(&mut self, public_key: &str) {
        info!(public_key = %public_key, "blacklisting public key");
        self.blacklist.insert(public_key.to_string());
        for bucket in &mut self.buckets {
            bucket.contacts.retain(|c| c.public_key != public_key);
            bucket.cache.retain(|c| c.public_key != public_key);
        }
    }

    /// Whether a public key is blacklisted
    pub fn is_blacklisted(&self, public_key: &str) -> bool {
        self.blacklist.contains(public_key)
    }

    /// Mark a bucket as active after lookup traffic touched it
    pub fn touch_bucket(&mut self, id: &NetworkId, now: u64) {
        let idx = self.bucket_index(id);
        self.buckets[idx].last_activity = now;
    }

    /// Refresh targets for buckets idle for at least `interval` seconds
    ///
    /// Each target is a random id inside the idle bucket's range; looking it
    /// up repopulates that slice of the id space.
    pub fn buckets_needing_refresh(&self, now: u64, interval: u64) -> Vec<NetworkId> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, bucket)| now.saturating_sub(bucket.last_activity) >= interval)
            .map(|(idx, _)| self.random_id_in_bucket(idx))
            .collect()
    }

    /// Refresh targets for every bucket that is not yet full
    ///
    /// Used once after joining to fill in the freshly learned neighbourhood.
    pub fn refresh_targets_for_unfilled(&self) -> Vec<NetworkId> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, bucket)| bucket.contacts.len() < self.k)
            .map(|(idx, _)| self.random_id_in_bucket(idx))
            .collect()
    }

    /// Generate a random id falling inside the given bucket's range
    fn random_id_in_bucket(&self, idx: usize) -> NetworkId {
        let mut bytes = [0u8; 64];
        rand::thread_rng().fill_bytes(&mut bytes);
        let mut id = NetworkId::from_bytes(bytes);

        let depth = idx as u32;
        for i in 0..depth {
            id.set_bit(i, self.local_id.bit(i));
        }
        // Every bucket but the deepest holds an exact prefix length
        if idx < self.buckets.len() - 1 && depth < NETWORK_ID_BITS {
            id.set_bit(depth, !self.local_id.bit(depth));
        }
        id
    }

    /// Total number of routable contacts
    pub fn contact_count(&self) -> usize {
        self.buckets.iter().map(|b| b.contacts.len()).sum()
    }

    /// Total number of cached (non-routable) contacts
    pub fn cached_count(&self) -> usize {
        self.buckets.iter().map(|b| b.cache.len()).sum()
    }

    /// Number of buckets currently in the tree
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Largest bucket occupancy, for invariant checks
    pub fn max_bucket_len(&self) -> usize {
        self.buckets.iter().map(|b| b.contacts.len()).max().unwrap_or(0)
    }

    /// Persist contacts and blacklist for a later `join`
    pub fn dump(&self) -> RoutingTableDump {
        let contacts = self
            .buckets
            .iter()
            .flat_map(|b| b.contacts.iter().map(PeerNode::dump))
            .collect();
        let mut blacklist: Vec<String> = self.blacklist.iter().cloned().collect();
        blacklist.sort();
        RoutingTableDump {
            contacts,
            blacklist,
        }
    }
}
