//! Local item store
//!
//! The node's authoritative map from compound key to signed item. Every
//! accepted item has a valid signature; for a contested key the record with
//! the highest timestamp wins, with ties broken by lexicographic signature
//! so replicas converge regardless of arrival order.

use crate::error::{DhtError, Result};
use crate::types::SignedItem;
use std::collections::HashMap;
use tracing::debug;

/// What happened to an item offered to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The item was inserted or replaced an older record
    Stored,
    /// A same-or-newer record is already held; nothing changed
    Stale,
}

#[derive(Debug, Clone)]
struct StoredRecord {
    item: SignedItem,
    /// Last time this record was handed out for republishing
    republished_at: u64,
}

/// Map from compound key to the freshest signed item seen for it
#[derive(Debug)]
pub struct ItemStore {
    items: HashMap<String, StoredRecord>,
    /// Public key of the local node, to pick out locally authored items
    local_public_key: String,
}

impl ItemStore {
    /// Create an empty store for a node identified by `local_public_key`
    pub fn new(local_public_key: &str) -> Self {
        Self {
            items: HashMap::new(),
            local_public_key: local_public_key.to_string(),
        }
    }

    /// Offer an item to the store
    ///
    /// Rejects items failing [`SignedItem::validate`] and items already
    /// expired at `now`. An item older than the held record for the same
    /// key (or identical to it) is a no-op reported as
    /// [`PutOutcome::Stale`].
    pub fn put(&mut self, item: SignedItem, now: u64) -> Result<PutOutcome> {
        if !item.validate() {
            return Err(DhtError::InvalidItem(format!(
                "signature or schema check failed for key {}",
                &item.key[..16.min(item.key.len())]
            )));
        }
        if item.is_expired(now) {
            return Err(DhtError::Expired);
        }

        if let Some(existing) = self.items.get(&item.key) {
            let held = &existing.item;
            let newer = item.timestamp > held.timestamp
                || (item.timestamp == held.timestamp && item.signature > held.signature);
            if !newer {
                return Ok(PutOutcome::Stale);
            }
        }

        debug!(key = %&item.key[..16], timestamp = item.timestamp, "storing item");
        self.items.insert(
            item.key.clone(),
            StoredRecord {
                item,
                republished_at: now,
            },
        );
        Ok(PutOutcome::Stored)
    }

    /// Get the item held for `key`, unless it has expired by `now`
    pub fn get(&self, key: &str, now: u64) -> Option<&SignedItem> {
        self.items
            .get(key)
            .map(|record| &record.item)
            .filter(|item| !item.is_expired(now))
    }

    /// Remove every expired item; returns the number removed
    pub fn sweep(&mut self, now: u64) -> usize {
        let before = self.items.len();
        self.items.retain(|_, record| !record.item.is_expired(now));
        let removed = before - self.items.len();
        if removed > 0 {
            debug!(removed, "swept expired items");
        }
        removed
    }

    /// Locally authored items due for republishing
    ///
    /// Returns every unexpired item whose author is the local public key and
    /// whose last republish was at least `interval` seconds ago, stamping
    /// their republish clock to `now`.
    pub fn items_to_republish(&mut self, now: u64, interval: u64) -> Vec<SignedItem> {
        let mut due = Vec::new();
        for record in self.items.values_mut() {
            if record.item.public_key == self.local_public_key
                && !record.item.is_expired(now)
                && now.saturating_sub(record.republished_at) >= interval
            {
                record.republished_at = now;
                due.push(record.item.clone());
            }
        }
        due
    }

    /// Number of held items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the store holds nothing
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_item(
        public_key: &str,
        private_key: &str,
        name: &str,
        ttl: u64,
        now: u64,
    ) -> SignedItem {
        SignedItem::create(name, json!("payload"), public_key, private_key, ttl, now).unwrap()
    }

    #[test]
    fn test_put_and_get() {
        let (pk, sk) = lib_crypto::generate_keypair();
        let mut store = ItemStore::new(&pk);

        let item = create_test_item(&pk, &sk, "greeting", 0, 1000);
        let outcome = store.put(item.clone(), 1000).unwrap();

        assert_eq!(outcome, PutOutcome::Stored);
        assert_eq!(store.get(&item.key, 1000), Some(&item));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_put_rejects_tampered_item() {
        let (pk, sk) = lib_crypto::generate_keypair();
        let mut store = ItemStore::new(&pk);

        let mut item = create_test_item(&pk, &sk, "greeting", 0, 1000);
        item.value = json!("forged");

        assert!(matches!(
            store.put(item, 1000),
            Err(DhtError::InvalidItem(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_put_rejects_expired_item() {
        let (pk, sk) = lib_crypto::generate_keypair();
        let mut store = ItemStore::new(&pk);

        let item = create_test_item(&pk, &sk, "greeting", 10, 1000);
        assert!(matches!(store.put(item, 2000), Err(DhtError::Expired)));
    }

    #[test]
    fn test_newest_timestamp_wins_regardless_of_arrival_order() {
        let (pk, sk) = lib_crypto::generate_keypair();
        let mut store = ItemStore::new(&pk);

        let old = create_test_item(&pk, &sk, "greeting", 0, 1000);
        let new = create_test_item(&pk, &sk, "greeting", 0, 2000);
        assert_eq!(old.key, new.key);

        // New first, old second: old is stale
        store.put(new.clone(), 2000).unwrap();
        assert_eq!(store.put(old.clone(), 2000).unwrap(), PutOutcome::Stale);
        assert_eq!(store.get(&new.key, 2000).unwrap().timestamp, 2000);

        // Old first, new second: new replaces
        let mut store = ItemStore::new(&pk);
        store.put(old, 2000).unwrap();
        assert_eq!(store.put(new.clone(), 2000).unwrap(), PutOutcome::Stored);
        assert_eq!(store.get(&new.key, 2000).unwrap().timestamp, 2000);
    }

    #[test]
    fn test_repeated_identical_put_is_stale() {
        let (pk, sk) = lib_crypto::generate_keypair();
        let mut store = ItemStore::new(&pk);

        let item = create_test_item(&pk, &sk, "greeting", 0, 1000);
        assert_eq!(store.put(item.clone(), 1000).unwrap(), PutOutcome::Stored);
        assert_eq!(store.put(item, 1000).unwrap(), PutOutcome::Stale);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_hides_expired_items() {
        let (pk, sk) = lib_crypto::generate_keypair();
        let mut store = ItemStore::new(&pk);

        // expires = 1001
        let item = create_test_item(&pk, &sk, "greeting", 1, 1000);
        store.put(item.clone(), 1000).unwrap();

        assert!(store.get(&item.key, 1000).is_some());
        assert!(store.get(&item.key, 1001).is_none());
    }

    #[test]
    fn test_sweep_removes_expired_only() {
        let (pk, sk) = lib_crypto::generate_keypair();
        let mut store = ItemStore::new(&pk);

        let short = create_test_item(&pk, &sk, "short-lived", 1, 1000);
        let forever = create_test_item(&pk, &sk, "forever", 0, 1000);
        store.put(short.clone(), 1000).unwrap();
        store.put(forever.clone(), 1000).unwrap();

        // At now + 0.5s nothing is swept; at now + 2s the short item goes
        assert_eq!(store.sweep(1000), 0);
        assert_eq!(store.sweep(1002), 1);
        assert!(store.get(&short.key, 1002).is_none());
        assert!(store.get(&forever.key, 1002).is_some());
    }

    #[test]
    fn test_items_to_republish_filters_by_author_and_interval() {
        let (local_pk, local_sk) = lib_crypto::generate_keypair();
        let (other_pk, other_sk) = lib_crypto::generate_keypair();
        let mut store = ItemStore::new(&local_pk);

        let mine = create_test_item(&local_pk, &local_sk, "mine", 0, 1000);
        let theirs = create_test_item(&other_pk, &other_sk, "theirs", 0, 1000);
        store.put(mine.clone(), 1000).unwrap();
        store.put(theirs, 1000).unwrap();

        // Not yet due
        assert!(store.items_to_republish(1500, 3600).is_empty());

        // Due: only the locally authored item comes back
        let due = store.items_to_republish(5000, 3600);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].key, mine.key);

        // The republish clock was stamped, so it is no longer due
        assert!(store.items_to_republish(5001, 3600).is_empty());
    }
}
