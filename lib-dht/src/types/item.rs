//! Signed items
//!
//! The authoritative record for a `(public_key, key_name)` pair. Items are
//! addressed by a compound key, signed by their author, and only ever
//! accepted after the signature and schema check out.

use crate::error::{DhtError, Result};
use crate::version;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Build the compound DHT key for an author's named item
///
/// `sha512(public_key ‖ key_name)` as a lowercase hex digest. The digest
/// lives in the same space as network ids, which is what lets lookups route
/// towards the peers closest to an item.
pub fn construct_key(public_key: &str, key_name: &str) -> String {
    lib_crypto::sha512_hex_multiple(&[public_key.as_bytes(), key_name.as_bytes()])
}

/// A signed, self-describing DHT record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedItem {
    /// Compound key: `sha512(public_key ‖ name)` hex digest
    pub key: String,
    /// Opaque payload
    pub value: Value,
    /// Creation time, UNIX seconds
    pub timestamp: u64,
    /// Absolute expiry, UNIX seconds (0 means "no expiry")
    pub expires: u64,
    /// Author's software version at creation time
    pub created_with: String,
    /// Author identity
    pub public_key: String,
    /// Meaningful key part
    pub name: String,
    /// Author's signature over the canonical item encoding
    pub signature: String,
}

impl SignedItem {
    /// Create and sign an item
    ///
    /// `ttl` of 0 means the item never expires; otherwise `expires` is
    /// `now + ttl`.
    pub fn create(
        key_name: &str,
        value: Value,
        public_key: &str,
        private_key: &str,
        ttl: u64,
        now: u64,
    ) -> Result<Self> {
        let expires = if ttl == 0 { 0 } else { now + ttl };
        let mut item = Self {
            key: construct_key(public_key, key_name),
            value,
            timestamp: now,
            expires,
            created_with: version::get_version().to_string(),
            public_key: public_key.to_string(),
            name: key_name.to_string(),
            signature: String::new(),
        };
        item.signature = lib_crypto::sign(private_key, &item.signable_bytes()?)?;
        Ok(item)
    }

    /// Canonical byte encoding covered by the signature
    ///
    /// A JSON object of `(created_with, expires, name, timestamp, value)`
    /// with lexicographically sorted keys; implementations must agree on
    /// this form bit-for-bit.
    pub fn signable_bytes(&self) -> Result<Vec<u8>> {
        let canonical = json!({
            "created_with": self.created_with,
            "expires": self.expires,
            "name": self.name,
            "timestamp": self.timestamp,
            "value": self.value,
        });
        serde_json::to_vec(&canonical).map_err(|e| DhtError::Crypto(e.to_string()))
    }

    /// Check authenticity and schema
    ///
    /// True iff the signature verifies under `public_key`, the compound key
    /// matches `(public_key, name)`, and the expiry is absent or after the
    /// creation time.
    pub fn validate(&self) -> bool {
        let signable = match self.signable_bytes() {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        lib_crypto::verify(&self.public_key, &signable, &self.signature)
            && self.key == construct_key(&self.public_key, &self.name)
            && (self.expires == 0 || self.expires > self.timestamp)
    }

    /// Whether the item's expiry has passed at `now`
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires != 0 && self.expires <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_item(key_name: &str, ttl: u64, now: u64) -> (SignedItem, String, String) {
        let (pk, sk) = lib_crypto::generate_keypair();
        let item =
            SignedItem::create(key_name, json!("hi"), &pk, &sk, ttl, now).unwrap();
        (item, pk, sk)
    }

    #[test]
    fn test_construct_key_is_sha512_of_concatenation() {
        let key = construct_key("ABC", "greeting");
        let expected = lib_crypto::sha512_hex(b"ABCgreeting");

        assert_eq!(key, expected);
        assert_eq!(key.len(), 128);
    }

    #[test]
    fn test_created_item_validates() {
        let (item, pk, _) = create_test_item("greeting", 60, 1000);

        assert!(item.validate());
        assert_eq!(item.key, construct_key(&pk, "greeting"));
        assert_eq!(item.timestamp, 1000);
        assert_eq!(item.expires, 1060);
        assert_eq!(item.name, "greeting");
        assert_eq!(item.value, json!("hi"));
    }

    #[test]
    fn test_zero_ttl_means_no_expiry() {
        let (item, _, _) = create_test_item("forever", 0, 1000);

        assert_eq!(item.expires, 0);
        assert!(item.validate());
        assert!(!item.is_expired(u64::MAX));
    }

    #[test]
    fn test_tampered_value_fails_validation() {
        let (mut item, _, _) = create_test_item("greeting", 60, 1000);

        item.value = json!("bye");
        assert!(!item.validate());
    }

    #[test]
    fn test_tampered_timestamp_fails_validation() {
        let (mut item, _, _) = create_test_item("greeting", 60, 1000);

        item.timestamp += 1;
        assert!(!item.validate());
    }

    #[test]
    fn test_wrong_compound_key_fails_validation() {
        let (mut item, pk, _) = create_test_item("greeting", 60, 1000);

        item.key = construct_key(&pk, "other-name");
        assert!(!item.validate());
    }

    #[test]
    fn test_foreign_signature_fails_validation() {
        let (item_a, _, _) = create_test_item("greeting", 60, 1000);
        let (mut item_b, _, _) = create_test_item("greeting", 60, 1000);

        item_b.signature = item_a.signature;
        assert!(!item_b.validate());
    }

    #[test]
    fn test_is_expired() {
        let (item, _, _) = create_test_item("greeting", 60, 1000);

        assert!(!item.is_expired(1000));
        assert!(!item.is_expired(1059));
        assert!(item.is_expired(1060));
        assert!(item.is_expired(2000));
    }

    #[test]
    fn test_signable_bytes_are_sorted_and_stable() {
        let (item, _, _) = create_test_item("greeting", 60, 1000);

        let bytes = item.signable_bytes().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();

        // Keys appear in lexicographic order
        let created = text.find("created_with").unwrap();
        let expires = text.find("expires").unwrap();
        let name = text.find("\"name\"").unwrap();
        let timestamp = text.find("timestamp").unwrap();
        let value = text.find("\"value\"").unwrap();
        assert!(created < expires && expires < name && name < timestamp && timestamp < value);

        // Stable across calls
        assert_eq!(bytes, item.signable_bytes().unwrap());
    }
}
