//! Wire messages
//!
//! Every frame on the wire is a JSON map carrying the sender's identity,
//! endpoint, software version, a fresh uuid and a signature. The signature
//! covers the canonical encoding of the whole frame minus the signature
//! field itself: JSON with lexicographically sorted keys at every level, so
//! independent implementations agree on the signed bytes bit-for-bit.

use crate::error::{DhtError, Result};
use crate::types::{NetworkId, PeerDump, SignedItem};
use crate::version;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Verb-specific payload of a frame
///
/// The `message` field on the wire names the verb.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message", rename_all = "snake_case")]
pub enum Payload {
    /// Liveness probe
    Ping,
    /// Liveness answer, also the acknowledgement for `store`
    Pong,
    /// Ask for the K closest peers to a target id
    FindNode { key: String },
    /// Ask for an item, falling back to closest peers
    FindValue { key: String },
    /// Closest-peer answer to `find_node` or a missing `find_value`
    Nodes { nodes: Vec<PeerDump> },
    /// Item answer to `find_value`; closer peers ride along
    ///
    /// The item nests under its own key so its `timestamp` and `signature`
    /// never collide with the frame's.
    Value {
        item: SignedItem,
        nodes: Vec<PeerDump>,
    },
    /// Push a signed item to the recipient
    Store { item: SignedItem },
    /// Reply error carrying a taxonomy code
    Error {
        code: u32,
        title: String,
        details: String,
    },
}

impl Payload {
    /// Build an `error` payload from an error kind
    pub fn from_error(err: &DhtError) -> Self {
        Payload::Error {
            code: err.wire_code(),
            title: err.title().to_string(),
            details: err.to_string(),
        }
    }
}

/// A signed frame as it travels between peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Fresh message id
    pub uuid: String,
    /// Uuid of the request this frame answers, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Network id of the intended recipient
    pub recipient: String,
    /// Sender's public key
    pub sender: String,
    /// Endpoint remote peers should use to reach the sender
    pub reply_port: String,
    /// Sender's software version
    pub version: String,
    #[serde(flatten)]
    pub payload: Payload,
    /// Wall-clock seconds at creation
    pub timestamp: u64,
    /// Signature over the canonical encoding of every other field
    pub signature: String,
}

impl Frame {
    /// Build an unsigned request frame
    pub fn new_request(
        recipient: &NetworkId,
        sender_public_key: &str,
        reply_port: &str,
        payload: Payload,
        now: u64,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            reply_to: None,
            recipient: recipient.to_hex(),
            sender: sender_public_key.to_string(),
            reply_port: reply_port.to_string(),
            version: version::get_version().to_string(),
            payload,
            timestamp: now,
            signature: String::new(),
        }
    }

    /// Build an unsigned reply to a request frame
    pub fn new_reply(
        request: &Frame,
        sender_public_key: &str,
        reply_port: &str,
        payload: Payload,
        now: u64,
    ) -> Result<Self> {
        let recipient = NetworkId::from_public_key(&request.sender)?;
        Ok(Self {
            uuid: Uuid::new_v4().to_string(),
            reply_to: Some(request.uuid.clone()),
            recipient: recipient.to_hex(),
            sender: sender_public_key.to_string(),
            reply_port: reply_port.to_string(),
            version: version::get_version().to_string(),
            payload,
            timestamp: now,
            signature: String::new(),
        })
    }

    /// Canonical byte encoding covered by the signature
    pub fn signable_bytes(&self) -> Result<Vec<u8>> {
        let mut value =
            serde_json::to_value(self).map_err(|e| DhtError::Crypto(e.to_string()))?;
        if let Some(map) = value.as_object_mut() {
            map.remove("signature");
        }
        serde_json::to_vec(&value).map_err(|e| DhtError::Crypto(e.to_string()))
    }

    /// Sign the frame with the sender's private key
    pub fn seal(mut self, private_key: &str) -> Result<Self> {
        let signable = self.signable_bytes()?;
        self.signature = lib_crypto::sign(private_key, &signable)?;
        Ok(self)
    }

    /// Check the frame's signature against its `sender` key
    pub fn verify(&self) -> bool {
        match self.signable_bytes() {
            Ok(signable) => lib_crypto::verify(&self.sender, &signable, &self.signature),
            Err(_) => false,
        }
    }

    /// Whether this frame answers an outstanding request
    pub fn is_reply(&self) -> bool {
        self.reply_to.is_some()
    }

    /// Serialize for the connector
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DhtError::Transport(e.to_string()))
    }

    /// Parse a frame off the connector; structurally invalid bytes are a
    /// transport error and the frame is dropped before any crypto runs
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| DhtError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_identity() -> (String, String, NetworkId) {
        let (pk, sk) = lib_crypto::generate_keypair();
        let id = NetworkId::from_public_key(&pk).unwrap();
        (pk, sk, id)
    }

    fn create_test_item(pk: &str, sk: &str) -> SignedItem {
        SignedItem::create("greeting", json!("hi"), pk, sk, 60, 1000).unwrap()
    }

    #[test]
    fn test_ping_frame_round_trip() {
        let (pk, sk, _) = create_test_identity();
        let (_, _, recipient) = create_test_identity();

        let frame = Frame::new_request(&recipient, &pk, "netstring://127.0.0.1:1908", Payload::Ping, 1000)
            .seal(&sk)
            .unwrap();

        let bytes = frame.to_bytes().unwrap();
        let parsed = Frame::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, frame);
        assert_eq!(parsed.payload, Payload::Ping);
        assert!(!parsed.is_reply());
    }

    #[test]
    fn test_wire_verb_names() {
        let (pk, sk, _) = create_test_identity();
        let (_, _, recipient) = create_test_identity();

        let cases = vec![
            (Payload::Ping, "ping"),
            (Payload::Pong, "pong"),
            (Payload::FindNode { key: recipient.to_hex() }, "find_node"),
            (Payload::FindValue { key: recipient.to_hex() }, "find_value"),
            (Payload::Nodes { nodes: vec![] }, "nodes"),
        ];

        for (payload, verb) in cases {
            let frame = Frame::new_request(&recipient, &pk, "netstring://127.0.0.1:1908", payload, 1000)
                .seal(&sk)
                .unwrap();
            let value: serde_json::Value =
                serde_json::from_slice(&frame.to_bytes().unwrap()).unwrap();
            assert_eq!(value["message"], verb);
        }
    }

    #[test]
    fn test_store_frame_carries_item() {
        let (pk, sk, _) = create_test_identity();
        let (_, _, recipient) = create_test_identity();
        let item = create_test_item(&pk, &sk);

        let frame = Frame::new_request(
            &recipient,
            &pk,
            "netstring://127.0.0.1:1908",
            Payload::Store { item: item.clone() },
            1000,
        )
        .seal(&sk)
        .unwrap();

        let value: serde_json::Value = serde_json::from_slice(&frame.to_bytes().unwrap()).unwrap();
        assert_eq!(value["message"], "store");
        assert_eq!(value["item"]["key"], item.key);
        assert_eq!(value["item"]["name"], "greeting");
        assert_eq!(value["item"]["value"], "hi");
        // The item's signature stays distinct from the frame's
        assert_eq!(value["item"]["signature"], item.signature);
        assert_eq!(value["signature"], frame.signature);

        let parsed = Frame::from_bytes(&frame.to_bytes().unwrap()).unwrap();
        match parsed.payload {
            Payload::Store { item: parsed_item } => assert_eq!(parsed_item, item),
            other => panic!("expected store payload, got {:?}", other),
        }
    }

    #[test]
    fn test_seal_and_verify() {
        let (pk, sk, _) = create_test_identity();
        let (_, _, recipient) = create_test_identity();

        let frame = Frame::new_request(&recipient, &pk, "netstring://127.0.0.1:1908", Payload::Ping, 1000)
            .seal(&sk)
            .unwrap();
        assert!(frame.verify());

        // Any mutated field breaks the signature
        let mut tampered = frame.clone();
        tampered.timestamp += 1;
        assert!(!tampered.verify());

        let mut tampered = frame.clone();
        tampered.reply_port = "netstring://evil:1".to_string();
        assert!(!tampered.verify());

        // A different sender key cannot claim the frame
        let (other_pk, _, _) = create_test_identity();
        let mut tampered = frame;
        tampered.sender = other_pk;
        assert!(!tampered.verify());
    }

    #[test]
    fn test_signable_bytes_exclude_signature() {
        let (pk, sk, _) = create_test_identity();
        let (_, _, recipient) = create_test_identity();

        let unsigned =
            Frame::new_request(&recipient, &pk, "netstring://127.0.0.1:1908", Payload::Ping, 1000);
        let sealed = unsigned.clone().seal(&sk).unwrap();

        assert_eq!(
            unsigned.signable_bytes().unwrap(),
            sealed.signable_bytes().unwrap()
        );
    }

    #[test]
    fn test_canonical_bytes_have_sorted_keys() {
        let (pk, sk, _) = create_test_identity();
        let (_, _, recipient) = create_test_identity();

        let frame = Frame::new_request(&recipient, &pk, "netstring://127.0.0.1:1908", Payload::Ping, 1000)
            .seal(&sk)
            .unwrap();
        let text = String::from_utf8(frame.signable_bytes().unwrap()).unwrap();

        let message = text.find("\"message\"").unwrap();
        let recipient_pos = text.find("\"recipient\"").unwrap();
        let sender = text.find("\"sender\"").unwrap();
        let timestamp = text.find("\"timestamp\"").unwrap();
        let uuid = text.find("\"uuid\"").unwrap();
        assert!(message < recipient_pos);
        assert!(recipient_pos < sender);
        assert!(sender < timestamp);
        assert!(timestamp < uuid);
    }

    #[test]
    fn test_reply_correlates_to_request() {
        let (pk_a, sk_a, _) = create_test_identity();
        let (pk_b, sk_b, id_b) = create_test_identity();

        let request = Frame::new_request(&id_b, &pk_a, "netstring://127.0.0.1:1908", Payload::Ping, 1000)
            .seal(&sk_a)
            .unwrap();
        let reply = Frame::new_reply(&request, &pk_b, "netstring://127.0.0.1:1909", Payload::Pong, 1001)
            .unwrap()
            .seal(&sk_b)
            .unwrap();

        assert!(reply.is_reply());
        assert_eq!(reply.reply_to.as_deref(), Some(request.uuid.as_str()));
        assert_eq!(
            reply.recipient,
            NetworkId::from_public_key(&pk_a).unwrap().to_hex()
        );
        assert!(reply.verify());
    }

    #[test]
    fn test_error_payload_round_trip() {
        let err = DhtError::InvalidItem("broken".into());
        let payload = Payload::from_error(&err);

        match &payload {
            Payload::Error { code, title, .. } => {
                assert_eq!(*code, err.wire_code());
                assert_eq!(title, "invalid item");
            }
            other => panic!("expected error payload, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_bytes_are_transport_errors() {
        assert!(matches!(
            Frame::from_bytes(b"not json at all"),
            Err(DhtError::Transport(_))
        ));
        assert!(matches!(
            Frame::from_bytes(b"{\"uuid\": 42}"),
            Err(DhtError::Transport(_))
        ));
    }
}
