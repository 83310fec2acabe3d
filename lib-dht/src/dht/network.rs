//! RPC request/reply plumbing
//!
//! `RpcService` owns the connector and a pending-reply registry keyed by
//! message uuid. Outbound calls register a oneshot slot, send the sealed
//! frame and wait under the configured deadline; inbound replies resolve
//! their slot by `reply_to`. Every failure path deregisters the slot, so
//! the registry drains itself.

use crate::config::DhtConfig;
use crate::dht::messaging::{Frame, Payload};
use crate::dht::routing::RoutingTable;
use crate::dht::transport::Connector;
use crate::error::{DhtError, Result};
use crate::types::{NetworkId, PeerNode};
use crate::unix_now;
use crate::version;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Keys and endpoint of the local node
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub public_key: String,
    pub private_key: String,
    pub network_id: NetworkId,
    pub uri: String,
}

impl LocalIdentity {
    /// Derive the local identity from a keypair and endpoint
    pub fn new(public_key: &str, private_key: &str, uri: &str) -> Result<Self> {
        Ok(Self {
            public_key: public_key.to_string(),
            private_key: private_key.to_string(),
            network_id: NetworkId::from_public_key(public_key)?,
            uri: uri.to_string(),
        })
    }
}

/// Request/reply correlation over a connector
pub struct RpcService {
    connector: Arc<dyn Connector>,
    identity: LocalIdentity,
    rpc_timeout: Duration,
    /// Outstanding requests by uuid
    pending: Mutex<HashMap<String, oneshot::Sender<Frame>>>,
}

impl RpcService {
    pub fn new(connector: Arc<dyn Connector>, identity: LocalIdentity, config: &DhtConfig) -> Self {
        Self {
            connector,
            identity,
            rpc_timeout: config.rpc_timeout,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// The local node's identity
    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    fn pending_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<Frame>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send a request and wait for its reply under the RPC deadline
    ///
    /// Timeouts, transport failures and cancellation all come back as their
    /// own error kinds; bumping the peer's failure count is the caller's
    /// business since the routing table lives there.
    pub async fn call(&self, peer: &PeerNode, payload: Payload) -> Result<Frame> {
        let frame = Frame::new_request(
            peer.network_id(),
            &self.identity.public_key,
            &self.identity.uri,
            payload,
            unix_now(),
        )
        .seal(&self.identity.private_key)?;

        let uuid = frame.uuid.clone();
        let (tx, rx) = oneshot::channel();
        self.pending_lock().insert(uuid.clone(), tx);

        if let Err(e) = self.connector.send(&peer.uri, &frame.to_bytes()?).await {
            self.pending_lock().remove(&uuid);
            return Err(e);
        }

        match timeout(self.rpc_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // The slot was dropped: the service is shutting down or the
            // surrounding lookup was cancelled
            Ok(Err(_)) => Err(DhtError::Cancelled),
            Err(_) => {
                self.pending_lock().remove(&uuid);
                debug!(peer = %peer.network_id(), uuid = %uuid, "rpc timed out");
                Err(DhtError::Timeout)
            }
        }
    }

    /// Send a sealed reply back to a request's `reply_port`
    pub async fn reply(&self, request: &Frame, payload: Payload) -> Result<()> {
        let frame = Frame::new_reply(
            request,
            &self.identity.public_key,
            &self.identity.uri,
            payload,
            unix_now(),
        )?
        .seal(&self.identity.private_key)?;
        self.connector.send(&request.reply_port, &frame.to_bytes()?).await
    }

    /// Route an inbound reply to the call waiting on it
    ///
    /// Returns the frame back when it is not a reply at all (a request the
    /// caller should dispatch); unmatched replies are dropped.
    pub fn resolve_reply(&self, frame: Frame) -> Option<Frame> {
        let Some(reply_to) = frame.reply_to.clone() else {
            return Some(frame);
        };
        match self.pending_lock().remove(&reply_to) {
            Some(slot) => {
                let _ = slot.send(frame);
                None
            }
            None => {
                warn!(reply_to = %reply_to, "dropping reply with no outstanding request");
                None
            }
        }
    }

    /// Gate an inbound frame before it reaches any handler
    ///
    /// Order matters: a blacklisted sender is refused before its signature
    /// is even looked at, and a bad signature is what earns the blacklist
    /// entry in the first place.
    pub fn admit(&self, frame: &Frame, routing: &RoutingTable) -> Result<()> {
        if routing.is_blacklisted(&frame.sender) {
            return Err(DhtError::Refused);
        }
        if !frame.verify() {
            return Err(DhtError::BadSignature);
        }
        if !version::is_compatible(&frame.version) {
            return Err(DhtError::IncompatibleVersion(frame.version.clone()));
        }
        Ok(())
    }

    /// Number of outstanding requests
    pub fn pending_count(&self) -> usize {
        self.pending_lock().len()
    }

    /// Fail every outstanding request with `Cancelled`
    pub fn cancel_all(&self) {
        self.pending_lock().clear();
    }
}
