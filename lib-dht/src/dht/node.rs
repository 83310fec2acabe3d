//! DHT node facade
//!
//! Composes the routing table, item store, RPC service and lookup engine
//! behind the public operations: `join`, `retrieve`, `set`, `replicate`,
//! `ping` and the inbound verb handlers. The node owns all mutable state;
//! the routing table and RPC layer never reach back into it.

use crate::config::DhtConfig;
use crate::dht::lookup::{Lookup, LookupKind, LookupResult};
use crate::dht::messaging::{Frame, Payload};
use crate::dht::network::{LocalIdentity, RpcService};
use crate::dht::routing::{AddOutcome, RoutingTable, RoutingTableDump};
use crate::dht::storage::ItemStore;
use crate::dht::transport::Connector;
use crate::error::{DhtError, Result};
use crate::types::{NetworkId, PeerDump, PeerNode, SignedItem};
use crate::unix_now;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// A node in the drogulus network
pub struct Node {
    config: DhtConfig,
    routing: Arc<RwLock<RoutingTable>>,
    store: Arc<RwLock<ItemStore>>,
    rpc: Arc<RpcService>,
    connector: Arc<dyn Connector>,
}

impl Node {
    /// Create a node from its keypair, connector and configuration
    pub fn new(
        public_key: &str,
        private_key: &str,
        connector: Arc<dyn Connector>,
        config: DhtConfig,
    ) -> Result<Arc<Self>> {
        let identity = LocalIdentity::new(public_key, private_key, &connector.local_uri())?;
        let routing = RoutingTable::new(identity.network_id, &config);
        let store = ItemStore::new(public_key);
        let rpc = RpcService::new(Arc::clone(&connector), identity, &config);

        Ok(Arc::new(Self {
            config,
            routing: Arc::new(RwLock::new(routing)),
            store: Arc::new(RwLock::new(store)),
            rpc: Arc::new(rpc),
            connector,
        }))
    }

    /// The local node's identity
    pub fn identity(&self) -> &LocalIdentity {
        self.rpc.identity()
    }

    /// The local node's network id
    pub fn network_id(&self) -> &NetworkId {
        &self.rpc.identity().network_id
    }

    /// Start the inbound dispatch and maintenance loops
    pub fn start(self: &Arc<Self>) {
        let node = Arc::clone(self);
        tokio::spawn(async move { node.receive_loop().await });
        let node = Arc::clone(self);
        tokio::spawn(async move { node.maintenance_loop().await });
    }

    /// Fail outstanding RPCs and stop accepting new work
    pub fn shutdown(&self) {
        self.rpc.cancel_all();
    }

    async fn receive_loop(self: Arc<Self>) {
        info!(uri = %self.connector.local_uri(), "node listening");
        loop {
            match self.connector.receive().await {
                Ok((bytes, from)) => {
                    let node = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = node.handle_raw(&bytes).await {
                            debug!(from = %from, error = %e, "dropped inbound frame");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "connector closed, stopping dispatch");
                    break;
                }
            }
        }
    }

    /// Decode and process one inbound frame
    pub async fn handle_raw(self: Arc<Self>, bytes: &[u8]) -> Result<()> {
        let frame = Frame::from_bytes(bytes)?;
        self.handle_frame(frame).await
    }

    /// Gate, learn from and dispatch one inbound frame
    pub async fn handle_frame(self: Arc<Self>, frame: Frame) -> Result<()> {
        {
            let routing = self.routing.read().await;
            match self.rpc.admit(&frame, &routing) {
                Ok(()) => {}
                Err(DhtError::BadSignature) => {
                    drop(routing);
                    // A forged frame permanently burns the claimed key
                    self.routing.write().await.blacklist(&frame.sender);
                    return Err(DhtError::BadSignature);
                }
                Err(e) => return Err(e),
            }
        }

        let now = unix_now();
        let sender = PeerNode::new(&frame.sender, &frame.version, &frame.reply_port, now)?;
        Self::observe_peer(&self, sender, now).await;

        if frame.is_reply() {
            self.rpc.resolve_reply(frame);
            return Ok(());
        }
        self.dispatch_request(frame, now).await
    }

    /// Feed a verified sender into the routing table
    ///
    /// A full bucket hands back its least-recently-seen head; the probe
    /// runs in the background so inbound dispatch never blocks on it.
    async fn observe_peer(node: &Arc<Self>, peer: PeerNode, now: u64) {
        let outcome = node.routing.write().await.add_contact(peer, now);
        if let AddOutcome::PingHead(head) = outcome {
            let node = Arc::clone(node);
            tokio::spawn(async move {
                let head_id = *head.network_id();
                match node.ping(&head).await {
                    Ok(()) => {
                        // The head is alive, so the cached newcomer loses
                        node.routing.write().await.remove_cached(&head_id);
                    }
                    Err(_) => {
                        let promoted = node.routing.write().await.remove(&head_id);
                        if promoted.is_some() {
                            debug!(head = %head_id, "evicted unresponsive bucket head");
                        }
                    }
                }
            });
        }
    }

    async fn dispatch_request(&self, frame: Frame, now: u64) -> Result<()> {
        match &frame.payload {
            Payload::Ping => self.rpc.reply(&frame, Payload::Pong).await,

            Payload::FindNode { key } => {
                let payload = match NetworkId::from_hex(key) {
                    Ok(target) => {
                        let mut routing = self.routing.write().await;
                        routing.touch_bucket(&target, now);
                        let nodes = routing
                            .find_close(&target, self.config.k)
                            .iter()
                            .map(PeerNode::dump)
                            .collect();
                        Payload::Nodes { nodes }
                    }
                    Err(e) => Payload::from_error(&e),
                };
                self.rpc.reply(&frame, payload).await
            }

            Payload::FindValue { key } => {
                let held = self.store.read().await.get(key, now).cloned();
                let payload = match held {
                    Some(item) => {
                        let nodes = match NetworkId::from_hex(key) {
                            Ok(target) => self
                                .routing
                                .read()
                                .await
                                .find_close(&target, self.config.k)
                                .iter()
                                .map(PeerNode::dump)
                                .collect(),
                            Err(_) => Vec::new(),
                        };
                        Payload::Value { item, nodes }
                    }
                    None => match NetworkId::from_hex(key) {
                        Ok(target) => {
                            let mut routing = self.routing.write().await;
                            routing.touch_bucket(&target, now);
                            let nodes = routing
                                .find_close(&target, self.config.k)
                                .iter()
                                .map(PeerNode::dump)
                                .collect();
                            Payload::Nodes { nodes }
                        }
                        Err(e) => Payload::from_error(&e),
                    },
                };
                self.rpc.reply(&frame, payload).await
            }

            Payload::Store { item } => {
                let outcome = self.store.write().await.put(item.clone(), now);
                let payload = match outcome {
                    // A stale duplicate is still acknowledged: the sender's
                    // goal (the item is held here) is met either way
                    Ok(_) => Payload::Pong,
                    Err(e) => {
                        debug!(error = %e, "rejecting inbound store");
                        Payload::from_error(&e)
                    }
                };
                self.rpc.reply(&frame, payload).await
            }

            // Reply verbs arriving without a reply_to have nothing waiting
            // on them; drop quietly
            _ => {
                debug!("ignoring non-request verb sent as request");
                Ok(())
            }
        }
    }

    /// Probe a peer's liveness
    pub async fn ping(&self, peer: &PeerNode) -> Result<()> {
        match self.rpc.call(peer, Payload::Ping).await {
            Ok(reply) => match reply.payload {
                Payload::Pong => {
                    self.routing
                        .write()
                        .await
                        .record_success(peer.network_id(), unix_now());
                    Ok(())
                }
                Payload::Error { code, details, .. } => {
                    self.note_failure(peer.network_id()).await;
                    Err(DhtError::from_wire(code, &details))
                }
                _ => {
                    self.note_failure(peer.network_id()).await;
                    Err(DhtError::Transport("unexpected reply verb to ping".into()))
                }
            },
            Err(e) => {
                self.note_failure(peer.network_id()).await;
                Err(e)
            }
        }
    }

    async fn note_failure(&self, id: &NetworkId) {
        if self.routing.write().await.record_failure(id) {
            info!(peer = %id, "peer evicted after repeated RPC failures");
        }
    }

    /// Join the network by pinging a dump of seed peers
    ///
    /// Responders land in the routing table via their verified replies; the
    /// node then looks up its own id to populate nearby buckets and runs a
    /// refresh lookup per bucket that is still short of contacts. Returns
    /// the number of seeds that answered.
    pub async fn join(&self, seeds: Vec<PeerDump>) -> Result<usize> {
        if seeds.is_empty() {
            return Err(DhtError::NoPeers);
        }

        let mut pings: JoinSet<bool> = JoinSet::new();
        for dump in &seeds {
            let peer = match dump.to_peer() {
                Ok(peer) => peer,
                Err(e) => {
                    warn!(uri = %dump.uri, error = %e, "skipping unusable seed");
                    continue;
                }
            };
            let rpc = Arc::clone(&self.rpc);
            pings.spawn(async move {
                matches!(
                    rpc.call(&peer, Payload::Ping).await,
                    Ok(reply) if matches!(reply.payload, Payload::Pong)
                )
            });
        }

        let mut responders = 0;
        while let Some(joined) = pings.join_next().await {
            if let Ok(true) = joined {
                responders += 1;
            }
        }
        if responders == 0 {
            return Err(DhtError::NoPeers);
        }
        info!(responders, "joined network");

        // Populate the neighbourhood around the local id
        let own_id = *self.network_id();
        if let Err(e) = self.run_lookup(own_id, LookupKind::Node).await {
            debug!(error = %e, "self lookup during join failed");
        }

        // One refresh lookup per bucket that is not yet full
        let targets = self.routing.read().await.refresh_targets_for_unfilled();
        for target in targets {
            if let Err(e) = self.run_lookup(target, LookupKind::Node).await {
                debug!(error = %e, "refresh lookup during join failed");
            }
        }
        Ok(responders)
    }

    /// Fetch the freshest item stored under a compound key
    ///
    /// Checks the local store first, then runs a value lookup; on success
    /// the item is cache-stored onto the closest responders that lacked it.
    pub async fn retrieve(&self, key: &str) -> Result<SignedItem> {
        let target = NetworkId::from_hex(key)?;
        let now = unix_now();

        let held = self.store.read().await.get(key, now).cloned();
        if let Some(item) = held {
            return Ok(item);
        }

        match self.run_lookup(target, LookupKind::Value).await? {
            LookupResult::Value {
                item,
                cache_targets,
            } => {
                for peer in cache_targets {
                    let rpc = Arc::clone(&self.rpc);
                    let cached = item.clone();
                    tokio::spawn(async move {
                        if rpc.call(&peer, Payload::Store { item: cached }).await.is_err() {
                            debug!(peer = %peer.network_id(), "cache store failed");
                        }
                    });
                }
                Ok(item)
            }
            LookupResult::Nodes(_) => Err(DhtError::NotFound),
        }
    }

    /// Sign a value under `key_name` and publish it to the network
    ///
    /// The item lands in the local store first, then replicates to the
    /// configured number of closest peers. Failure of every remote store
    /// surfaces as `ReplicationFailed`.
    pub async fn set(&self, key_name: &str, value: Value, ttl: u64) -> Result<Vec<PeerNode>> {
        let now = unix_now();
        let identity = self.rpc.identity();
        let item = SignedItem::create(
            key_name,
            value,
            &identity.public_key,
            &identity.private_key,
            ttl,
            now,
        )?;
        self.store.write().await.put(item.clone(), now)?;
        self.replicate(self.config.duplication_count, item).await
    }

    /// Store an item onto the `duplicate` closest peers to its key
    ///
    /// Succeeds with the acknowledging peers as long as at least one store
    /// went through.
    pub async fn replicate(&self, duplicate: usize, item: SignedItem) -> Result<Vec<PeerNode>> {
        let target = NetworkId::from_hex(&item.key)?;
        let peers = match self.run_lookup(target, LookupKind::Node).await? {
            LookupResult::Nodes(peers) => peers,
            LookupResult::Value { .. } => Vec::new(),
        };
        if peers.is_empty() {
            return Err(DhtError::NoPeers);
        }

        let mut stores: JoinSet<(PeerNode, Result<Frame>)> = JoinSet::new();
        for peer in peers.into_iter().take(duplicate) {
            let rpc = Arc::clone(&self.rpc);
            let replica = item.clone();
            stores.spawn(async move {
                let reply = rpc.call(&peer, Payload::Store { item: replica }).await;
                (peer, reply)
            });
        }

        let mut acks = Vec::new();
        while let Some(joined) = stores.join_next().await {
            let Ok((peer, outcome)) = joined else { continue };
            match outcome {
                Ok(reply) if matches!(reply.payload, Payload::Pong) => acks.push(peer),
                Ok(reply) => {
                    debug!(peer = %peer.network_id(), payload = ?reply.payload, "store rejected");
                    self.note_failure(peer.network_id()).await;
                }
                Err(e) => {
                    debug!(peer = %peer.network_id(), error = %e, "store failed");
                    self.note_failure(peer.network_id()).await;
                }
            }
        }

        if acks.is_empty() {
            return Err(DhtError::ReplicationFailed);
        }
        Ok(acks)
    }

    /// Persist the routing table for a later rejoin
    pub async fn dump_routing_table(&self) -> RoutingTableDump {
        self.routing.read().await.dump()
    }

    /// Drive one iterative lookup to convergence
    async fn run_lookup(&self, target: NetworkId, kind: LookupKind) -> Result<LookupResult> {
        let seeds = self
            .routing
            .read()
            .await
            .find_close(&target, self.config.alpha);
        let mut lookup = Lookup::new(
            target,
            kind,
            seeds,
            self.config.alpha,
            self.config.shortlist_size,
        )?;
        self.routing.write().await.touch_bucket(&target, unix_now());

        let mut probes: JoinSet<(NetworkId, Result<Frame>)> = JoinSet::new();
        loop {
            for peer in lookup.next_probes() {
                let rpc = Arc::clone(&self.rpc);
                let payload = match kind {
                    LookupKind::Node => Payload::FindNode {
                        key: target.to_hex(),
                    },
                    LookupKind::Value => Payload::FindValue {
                        key: target.to_hex(),
                    },
                };
                let id = *peer.network_id();
                probes.spawn(async move { (id, rpc.call(&peer, payload).await) });
            }

            if lookup.is_complete() && probes.is_empty() {
                break;
            }
            let Some(joined) = probes.join_next().await else {
                break;
            };
            let Ok((id, outcome)) = joined else { continue };

            match outcome {
                Ok(reply) => {
                    self.routing
                        .write()
                        .await
                        .record_success(&id, unix_now());
                    match reply.payload {
                        Payload::Nodes { nodes } => {
                            lookup.on_nodes(&id, self.rehydrate(nodes));
                        }
                        Payload::Value { item, nodes } => {
                            lookup.on_value(&id, item, self.rehydrate(nodes));
                        }
                        _ => lookup.on_failure(&id),
                    }
                }
                Err(e) => {
                    debug!(peer = %id, error = %e, "lookup probe failed");
                    self.note_failure(&id).await;
                    lookup.on_failure(&id);
                }
            }
        }
        lookup.into_result()
    }

    /// Turn advertised contacts into candidates, dropping the local node
    fn rehydrate(&self, dumps: Vec<PeerDump>) -> Vec<PeerNode> {
        let local = *self.network_id();
        dumps
            .iter()
            .filter_map(|dump| dump.to_peer().ok())
            .filter(|peer| !peer.matches_id(&local))
            .collect()
    }

    async fn maintenance_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.maintenance_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The immediate first tick would run maintenance on an empty node
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.run_maintenance().await;
        }
    }

    /// One maintenance pass: expiry sweep, republish, bucket refresh
    pub async fn run_maintenance(&self) {
        let now = unix_now();

        self.store.write().await.sweep(now);

        let due = self
            .store
            .write()
            .await
            .items_to_republish(now, self.config.republish_interval);
        for item in due {
            if let Err(e) = self.replicate(self.config.duplication_count, item).await {
                warn!(error = %e, "republish failed");
            }
        }

        let targets = self
            .routing
            .read()
            .await
            .buckets_needing_refresh(now, self.config.refresh_interval);
        for target in targets {
            if let Err(e) = self.run_lookup(target, LookupKind::Node).await {
                debug!(error = %e, "bucket refresh lookup failed");
            }
        }
    }
}
