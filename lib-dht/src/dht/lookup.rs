//! Iterative Kademlia lookup
//!
//! The lookup is a synchronous state machine: callers pull the next batch
//! of peers to probe, fire the RPCs however they like, and feed replies and
//! failures back in as events. The async driver in the node facade is one
//! such caller; tests drive the machine directly with synthetic replies.
//!
//! A node lookup converges on the closest probed peers; a value lookup
//! additionally tracks the freshest valid item seen and remembers the
//! closest responders that did not hold it, so the winning item can be
//! cached onto them afterwards.

use crate::error::{DhtError, Result};
use crate::types::{Distance, NetworkId, PeerNode, SignedItem};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Which question the lookup asks of each peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    /// `FIND_NODE`: converge on the closest peers to the target
    Node,
    /// `FIND_VALUE`: stop as soon as a fresh valid item turns up
    Value,
}

/// Outcome of a finished lookup
#[derive(Debug)]
pub enum LookupResult {
    /// Closest probed peers, distance ascending
    Nodes(Vec<PeerNode>),
    /// Winning item plus the closest responders to push a cache store to
    Value {
        item: SignedItem,
        cache_targets: Vec<PeerNode>,
    },
}

/// Iterative lookup state
#[derive(Debug)]
pub struct Lookup {
    target: NetworkId,
    kind: LookupKind,
    alpha: usize,
    capacity: usize,
    /// Candidates ordered by distance to the target, capped at `capacity`
    shortlist: Vec<PeerNode>,
    /// Ids ever handed out for probing
    probed: HashSet<NetworkId>,
    /// Ids whose probe failed; they never re-enter the shortlist
    failed: HashSet<NetworkId>,
    /// Outstanding probes and the contacts they went to
    outstanding: HashMap<NetworkId, PeerNode>,
    /// Best distance seen across all merged candidates
    closest_seen: Option<Distance>,
    /// Freshest valid item for the target (value lookups only)
    best_item: Option<SignedItem>,
    /// Responders that did not hold the value, for the cache store
    non_holders: Vec<PeerNode>,
}

impl Lookup {
    /// Seed a lookup from the closest known peers
    ///
    /// Fails with `NoPeers` when the routing table had nothing to offer.
    pub fn new(
        target: NetworkId,
        kind: LookupKind,
        seeds: Vec<PeerNode>,
        alpha: usize,
        capacity: usize,
    ) -> Result<Self> {
        if seeds.is_empty() {
            return Err(DhtError::NoPeers);
        }
        let mut lookup = Self {
            target,
            kind,
            alpha,
            capacity,
            shortlist: Vec::new(),
            probed: HashSet::new(),
            failed: HashSet::new(),
            outstanding: HashMap::new(),
            closest_seen: None,
            best_item: None,
            non_holders: Vec::new(),
        };
        lookup.merge(seeds);
        Ok(lookup)
    }

    /// The id this lookup converges towards
    pub fn target(&self) -> &NetworkId {
        &self.target
    }

    /// Peers to probe next, keeping at most `alpha` probes outstanding
    ///
    /// Returned peers are marked probed and outstanding. Once a value
    /// lookup holds an item it issues no further probes and just drains.
    pub fn next_probes(&mut self) -> Vec<PeerNode> {
        if self.kind == LookupKind::Value && self.best_item.is_some() {
            return Vec::new();
        }
        let mut batch = Vec::new();
        for peer in &self.shortlist {
            if self.outstanding.len() + batch.len() >= self.alpha {
                break;
            }
            if self.probed.contains(peer.network_id()) {
                continue;
            }
            batch.push(peer.clone());
        }
        for peer in &batch {
            self.probed.insert(*peer.network_id());
            self.outstanding.insert(*peer.network_id(), peer.clone());
        }
        batch
    }

    /// A peer answered with closer candidates but no value
    pub fn on_nodes(&mut self, from: &NetworkId, peers: Vec<PeerNode>) {
        if let Some(responder) = self.outstanding.remove(from) {
            if self.kind == LookupKind::Value {
                self.non_holders.push(responder);
            }
        }
        self.merge(peers);
    }

    /// A peer answered a value lookup with an item (and closer candidates)
    ///
    /// Only a valid item whose key matches the target competes; the freshest
    /// timestamp wins, ties broken by lexicographic signature.
    pub fn on_value(&mut self, from: &NetworkId, item: SignedItem, peers: Vec<PeerNode>) {
        self.outstanding.remove(from);

        if item.key == self.target.to_hex() && item.validate() {
            let wins = match &self.best_item {
                None => true,
                Some(held) => {
                    item.timestamp > held.timestamp
                        || (item.timestamp == held.timestamp && item.signature > held.signature)
                }
            };
            if wins {
                debug!(timestamp = item.timestamp, "value lookup found fresher item");
                self.best_item = Some(item);
            }
        }
        self.merge(peers);
    }

    /// A probe timed out or failed; the peer leaves the shortlist for good
    pub fn on_failure(&mut self, from: &NetworkId) {
        self.outstanding.remove(from);
        self.failed.insert(*from);
        self.shortlist.retain(|c| !c.matches_id(from));
    }

    /// Whether the lookup has converged
    ///
    /// A value lookup is done once an item is held and the in-flight tier
    /// has drained. Otherwise the lookup is done when nothing is in flight
    /// and every shortlist candidate has been probed; merging a closer
    /// candidate reopens the list, so this is exactly "no improvement over
    /// the closest B probed peers".
    pub fn is_complete(&self) -> bool {
        if !self.outstanding.is_empty() {
            return false;
        }
        if self.kind == LookupKind::Value && self.best_item.is_some() {
            return true;
        }
        self.shortlist
            .iter()
            .all(|c| self.probed.contains(c.network_id()))
    }

    /// Best distance merged so far, for convergence inspection
    pub fn closest_seen(&self) -> Option<&Distance> {
        self.closest_seen.as_ref()
    }

    /// Finish the lookup and take its result
    pub fn into_result(self) -> Result<LookupResult> {
        match self.kind {
            LookupKind::Node => {
                let probed = self.probed;
                let mut peers: Vec<PeerNode> = self
                    .shortlist
                    .into_iter()
                    .filter(|c| probed.contains(c.network_id()))
                    .collect();
                let target = self.target;
                peers.sort_by_key(|c| c.network_id().distance(&target));
                Ok(LookupResult::Nodes(peers))
            }
            LookupKind::Value => match self.best_item {
                Some(item) => {
                    let mut non_holders = self.non_holders;
                    let target = self.target;
                    non_holders.sort_by_key(|c| c.network_id().distance(&target));
                    non_holders.dedup_by(|a, b| a.network_id() == b.network_id());
                    non_holders.truncate(2);
                    Ok(LookupResult::Value {
                        item,
                        cache_targets: non_holders,
                    })
                }
                None => Err(DhtError::NotFound),
            },
        }
    }

    /// Fold candidates into the shortlist: dedup by id, keep the closest
    /// `capacity`, track the best distance seen
    fn merge(&mut self, peers: Vec<PeerNode>) {
        for peer in peers {
            if self.failed.contains(peer.network_id()) {
                continue;
            }
            if self
                .shortlist
                .iter()
                .any(|c| c.network_id() == peer.network_id())
            {
                continue;
            }
            let distance = peer.network_id().distance(&self.target);
            if self.closest_seen.map_or(true, |best| distance < best) {
                self.closest_seen = Some(distance);
            }
            self.shortlist.push(peer);
        }
        let target = self.target;
        self.shortlist
            .sort_by_key(|c| c.network_id().distance(&target));
        self.shortlist.truncate(self.capacity);
    }
}
