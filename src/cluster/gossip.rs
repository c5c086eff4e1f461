/// Gossip-based Membership
///
/// Every node keeps a cluster map of id -> NodeState and periodically pushes
/// its whole view to a random handful of peers. Entries are versioned by a
/// per-node incarnation number: an update is adopted only when its
/// incarnation is strictly higher, which makes membership monotone and lets
/// a restarting node supersede its own shutdown announcement.
///
/// The local incarnation survives restarts in a small file; a node comes
/// back with a strictly higher number than anything it gossiped before.
///
/// Lock order: cluster state before ring. Ring mutation happens after the
/// state lock is released.

use crate::error::Result;
use crate::ring::{HashRing, Node};
use crate::storage::serializer::Serializer;
use futures::future::join_all;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Probability that a round also pushes to the bootstrap servers, so a node
/// whose known peers have all churned can still rejoin the cluster.
const BOOTSTRAP_RESCUE_PROBABILITY: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Active,
    Killed,
}

/// One membership entry as disseminated over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub id: String,
    pub address: String,
    pub port: u16,
    pub tokens: usize,
    pub status: NodeStatus,
    pub incarnation: u64,
}

pub type ClusterState = HashMap<String, NodeState>;

#[derive(Debug, Clone)]
pub struct GossipConfig {
    pub fanout: usize,
    pub interval: Duration,
    pub rpc_timeout: Duration,
    pub bootstrap_servers: Vec<(String, u16)>,
    pub incarnation_path: PathBuf,
}

enum RingAction {
    Add(NodeState),
    Remove(String),
}

pub struct Gossip {
    ring: Arc<HashRing>,
    local: Arc<Node>,
    state: Mutex<ClusterState>,
    config: GossipConfig,
}

impl Gossip {
    /// Reads the persisted incarnation counter (starting strictly above any
    /// previously persisted value) and seeds the cluster map with the local
    /// node.
    pub fn new(ring: Arc<HashRing>, local: Arc<Node>, config: GossipConfig) -> Self {
        let incarnation = std::fs::read_to_string(&config.incarnation_path)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|n| n + 1)
            .unwrap_or(1);

        info!(
            "gossip starting for {} with incarnation {}",
            local.id(),
            incarnation
        );

        let mut state = ClusterState::new();
        state.insert(
            local.id().to_string(),
            NodeState {
                id: local.id().to_string(),
                address: local.address().to_string(),
                port: local.port(),
                tokens: local.tokens(),
                status: NodeStatus::Active,
                incarnation,
            },
        );

        Self {
            ring,
            local,
            state: Mutex::new(state),
            config,
        }
    }

    pub fn incarnation(&self) -> u64 {
        self.state
            .lock()
            .get(self.local.id())
            .map(|s| s.incarnation)
            .unwrap_or(0)
    }

    /// Snapshot of the cluster map for the admin surface.
    pub fn cluster_state(&self) -> ClusterState {
        self.state.lock().clone()
    }

    fn serialized_state(&self) -> Result<Vec<u8>> {
        let state = self.state.lock();
        Serializer::to_binary(&*state)
    }

    /// Announce ourselves to the configured bootstrap servers, stopping at
    /// the first one that acks.
    pub async fn bootstrap(&self) {
        if self.config.bootstrap_servers.is_empty() {
            return;
        }
        let Ok(serialized) = self.serialized_state() else {
            warn!("failed to serialize cluster state for bootstrap");
            return;
        };

        for (host, port) in &self.config.bootstrap_servers {
            if format!("{}:{}", host, port) == self.local.id() {
                continue;
            }
            let seed = Node::new(host, *port, 0, self.config.rpc_timeout);
            if seed.send("/admin/gossip", serialized.clone()).await {
                info!("bootstrapped against {}", seed.id());
                return;
            }
        }
        warn!("no bootstrap server acknowledged; continuing standalone");
    }

    async fn send_to_bootstrap(&self, serialized: &[u8]) {
        let sends = self.config.bootstrap_servers.iter().map(|(host, port)| {
            let seed = Node::new(host, *port, 0, self.config.rpc_timeout);
            let body = serialized.to_vec();
            async move { seed.send("/admin/gossip", body).await }
        });
        join_all(sends).await;
    }

    /// One dissemination round: push the full cluster map to `fanout`
    /// randomly chosen live peers.
    pub async fn round(&self) {
        let (serialized, killed) = {
            let state = self.state.lock();
            let killed: HashSet<String> = state
                .values()
                .filter(|s| s.status == NodeStatus::Killed && s.id != self.local.id())
                .map(|s| s.id.clone())
                .collect();
            match Serializer::to_binary(&*state) {
                Ok(bytes) => (bytes, killed),
                Err(e) => {
                    warn!("failed to serialize cluster state: {}", e);
                    return;
                }
            }
        };

        let (picked, rescue) = {
            let mut rng = rand::rng();
            let mut pool: Vec<Arc<Node>> = self
                .ring
                .nodes()
                .into_iter()
                .filter(|n| !killed.contains(n.id()))
                .collect();
            pool.shuffle(&mut rng);
            pool.truncate(self.config.fanout);
            (pool, rng.random_bool(BOOTSTRAP_RESCUE_PROBABILITY))
        };

        let sends = picked
            .iter()
            .filter(|n| n.id() != self.local.id())
            .map(|node| {
                let body = serialized.clone();
                async move { (node.id().to_string(), node.send("/admin/gossip", body).await) }
            });

        for (id, ok) in join_all(sends).await {
            if !ok {
                error!("gossip request failing to node: {}", id);
            }
        }

        if rescue {
            debug!("gossip rescue round to bootstrap servers");
            self.send_to_bootstrap(&serialized).await;
        }
    }

    /// Merge a peer's view into ours. Entries win only on strictly higher
    /// incarnation; ties keep the resident entry. Ring membership follows
    /// the adopted status transitions.
    pub fn on_receive(&self, other: ClusterState) {
        let mut actions: Vec<RingAction> = Vec::new();

        {
            let mut state = self.state.lock();
            for (id, incoming) in other {
                let resident = state.get(&id).map(|e| (e.incarnation, e.status));
                match resident {
                    None => {
                        debug!("discovered node {} via gossip", id);
                        if incoming.status == NodeStatus::Active {
                            actions.push(RingAction::Add(incoming.clone()));
                        }
                        state.insert(id, incoming);
                    }
                    Some((incarnation, status)) if incoming.incarnation > incarnation => {
                        match (status, incoming.status) {
                            (NodeStatus::Active, NodeStatus::Killed) => {
                                info!("node {} shut down, removing from ring", id);
                                actions.push(RingAction::Remove(id.clone()));
                            }
                            (NodeStatus::Killed, NodeStatus::Active) => {
                                info!("node {} rejoined, re-adding to ring", id);
                                actions.push(RingAction::Add(incoming.clone()));
                            }
                            _ => {}
                        }
                        state.insert(id, incoming);
                    }
                    _ => {}
                }
            }
        }

        for action in actions {
            match action {
                RingAction::Add(entry) => {
                    let node = if entry.id == self.local.id() {
                        self.local.clone()
                    } else {
                        Arc::new(Node::new(
                            &entry.address,
                            entry.port,
                            entry.tokens,
                            self.config.rpc_timeout,
                        ))
                    };
                    self.ring.add_node(node);
                }
                RingAction::Remove(id) => self.ring.remove_node(&id),
            }
        }
    }

    /// Announce our own death: bump the incarnation, flip to KILLED, push
    /// one best-effort round, and persist the new incarnation for the next
    /// start.
    pub async fn shutdown(&self) -> Result<()> {
        let incarnation = {
            let mut state = self.state.lock();
            match state.get_mut(self.local.id()) {
                Some(entry) => {
                    entry.incarnation += 1;
                    entry.status = NodeStatus::Killed;
                    entry.incarnation
                }
                None => 0,
            }
        };

        self.round().await;

        std::fs::write(&self.config.incarnation_path, incarnation.to_string())?;
        info!(
            "gossip shutdown complete, persisted incarnation {}",
            incarnation
        );
        Ok(())
    }

    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("starting gossip background loop");
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.round().await,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("stopping gossip background loop");
                            return;
                        }
                    }
                }
            }
        })
    }
}
