/// Failure Detector
///
/// Counts RPC failures per peer as reported by the coordinator and the
/// handoff worker. A peer that fails `threshold` times in a row is marked
/// inactive and queued for health probing; a background task probes
/// quarantined peers until they answer again, then restores them.

use crate::ring::{HashRing, Node};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::info;

const PROBE_PAUSE: Duration = Duration::from_secs(1);

#[derive(Default)]
struct ProbeState {
    queue: VecDeque<Arc<Node>>,
    in_progress: HashSet<String>,
}

pub struct FailureDetector {
    ring: Arc<HashRing>,
    threshold: u32,
    err_counts: DashMap<String, u32>,
    probe: Mutex<ProbeState>,
    wakeup: Notify,
}

impl FailureDetector {
    pub fn new(ring: Arc<HashRing>, threshold: u32) -> Self {
        Self {
            ring,
            threshold,
            err_counts: DashMap::new(),
            probe: Mutex::new(ProbeState::default()),
            wakeup: Notify::new(),
        }
    }

    pub fn mark_success(&self, node_id: &str) {
        self.err_counts.insert(node_id.to_string(), 0);
    }

    /// Count one failure; at the threshold, quarantine the peer and hand it
    /// to the probe loop.
    pub fn mark_error(&self, node_id: &str) {
        let count = {
            let mut entry = self.err_counts.entry(node_id.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        if count < self.threshold {
            return;
        }

        // The probe lock is a leaf: the ring is read before it is taken.
        let Some(node) = self.ring.get_node(node_id) else {
            return;
        };

        {
            let mut probe = self.probe.lock();
            if probe.in_progress.contains(node_id) {
                return;
            }
            node.set_inactive();
            probe.in_progress.insert(node_id.to_string());
            probe.queue.push_back(node);
        }

        info!("marking node {} as failed, probing for recovery", node_id);
        self.wakeup.notify_one();
    }

    /// Number of consecutive failures currently recorded for a peer.
    pub fn error_count(&self, node_id: &str) -> u32 {
        self.err_counts.get(node_id).map(|c| *c).unwrap_or(0)
    }

    pub fn quarantined(&self, node_id: &str) -> bool {
        self.probe.lock().in_progress.contains(node_id)
    }

    fn pop_quarantined(&self) -> Option<Arc<Node>> {
        self.probe.lock().queue.pop_front()
    }

    fn restore(&self, node: &Arc<Node>) {
        let mut probe = self.probe.lock();
        probe.in_progress.remove(node.id());
        node.set_active();
    }

    fn requeue(&self, node: Arc<Node>) {
        self.probe.lock().queue.push_back(node);
    }

    /// Probe loop. Health checks run outside the queue lock; an unhealthy
    /// peer goes back to the tail. The pause keeps a persistently down peer
    /// from being hammered.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("starting failure detection probe loop");
            loop {
                let node = loop {
                    if *shutdown.borrow() {
                        return;
                    }
                    match self.pop_quarantined() {
                        Some(node) => break node,
                        None => {
                            tokio::select! {
                                _ = self.wakeup.notified() => {}
                                _ = shutdown.changed() => {}
                            }
                        }
                    }
                };

                let healthy = node.check_health().await;
                if healthy {
                    info!("node {} recovered, marking active", node.id());
                    self.restore(&node);
                } else {
                    self.requeue(node);
                }

                tokio::select! {
                    _ = tokio::time::sleep(PROBE_PAUSE) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }
}
