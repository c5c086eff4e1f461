/// Hinted Handoff Queue
///
/// When a primary replica is unreachable, a fallback custodian accepts the
/// write together with a hint naming the intended target. The hint lands in
/// a durable queue keyed by the original key; a background worker replays
/// queued values until every target has taken delivery.
///
/// The queue stores one record per key: the set of node ids still awaiting
/// delivery plus the latest handed-off value. Successive handoffs for the
/// same key union the targets and overwrite the value; receivers reconcile
/// idempotently via vector clocks, so at-least-once replay is safe.

use crate::cluster::failure::FailureDetector;
use crate::clock::Value;
use crate::error::Result;
use crate::ring::HashRing;
use crate::storage::engine::StorageEngine;
use crate::storage::serializer::Serializer;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandoffRecord {
    /// Node ids still awaiting delivery, in arrival order.
    pub targets: Vec<String>,
    /// Latest value handed off for this key.
    pub data: Value,
}

pub struct HandoffQueue {
    engine: Arc<dyn StorageEngine>,
    // Serializes read-modify-write cycles on individual records.
    lock: Mutex<()>,
}

impl HandoffQueue {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self {
            engine,
            lock: Mutex::new(()),
        }
    }

    /// Record that `target` still needs `value` for `key`. Targets are
    /// de-duplicated; the stored value is always the most recent one.
    pub fn append(&self, key: &str, target: &str, value: &Value) -> Result<()> {
        let _guard = self.lock.lock();

        let bytes = self.engine.get(key.as_bytes())?.unwrap_or_default();
        let mut record: HandoffRecord = Serializer::from_binary_or_default(&bytes)?;

        if !record.targets.iter().any(|t| t == target) {
            record.targets.push(target.to_string());
        }
        record.data = value.clone();

        self.engine
            .put(key.as_bytes(), &Serializer::to_binary(&record)?)?;
        Ok(())
    }

    /// Point-in-time snapshot of every pending record.
    pub fn records(&self) -> Result<Vec<(String, HandoffRecord)>> {
        let mut out = Vec::new();
        for (key, bytes) in self.engine.scan()? {
            match Serializer::from_binary::<HandoffRecord>(&bytes) {
                Ok(record) => out.push((String::from_utf8_lossy(&key).into_owned(), record)),
                Err(e) => warn!("skipping undecodable handoff record: {}", e),
            }
        }
        Ok(out)
    }

    /// Remove delivered targets from a record; delete the record once no
    /// targets remain. Re-reads under the lock so appends that raced the
    /// replay sweep are preserved.
    pub fn settle(&self, key: &str, delivered: &[String]) -> Result<()> {
        if delivered.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock();

        let Some(bytes) = self.engine.get(key.as_bytes())? else {
            return Ok(());
        };
        let mut record: HandoffRecord = Serializer::from_binary(&bytes)?;
        record.targets.retain(|t| !delivered.contains(t));

        if record.targets.is_empty() {
            self.engine.delete(key.as_bytes())?;
        } else {
            self.engine
                .put(key.as_bytes(), &Serializer::to_binary(&record)?)?;
        }
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.engine.scan()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Background replay of queued handoffs.
pub struct HandoffWorker {
    queue: Arc<HandoffQueue>,
    ring: Arc<HashRing>,
    detector: Arc<FailureDetector>,
    interval: Duration,
}

impl HandoffWorker {
    pub fn new(
        queue: Arc<HandoffQueue>,
        ring: Arc<HashRing>,
        detector: Arc<FailureDetector>,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            ring,
            detector,
            interval,
        }
    }

    /// One replay sweep over a snapshot of the queue.
    pub async fn replay_once(&self) {
        let records = match self.queue.records() {
            Ok(r) => r,
            Err(e) => {
                warn!("handoff sweep failed to read queue: {}", e);
                return;
            }
        };

        for (key, record) in records {
            let mut delivered = Vec::new();

            for target in &record.targets {
                let Some(node) = self.ring.get_node(target) else {
                    continue;
                };
                if !node.is_active() {
                    continue;
                }

                debug!("replaying handoff for key '{}' to {}", key, target);
                if node.replicate_put(&key, &record.data).await {
                    self.detector.mark_success(target);
                    delivered.push(target.clone());
                } else {
                    self.detector.mark_error(target);
                }
            }

            if !delivered.is_empty() {
                info!(
                    "handoff for key '{}' delivered to {} node(s)",
                    key,
                    delivered.len()
                );
            }
            if let Err(e) = self.queue.settle(&key, &delivered) {
                warn!("failed to settle handoff record for '{}': {}", key, e);
            }
        }
    }

    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("starting handoff replay worker");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh node does
            // not replay before its ring has settled.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.replay_once().await,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("stopping handoff replay worker");
                            return;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VectorClock;
    use crate::ring::Node;
    use crate::storage::engine::MemoryEngine;

    fn queue() -> HandoffQueue {
        HandoffQueue::new(Arc::new(MemoryEngine::new()))
    }

    fn value(data: &[u8]) -> Value {
        let mut clock = VectorClock::new();
        clock.increment("n1");
        Value::new(data.to_vec(), clock)
    }

    #[test]
    fn test_append_unions_targets_and_overwrites_data() {
        let q = queue();
        q.append("k", "10.0.0.1:8080", &value(b"v1")).unwrap();
        q.append("k", "10.0.0.2:8080", &value(b"v2")).unwrap();
        q.append("k", "10.0.0.1:8080", &value(b"v3")).unwrap();

        let records = q.records().unwrap();
        assert_eq!(records.len(), 1);
        let (key, record) = &records[0];
        assert_eq!(key, "k");
        assert_eq!(record.targets, vec!["10.0.0.1:8080", "10.0.0.2:8080"]);
        assert_eq!(record.data.data, b"v3".to_vec());
    }

    #[test]
    fn test_settle_removes_targets_then_record() {
        let q = queue();
        q.append("k", "a:1", &value(b"v")).unwrap();
        q.append("k", "b:1", &value(b"v")).unwrap();

        q.settle("k", &["a:1".to_string()]).unwrap();
        let records = q.records().unwrap();
        assert_eq!(records[0].1.targets, vec!["b:1"]);

        q.settle("k", &["b:1".to_string()]).unwrap();
        assert!(q.is_empty().unwrap());
    }

    #[test]
    fn test_settle_without_deliveries_is_a_noop() {
        let q = queue();
        q.append("k", "a:1", &value(b"v")).unwrap();
        q.settle("k", &[]).unwrap();
        assert_eq!(q.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replay_skips_dead_and_unknown_nodes() {
        let ring = Arc::new(HashRing::new());
        let detector = Arc::new(FailureDetector::new(ring.clone(), 3));

        // A known-but-inactive node and a target absent from the ring: the
        // sweep must leave the record untouched without any RPC.
        let dead = Arc::new(Node::new("127.0.0.1", 1, 1, Duration::from_millis(50)));
        dead.set_inactive();
        ring.add_node(dead);

        let q = Arc::new(queue());
        q.append("k", "127.0.0.1:1", &value(b"v")).unwrap();
        q.append("k", "unknown:9", &value(b"v")).unwrap();

        let worker = HandoffWorker::new(q.clone(), ring, detector, Duration::from_secs(5));
        worker.replay_once().await;

        assert_eq!(q.records().unwrap()[0].1.targets.len(), 2);
    }

    #[tokio::test]
    async fn test_replay_to_unreachable_node_keeps_record() {
        let ring = Arc::new(HashRing::new());
        let detector = Arc::new(FailureDetector::new(ring.clone(), 3));

        // Active in the ring but nothing is listening on the port, so the
        // RPC itself fails and the target stays queued.
        let unreachable = Arc::new(Node::new("127.0.0.1", 1, 1, Duration::from_millis(50)));
        ring.add_node(unreachable);

        let q = Arc::new(queue());
        q.append("k", "127.0.0.1:1", &value(b"v")).unwrap();

        let worker = HandoffWorker::new(q.clone(), ring, detector, Duration::from_secs(5));
        worker.replay_once().await;

        assert_eq!(q.len().unwrap(), 1);
    }
}
