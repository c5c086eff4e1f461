/// Sloppy-Quorum Coordinator
///
/// Client reads and writes land here after routing. A write commits locally
/// first, then fans out to the other primary replicas; a read fans out and
/// unions whatever comes back with the local view. When a primary does not
/// answer, the paired fallback custodian from the tail of the preference
/// list takes the write with a handoff hint.
///
/// The coordinator counts its own durable local commit implicitly: a put
/// succeeds on `W - 1` peer acks and a get on `R - 1` peer responses. This
/// holds for any `W <= N` / `R <= N`, which construction enforces.
///
/// Fan-out tasks are joinable but never joined by the request path: the
/// client waits on an atomic counter up to the quorum deadline, and late
/// arrivals keep feeding the failure detector after the response is gone.

use crate::clock::{Reconcile, Value, ValueList};
use crate::cluster::failure::FailureDetector;
use crate::error::{KvError, Result};
use crate::ring::{HashRing, Node};
use crate::storage::ValueStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct QuorumConfig {
    /// Replica degree N.
    pub replicas: usize,
    /// Read quorum R.
    pub reads: usize,
    /// Write quorum W.
    pub writes: usize,
    /// How long a request waits for peer responses.
    pub deadline: Duration,
}

pub struct Coordinator {
    local: Arc<Node>,
    ring: Arc<HashRing>,
    store: Arc<ValueStore>,
    detector: Arc<FailureDetector>,
    handoff: Arc<super::handoff::HandoffQueue>,
    config: QuorumConfig,
}

/// Shared bookkeeping between a waiting request and its fan-out tasks.
struct Tally {
    received: AtomicUsize,
    wakeup: Notify,
}

impl Tally {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            received: AtomicUsize::new(0),
            wakeup: Notify::new(),
        })
    }

    fn record(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.wakeup.notify_waiters();
    }

    fn count(&self) -> usize {
        self.received.load(Ordering::Relaxed)
    }

    /// Wait until `required` responses arrive or the deadline passes.
    async fn wait(&self, required: usize, deadline: Duration) -> usize {
        let until = Instant::now() + deadline;
        while self.count() < required {
            let Some(remaining) = until.checked_duration_since(Instant::now()) else {
                break;
            };
            let _ = tokio::time::timeout(remaining, self.wakeup.notified()).await;
        }
        self.count()
    }
}

impl Coordinator {
    pub fn new(
        local: Arc<Node>,
        ring: Arc<HashRing>,
        store: Arc<ValueStore>,
        detector: Arc<FailureDetector>,
        handoff: Arc<super::handoff::HandoffQueue>,
        config: QuorumConfig,
    ) -> Self {
        Self {
            local,
            ring,
            store,
            detector,
            handoff,
            config,
        }
    }

    /// The first N entries are primary replicas; the next N are fallback
    /// custodians for hinted handoff.
    fn preference_list(&self, key: &str) -> Result<Vec<Arc<Node>>> {
        let list = self.ring.successors(key, 2 * self.config.replicas)?;
        if list.len() < self.config.replicas {
            return Err(KvError::Quorum(format!(
                "{} distinct nodes available, {} required",
                list.len(),
                self.config.replicas
            )));
        }
        Ok(list)
    }

    /// Coordinator-side write. The local commit happens before any peer RPC,
    /// so a successful response always implies the write is durable here.
    pub async fn put(&self, key: &str, value: Value) -> Result<()> {
        let preference = self.preference_list(key)?;

        if self.store.apply(key, value.clone())? == Reconcile::Stale {
            return Err(KvError::StaleClock(format!(
                "write to '{}' is dominated by resident data",
                key
            )));
        }

        let tally = Tally::new();
        for (i, primary) in preference.iter().take(self.config.replicas).enumerate() {
            if primary.id() == self.local.id() {
                continue;
            }

            let primary = primary.clone();
            // Primary at position i pairs with the custodian at N + i.
            let fallback = preference.get(self.config.replicas + i).cloned();
            let detector = self.detector.clone();
            let tally = tally.clone();
            let key = key.to_string();
            let value = value.clone();

            tokio::spawn(async move {
                if primary.replicate_put(&key, &value).await {
                    detector.mark_success(primary.id());
                    tally.record();
                    return;
                }
                detector.mark_error(primary.id());

                let Some(fallback) = fallback else {
                    return;
                };
                if fallback.replicate_handoff(&key, &value, primary.id()).await {
                    detector.mark_success(fallback.id());
                    tally.record();
                } else {
                    detector.mark_error(fallback.id());
                }
            });
        }

        let required = self.config.writes - 1;
        let received = tally.wait(required, self.config.deadline).await;
        if received < required {
            warn!(
                "write quorum missed for key '{}': {} of {} peer acks",
                key, received, required
            );
            return Err(KvError::NotEnoughWriteResponses { received, required });
        }
        Ok(())
    }

    /// Coordinator-side read: the union of the local value list and
    /// everything peers returned before the deadline. No reconciliation
    /// happens here; the client surface deduplicates.
    pub async fn get(&self, key: &str) -> Result<ValueList> {
        let preference = self.preference_list(key)?;

        // Local state as of entry; peers add whatever lands in time.
        let mut result = self.store.load(key)?;

        let tally = Tally::new();
        let gathered: Arc<Mutex<ValueList>> = Arc::new(Mutex::new(ValueList::new()));

        for (i, primary) in preference.iter().take(self.config.replicas).enumerate() {
            if primary.id() == self.local.id() {
                continue;
            }

            let primary = primary.clone();
            let fallback = preference.get(self.config.replicas + i).cloned();
            let detector = self.detector.clone();
            let tally = tally.clone();
            let gathered = gathered.clone();
            let key = key.to_string();

            tokio::spawn(async move {
                if let Some(values) = primary.replicate_get(&key).await {
                    detector.mark_success(primary.id());
                    gathered.lock().extend(values);
                    tally.record();
                    return;
                }
                detector.mark_error(primary.id());

                let Some(fallback) = fallback else {
                    return;
                };
                match fallback.replicate_get(&key).await {
                    Some(values) => {
                        detector.mark_success(fallback.id());
                        gathered.lock().extend(values);
                        tally.record();
                    }
                    None => detector.mark_error(fallback.id()),
                }
            });
        }

        let required = self.config.reads - 1;
        let received = tally.wait(required, self.config.deadline).await;
        if received < required {
            warn!(
                "read quorum missed for key '{}': {} of {} peer responses",
                key, received, required
            );
            return Err(KvError::NotEnoughReadResponses { received, required });
        }

        result.extend(gathered.lock().drain(..));
        debug!("read '{}' produced {} value(s)", key, result.len());
        Ok(result)
    }

    /// Queue depth of the handoff store, surfaced for diagnostics.
    pub fn pending_handoffs(&self) -> Result<usize> {
        self.handoff.len()
    }
}
