/// Replica-side application of inbound replication RPCs.
///
/// These run on whatever node a coordinator (or the handoff worker) chose to
/// contact. They reconcile against the local value list with vector clocks;
/// re-delivery is idempotent, and a stale inbound write reports as such so
/// the sender can still count the delivery.

use crate::clock::{Reconcile, ValueList};
use crate::error::Result;
use crate::replication::handoff::HandoffQueue;
use crate::replication::rpc::{HandoffRpc, PutRpc};
use crate::storage::ValueStore;
use std::sync::Arc;
use tracing::debug;

pub struct ReplicaHandler {
    store: Arc<ValueStore>,
    handoff: Arc<HandoffQueue>,
}

impl ReplicaHandler {
    pub fn new(store: Arc<ValueStore>, handoff: Arc<HandoffQueue>) -> Self {
        Self { store, handoff }
    }

    /// Apply a replicated put. `Stale` means a resident clock strictly
    /// dominates the inbound one; the store is left untouched.
    pub fn apply_put(&self, rpc: &PutRpc) -> Result<Reconcile> {
        debug!("replica put for key '{}'", rpc.key);
        self.store.apply(&rpc.key, rpc.value.clone())
    }

    /// Accept a hinted write on behalf of an unreachable replica: apply it
    /// locally, then queue it for replay to the intended target. The queue
    /// entry is upserted even when the local view already dominates; the
    /// hinted target still has not seen the write.
    pub fn apply_handoff(&self, rpc: &HandoffRpc) -> Result<Reconcile> {
        debug!(
            "accepting handoff for key '{}' on behalf of {}",
            rpc.key, rpc.target_node_id
        );
        let outcome = self.store.apply(&rpc.key, rpc.value.clone())?;
        self.handoff
            .append(&rpc.key, &rpc.target_node_id, &rpc.value)?;
        Ok(outcome)
    }

    /// Local value list for a key. A miss is an empty list, never an error.
    pub fn fetch(&self, key: &str) -> Result<ValueList> {
        self.store.load(key)
    }
}
