/// Value Store
///
/// Thin wrapper over a storage engine for sibling value lists, with striped
/// commit locks so concurrent writes to the same key serialize without a
/// process-wide mutex. The stripes are sync locks held only across the
/// engine round-trip, never across an RPC.

use crate::clock::{reconcile, Reconcile, Value, ValueList};
use crate::error::Result;
use crate::ring::hash_position;
use crate::storage::engine::StorageEngine;
use crate::storage::serializer::Serializer;
use parking_lot::Mutex;
use std::sync::Arc;

const LOCK_STRIPES: usize = 64;

pub struct ValueStore {
    engine: Arc<dyn StorageEngine>,
    stripes: Vec<Mutex<()>>,
}

impl ValueStore {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self {
            engine,
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe(&self, key: &str) -> &Mutex<()> {
        let idx = hash_position(key.as_bytes()) as usize % LOCK_STRIPES;
        &self.stripes[idx]
    }

    /// Current sibling list for a key; empty if absent.
    pub fn load(&self, key: &str) -> Result<ValueList> {
        match self.engine.get(key.as_bytes())? {
            Some(bytes) => Serializer::from_binary(&bytes),
            None => Ok(ValueList::new()),
        }
    }

    /// Reconcile `value` into the key's sibling list and store the result.
    /// Returns `Stale` without writing when a resident clock strictly
    /// dominates the incoming one.
    pub fn apply(&self, key: &str, value: Value) -> Result<Reconcile> {
        let _guard = self.stripe(key).lock();

        let mut residents = self.load(key)?;
        let outcome = reconcile(&mut residents, value);
        if outcome == Reconcile::Applied {
            self.engine
                .put(key.as_bytes(), &Serializer::to_binary(&residents)?)?;
        }
        Ok(outcome)
    }
}
