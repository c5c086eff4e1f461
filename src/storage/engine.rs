/// Local Storage Engines
///
/// The durable map under each node. The replication layer only needs
/// get/put/delete/scan over opaque byte strings; everything else about
/// persistence is the engine's business. `DiskEngine` wraps sled and is the
/// production engine; `MemoryEngine` backs unit tests.

use crate::error::Result;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;

pub trait StorageEngine: Send + Sync {
    /// Absent keys are not an error.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    /// All entries, in key order, as a point-in-time snapshot.
    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// sled-backed durable map.
pub struct DiskEngine {
    db: sled::Db,
}

impl DiskEngine {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl StorageEngine for DiskEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.db.remove(key)?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        for item in self.db.iter() {
            let (k, v) = item?;
            entries.push((k.to_vec(), v.to_vec()));
        }
        Ok(entries)
    }
}

/// In-memory engine for tests and ephemeral nodes.
#[derive(Default)]
pub struct MemoryEngine {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageEngine for MemoryEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .map
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
