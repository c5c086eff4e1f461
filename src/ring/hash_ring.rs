/// Consistent Hash Ring
///
/// Key placement with virtual nodes for balanced distribution. Each member
/// contributes `tokens` vnodes at positions derived from md5 of
/// `"{node_id}-{i}"`; a key belongs to the owner of the first vnode past the
/// key's own position, wrapping around the ring.
///
/// The ring is multi-reader/single-writer. No lock is ever held across an
/// RPC; callers clone out the `Arc<Node>` handles they need.

use crate::error::{KvError, Result};
use crate::ring::node::Node;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

/// Position on the hash ring (0 to 2^64-1).
pub type RingPosition = u64;

/// Ring position of an arbitrary byte string: the first 8 bytes of its md5
/// digest, big-endian.
pub fn hash_position(key: &[u8]) -> RingPosition {
    let digest = md5::compute(key);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// A point on the ring owned by one node.
#[derive(Debug, Clone)]
pub struct VirtualNode {
    pub id: String,
    pub position: RingPosition,
    pub owner: Arc<Node>,
}

/// Serializable vnode view for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct VnodeInfo {
    pub id: String,
    pub position: RingPosition,
    pub owner_id: String,
    pub owner_active: bool,
}

#[derive(Default)]
struct RingInner {
    vnodes: BTreeMap<RingPosition, VirtualNode>,
    nodes: HashMap<String, Arc<Node>>,
}

#[derive(Default)]
pub struct HashRing {
    inner: RwLock<RingInner>,
}

impl HashRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node and its vnodes. Re-adding an id replaces its handle.
    pub fn add_node(&self, node: Arc<Node>) {
        let mut inner = self.inner.write();

        for i in 0..node.tokens() {
            let vnode_id = format!("{}-{}", node.id(), i);
            let position = hash_position(vnode_id.as_bytes());
            inner.vnodes.insert(
                position,
                VirtualNode {
                    id: vnode_id,
                    position,
                    owner: node.clone(),
                },
            );
        }

        inner.nodes.insert(node.id().to_string(), node);
    }

    /// Drop a node and every vnode it owns.
    pub fn remove_node(&self, node_id: &str) {
        let mut inner = self.inner.write();
        inner.vnodes.retain(|_, vn| vn.owner.id() != node_id);
        inner.nodes.remove(node_id);
    }

    /// The coordinator node for a key: owner of the first vnode strictly
    /// past the key's position, wrapping to the ring start.
    pub fn find_node(&self, key: &str) -> Result<Arc<Node>> {
        let inner = self.inner.read();
        if inner.vnodes.is_empty() {
            return Err(KvError::RingEmpty);
        }

        let position = hash_position(key.as_bytes());
        let successor = inner
            .vnodes
            .range((Bound::Excluded(position), Bound::Unbounded))
            .next()
            .or_else(|| inner.vnodes.iter().next())
            .map(|(_, vn)| vn.owner.clone());

        successor.ok_or(KvError::RingEmpty)
    }

    /// Walk the ring forward from a key's position, collecting up to `count`
    /// distinct nodes (live or dead). `count` is clamped to the node count;
    /// ordering is deterministic for a fixed vnode set.
    pub fn successors(&self, key: &str, count: usize) -> Result<Vec<Arc<Node>>> {
        let inner = self.inner.read();
        if inner.vnodes.is_empty() {
            return Err(KvError::RingEmpty);
        }

        let count = count.min(inner.nodes.len());
        let position = hash_position(key.as_bytes());

        let mut collected: Vec<Arc<Node>> = Vec::with_capacity(count);
        let walk = inner
            .vnodes
            .range((Bound::Excluded(position), Bound::Unbounded))
            .chain(inner.vnodes.range(..=position));

        for (_, vnode) in walk {
            if collected.len() == count {
                break;
            }
            if collected.iter().all(|n| n.id() != vnode.owner.id()) {
                collected.push(vnode.owner.clone());
            }
        }

        Ok(collected)
    }

    pub fn get_node(&self, node_id: &str) -> Option<Arc<Node>> {
        self.inner.read().nodes.get(node_id).cloned()
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.inner.read().nodes.values().cloned().collect()
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().vnodes.is_empty()
    }

    pub fn vnodes(&self) -> Vec<VnodeInfo> {
        self.inner
            .read()
            .vnodes
            .values()
            .map(|vn| VnodeInfo {
                id: vn.id.clone(),
                position: vn.position,
                owner_id: vn.owner.id().to_string(),
                owner_active: vn.owner.is_active(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    fn node(name: &str, tokens: usize) -> Arc<Node> {
        // Port is irrelevant here; these handles never leave the process.
        Arc::new(Node::new(name, 9999, tokens, Duration::from_millis(50)))
    }

    #[test]
    fn test_empty_ring_fails() {
        let ring = HashRing::new();
        assert!(matches!(ring.find_node("hello"), Err(KvError::RingEmpty)));
        assert!(matches!(ring.successors("hello", 3), Err(KvError::RingEmpty)));
    }

    #[test]
    fn test_single_node_owns_everything() {
        let ring = HashRing::new();
        let n = node("node-1", 4);
        ring.add_node(n.clone());

        assert_eq!(ring.find_node("hello").unwrap().id(), n.id());
        assert_eq!(ring.find_node("world").unwrap().id(), n.id());
    }

    #[test]
    fn test_two_node_split_is_roughly_even() {
        let ring = HashRing::new();
        ring.add_node(node("node-1", 32));
        ring.add_node(node("node-2", 32));

        let mut counts = [0usize; 2];
        for i in 0..1000 {
            let owner = ring.find_node(&i.to_string()).unwrap();
            if owner.id() == "node-1:9999" {
                counts[0] += 1;
            } else {
                counts[1] += 1;
            }
        }

        let freq = counts[0] as f64 / 1000.0;
        assert!(freq > 0.3 && freq < 0.7, "keys not evenly distributed: {}", freq);
    }

    #[test]
    fn test_node_removal_reassigns_keys() {
        let ring = HashRing::new();
        ring.add_node(node("node-1", 16));
        ring.add_node(node("node-2", 16));

        let owned_before = (0..1000)
            .filter(|i| ring.find_node(&i.to_string()).unwrap().id() == "node-1:9999")
            .count();
        assert!(owned_before > 100);

        ring.remove_node("node-1:9999");
        for i in 0..1000 {
            assert_eq!(ring.find_node(&i.to_string()).unwrap().id(), "node-2:9999");
        }
    }

    #[test]
    fn test_placement_is_deterministic() {
        let ring = HashRing::new();
        for i in 0..5 {
            ring.add_node(node(&format!("node-{}", i), 8));
        }

        let first: Vec<String> = (0..100)
            .map(|i| ring.find_node(&i.to_string()).unwrap().id().to_string())
            .collect();
        let second: Vec<String> = (0..100)
            .map(|i| ring.find_node(&i.to_string()).unwrap().id().to_string())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_successors_are_distinct() {
        let ring = HashRing::new();
        for i in 0..5 {
            ring.add_node(node(&format!("node-{}", i), 8));
        }

        let successors = ring.successors("hello", 5).unwrap();
        assert_eq!(successors.len(), 5);

        let ids: HashSet<&str> = successors.iter().map(|n| n.id()).collect();
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn test_successors_start_at_coordinator() {
        let ring = HashRing::new();
        ring.add_node(node("node-0", 1));
        ring.add_node(node("node-1", 1));

        let coordinator = ring.find_node("hello").unwrap();
        let successors = ring.successors("hello", 2).unwrap();
        assert_eq!(successors[0].id(), coordinator.id());
    }

    #[test]
    fn test_successors_clamped_to_node_count() {
        let ring = HashRing::new();
        for i in 0..3 {
            ring.add_node(node(&format!("node-{}", i), 8));
        }

        let successors = ring.successors("hello", 10).unwrap();
        assert_eq!(successors.len(), 3);

        let ids: HashSet<&str> = successors.iter().map(|n| n.id()).collect();
        assert_eq!(ids.len(), 3);
    }
}
