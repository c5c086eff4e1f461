// Consistent hashing and peer handles.

pub mod hash_ring;
pub mod node;

pub use hash_ring::{hash_position, HashRing, RingPosition, VirtualNode, VnodeInfo};
pub use node::Node;
