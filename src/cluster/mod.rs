// Cluster health and membership: failure detection and epidemic gossip.

pub mod failure;
pub mod gossip;

pub use failure::FailureDetector;
pub use gossip::{ClusterState, Gossip, GossipConfig, NodeState, NodeStatus};
