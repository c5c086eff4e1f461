// Replication and coordination: quorum fan-out, replica apply, hinted
// handoff.

pub mod handlers;
pub mod handoff;
pub mod quorum;
pub mod rpc;

pub use handlers::ReplicaHandler;
pub use handoff::{HandoffQueue, HandoffRecord, HandoffWorker};
pub use quorum::{Coordinator, QuorumConfig};
pub use rpc::{HandoffRpc, PutRpc};
