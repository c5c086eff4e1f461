/// Replica RPC frames.
///
/// Binary bodies on the `/replication/*` endpoints. Both frames carry the
/// full versioned value; the handoff frame adds the id of the replica the
/// write was originally destined for.

use crate::clock::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutRpc {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRpc {
    pub key: String,
    pub value: Value,
    pub target_node_id: String,
}
