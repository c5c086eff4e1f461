/// Remote Peer Handle
///
/// A `Node` is the local view of one cluster member: its identity, a
/// liveness flag flipped by the failure detector, and a persistent HTTP
/// client with short timeouts for replica RPCs. Handles are shared through
/// the ring; nothing here mutates membership.

use crate::clock::{Value, ValueList};
use crate::replication::rpc::{HandoffRpc, PutRpc};
use crate::storage::serializer::Serializer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const OCTET_STREAM: &str = "application/octet-stream";

pub struct Node {
    id: String,
    address: String,
    port: u16,
    tokens: usize,
    active: AtomicBool,
    client: reqwest::Client,
}

impl Node {
    pub fn new(address: &str, port: u16, tokens: usize, rpc_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(rpc_timeout)
            .timeout(rpc_timeout)
            .build()
            .unwrap_or_default();

        Self {
            id: format!("{}:{}", address, port),
            address: address.to_string(),
            port,
            tokens,
            active: AtomicBool::new(true),
            client,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn tokens(&self) -> usize {
        self.tokens
    }

    pub fn full_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_active(&self) {
        self.active.store(true, Ordering::Relaxed);
    }

    pub fn set_inactive(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    fn url(&self, endpoint: &str) -> String {
        format!("http://{}:{}{}", self.address, self.port, endpoint)
    }

    /// Fire-and-check POST of a binary payload. Used by gossip.
    pub async fn send(&self, endpoint: &str, body: Vec<u8>) -> bool {
        let res = self
            .client
            .post(self.url(endpoint))
            .header(reqwest::header::CONTENT_TYPE, OCTET_STREAM)
            .body(body)
            .send()
            .await;

        match res {
            Ok(r) => r.status().as_u16() == 200,
            Err(_) => false,
        }
    }

    /// Replicate a put to this peer. A 400 means the peer already holds a
    /// dominating clock; the write reached it, so both 200 and 400 count as
    /// delivered. Any transport error or other status is a failure.
    pub async fn replicate_put(&self, key: &str, value: &Value) -> bool {
        if !self.is_active() {
            return false;
        }

        let rpc = PutRpc {
            key: key.to_string(),
            value: value.clone(),
        };
        let body = match Serializer::to_binary(&rpc) {
            Ok(b) => b,
            Err(e) => {
                warn!("failed to encode put rpc for key '{}': {}", key, e);
                return false;
            }
        };

        let res = self
            .client
            .post(self.url("/replication/put"))
            .header(reqwest::header::CONTENT_TYPE, OCTET_STREAM)
            .body(body)
            .send()
            .await;

        match res {
            Ok(r) => matches!(r.status().as_u16(), 200 | 400),
            Err(e) => {
                debug!("replicate_put to {} failed: {}", self.id, e);
                false
            }
        }
    }

    /// Hand a write off to this peer with a hint naming the intended target.
    pub async fn replicate_handoff(&self, key: &str, value: &Value, target_id: &str) -> bool {
        debug!("hinted handoff for key '{}' to node {}", key, self.id);

        if !self.is_active() {
            return false;
        }

        let rpc = HandoffRpc {
            key: key.to_string(),
            value: value.clone(),
            target_node_id: target_id.to_string(),
        };
        let body = match Serializer::to_binary(&rpc) {
            Ok(b) => b,
            Err(e) => {
                warn!("failed to encode handoff rpc for key '{}': {}", key, e);
                return false;
            }
        };

        let res = self
            .client
            .post(self.url("/replication/handoff"))
            .header(reqwest::header::CONTENT_TYPE, OCTET_STREAM)
            .body(body)
            .send()
            .await;

        match res {
            Ok(r) => matches!(r.status().as_u16(), 200 | 400),
            Err(e) => {
                debug!("replicate_handoff to {} failed: {}", self.id, e);
                false
            }
        }
    }

    /// Fetch this peer's value list for a key. Transport failure reads as
    /// no response, not as an empty list.
    pub async fn replicate_get(&self, key: &str) -> Option<ValueList> {
        let res = self
            .client
            .post(self.url("/replication/get"))
            .header(reqwest::header::CONTENT_TYPE, OCTET_STREAM)
            .body(key.as_bytes().to_vec())
            .send()
            .await
            .ok()?;

        if res.status().as_u16() != 200 {
            return None;
        }

        let body = res.bytes().await.ok()?;
        match Serializer::from_binary::<ValueList>(&body) {
            Ok(values) => Some(values),
            Err(e) => {
                warn!("undecodable replica get response from {}: {}", self.id, e);
                None
            }
        }
    }

    /// Probe the peer's admin health endpoint.
    pub async fn check_health(&self) -> bool {
        match self.client.get(self.url("/admin/health")).send().await {
            Ok(r) => r.status().as_u16() == 200,
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("tokens", &self.tokens)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let node = Node::new("127.0.0.1", 9000, 8, Duration::from_millis(50));
        assert_eq!(node.id(), "127.0.0.1:9000");
        assert_eq!(node.full_address(), "127.0.0.1:9000");
        assert_eq!(node.tokens(), 8);
        assert!(node.is_active());
    }

    #[test]
    fn test_liveness_flag() {
        let node = Node::new("127.0.0.1", 9000, 8, Duration::from_millis(50));
        node.set_inactive();
        assert!(!node.is_active());
        node.set_active();
        assert!(node.is_active());
    }

    #[tokio::test]
    async fn test_inactive_node_short_circuits_put() {
        // No listener anywhere near this port; the inactive check must win
        // before any connection is attempted.
        let node = Node::new("127.0.0.1", 1, 1, Duration::from_millis(50));
        node.set_inactive();
        assert!(!node.replicate_put("k", &Value::default()).await);
    }

    #[tokio::test]
    async fn test_unreachable_peer_reads_as_failure() {
        let node = Node::new("127.0.0.1", 1, 1, Duration::from_millis(50));
        assert!(!node.replicate_put("k", &Value::default()).await);
        assert!(!node.check_health().await);
        assert!(node.replicate_get("k").await.is_none());
    }
}
