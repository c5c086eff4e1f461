/// Server Configuration
///
/// All tunables for a single node: identity, replication parameters,
/// background intervals, and on-disk paths. Parsed from the command line;
/// every field has a production default so tests can build one directly.

use crate::error::{KvError, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "rusty-kv-server", version, about = "Dynamo-style replicated key-value store")]
pub struct ServerConfig {
    /// Address this node binds and advertises
    #[arg(long, default_value = "127.0.0.1")]
    pub address: String,

    /// Port this node binds and advertises
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Seed nodes contacted at startup, as host:port
    #[arg(long = "bootstrap-servers", value_delimiter = ',', num_args = 0..)]
    pub bootstrap_servers: Vec<String>,

    /// Virtual nodes this node contributes to the ring
    #[arg(long, default_value_t = 16)]
    pub tokens: usize,

    /// Replica degree N
    #[arg(long = "replication-factor", default_value_t = 3)]
    pub replication_factor: usize,

    /// Read quorum R
    #[arg(long = "read-quorum", default_value_t = 2)]
    pub read_quorum: usize,

    /// Write quorum W
    #[arg(long = "write-quorum", default_value_t = 2)]
    pub write_quorum: usize,

    /// Peers contacted per gossip round
    #[arg(long = "gossip-fanout", default_value_t = 3)]
    pub gossip_fanout: usize,

    /// Seconds between gossip rounds
    #[arg(long = "gossip-interval-secs", default_value_t = 3)]
    pub gossip_interval_secs: u64,

    /// Seconds between handoff replay sweeps
    #[arg(long = "handoff-interval-secs", default_value_t = 5)]
    pub handoff_interval_secs: u64,

    /// Consecutive RPC failures before a peer is quarantined
    #[arg(long = "failure-threshold", default_value_t = 3)]
    pub failure_threshold: u32,

    /// Per-RPC timeout in milliseconds
    #[arg(long = "rpc-timeout-ms", default_value_t = 50)]
    pub rpc_timeout_ms: u64,

    /// Deadline for assembling a quorum, in milliseconds
    #[arg(long = "quorum-deadline-ms", default_value_t = 100)]
    pub quorum_deadline_ms: u64,

    /// Prefix for the on-disk store directories
    #[arg(long = "db-prefix", default_value = "/tmp/rusty-kv-")]
    pub db_prefix: String,
}

impl ServerConfig {
    /// Stable node identity, `address:port`.
    pub fn node_id(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Directory for the main value store.
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(format!("{}{}", self.db_prefix, self.port))
    }

    /// Directory for the handoff queue.
    pub fn handoff_path(&self) -> PathBuf {
        PathBuf::from(format!("{}{}-handoff", self.db_prefix, self.port))
    }

    /// File holding the persisted gossip incarnation counter.
    pub fn gossip_path(&self) -> PathBuf {
        PathBuf::from(format!("/tmp/{}:{}-gossip", self.address, self.port))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn quorum_deadline(&self) -> Duration {
        Duration::from_millis(self.quorum_deadline_ms)
    }

    pub fn gossip_interval(&self) -> Duration {
        Duration::from_secs(self.gossip_interval_secs)
    }

    pub fn handoff_interval(&self) -> Duration {
        Duration::from_secs(self.handoff_interval_secs)
    }

    /// Bootstrap servers parsed into (host, port) pairs.
    pub fn parsed_bootstrap_servers(&self) -> Result<Vec<(String, u16)>> {
        self.bootstrap_servers
            .iter()
            .map(|s| {
                let (host, port) = s.rsplit_once(':').ok_or_else(|| {
                    KvError::Configuration(format!("bootstrap server '{}' is not host:port", s))
                })?;
                let port = port.parse::<u16>().map_err(|_| {
                    KvError::Configuration(format!("bootstrap server '{}' has a bad port", s))
                })?;
                Ok((host.to_string(), port))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.replication_factor == 0 {
            return Err(KvError::Configuration(
                "replication factor must be at least 1".into(),
            ));
        }
        if self.read_quorum == 0 || self.read_quorum > self.replication_factor {
            return Err(KvError::Configuration(format!(
                "read quorum {} must be in 1..={}",
                self.read_quorum, self.replication_factor
            )));
        }
        if self.write_quorum == 0 || self.write_quorum > self.replication_factor {
            return Err(KvError::Configuration(format!(
                "write quorum {} must be in 1..={}",
                self.write_quorum, self.replication_factor
            )));
        }
        if self.tokens == 0 {
            return Err(KvError::Configuration("tokens must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8080,
            bootstrap_servers: Vec::new(),
            tokens: 16,
            replication_factor: 3,
            read_quorum: 2,
            write_quorum: 2,
            gossip_fanout: 3,
            gossip_interval_secs: 3,
            handoff_interval_secs: 5,
            failure_threshold: 3,
            rpc_timeout_ms: 50,
            quorum_deadline_ms: 100,
            db_prefix: "/tmp/rusty-kv-".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_and_paths() {
        let config = ServerConfig {
            port: 9000,
            ..Default::default()
        };
        assert_eq!(config.node_id(), "127.0.0.1:9000");
        assert_eq!(config.data_path(), PathBuf::from("/tmp/rusty-kv-9000"));
        assert_eq!(
            config.handoff_path(),
            PathBuf::from("/tmp/rusty-kv-9000-handoff")
        );
        assert_eq!(
            config.gossip_path(),
            PathBuf::from("/tmp/127.0.0.1:9000-gossip")
        );
    }

    #[test]
    fn test_validate_rejects_bad_quorums() {
        let mut config = ServerConfig::default();
        config.write_quorum = 4;
        assert!(config.validate().is_err());

        config.write_quorum = 2;
        config.read_quorum = 0;
        assert!(config.validate().is_err());

        config.read_quorum = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parsed_bootstrap_servers() {
        let config = ServerConfig {
            bootstrap_servers: vec!["10.0.0.1:8080".into(), "10.0.0.2:8081".into()],
            ..Default::default()
        };
        let parsed = config.parsed_bootstrap_servers().unwrap();
        assert_eq!(parsed, vec![("10.0.0.1".into(), 8080), ("10.0.0.2".into(), 8081)]);

        let bad = ServerConfig {
            bootstrap_servers: vec!["nonsense".into()],
            ..Default::default()
        };
        assert!(bad.parsed_bootstrap_servers().is_err());
    }
}
