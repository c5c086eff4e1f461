// # RustyKV Server
//
// Main entry point for a RustyKV node. Wires the ring, gossip, failure
// detector, handoff worker, and quorum coordinator together and serves the
// HTTP surface until interrupted.

use clap::Parser;
use rusty_kv::cluster::failure::FailureDetector;
use rusty_kv::cluster::gossip::{Gossip, GossipConfig};
use rusty_kv::replication::handoff::{HandoffQueue, HandoffWorker};
use rusty_kv::replication::{Coordinator, QuorumConfig, ReplicaHandler};
use rusty_kv::ring::{HashRing, Node};
use rusty_kv::server::{router, AppState};
use rusty_kv::storage::{DiskEngine, ValueStore};
use rusty_kv::{Result, ServerConfig, VERSION};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let config = ServerConfig::parse();
    config.validate()?;

    info!("Initializing RustyKV node {}", config.node_id());
    info!("Version: {}", VERSION);
    info!(
        "Replication: N={} R={} W={}, {} tokens",
        config.replication_factor, config.read_quorum, config.write_quorum, config.tokens
    );

    // Durable maps: one for value lists, one for the handoff queue.
    let data_engine = Arc::new(DiskEngine::open(config.data_path())?);
    let handoff_engine = Arc::new(DiskEngine::open(config.handoff_path())?);
    info!("Opened data store at {}", config.data_path().display());

    let store = Arc::new(ValueStore::new(data_engine.clone()));
    let handoff = Arc::new(HandoffQueue::new(handoff_engine.clone()));

    // Membership: this node joins its own ring, gossip fills in the rest.
    let local = Arc::new(Node::new(
        &config.address,
        config.port,
        config.tokens,
        config.rpc_timeout(),
    ));
    let ring = Arc::new(HashRing::new());
    ring.add_node(local.clone());

    let detector = Arc::new(FailureDetector::new(ring.clone(), config.failure_threshold));
    let coordinator = Arc::new(Coordinator::new(
        local.clone(),
        ring.clone(),
        store.clone(),
        detector.clone(),
        handoff.clone(),
        QuorumConfig {
            replicas: config.replication_factor,
            reads: config.read_quorum,
            writes: config.write_quorum,
            deadline: config.quorum_deadline(),
        },
    ));
    let replica = Arc::new(ReplicaHandler::new(store.clone(), handoff.clone()));

    let gossip = Arc::new(Gossip::new(
        ring.clone(),
        local.clone(),
        GossipConfig {
            fanout: config.gossip_fanout,
            interval: config.gossip_interval(),
            rpc_timeout: config.rpc_timeout(),
            bootstrap_servers: config.parsed_bootstrap_servers()?,
            incarnation_path: config.gossip_path(),
        },
    ));
    gossip.bootstrap().await;

    // Background duties, all observing the same shutdown signal.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let gossip_task = gossip.clone().spawn(shutdown_rx.clone());
    let detector_task = detector.clone().spawn(shutdown_rx.clone());
    let handoff_task = HandoffWorker::new(
        handoff.clone(),
        ring.clone(),
        detector.clone(),
        config.handoff_interval(),
    )
    .spawn(shutdown_rx);

    let app = router(AppState {
        local,
        ring,
        coordinator,
        replica,
        gossip: gossip.clone(),
    });

    let bind_addr = format!("{}:{}", config.address, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("RustyKV listening on {}", bind_addr);

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await;

    if let Err(e) = &serve_result {
        error!("Server stopped with error: {}", e);
    }

    // Announce our death and persist the incarnation before the background
    // tasks go away.
    info!("Shutting down subsystems...");
    if let Err(e) = gossip.shutdown().await {
        warn!("Gossip shutdown incomplete: {}", e);
    }

    let _ = shutdown_tx.send(true);
    let _ = gossip_task.await;
    let _ = detector_task.await;
    let _ = handoff_task.await;

    if let Err(e) = data_engine.flush() {
        warn!("Final data flush failed: {}", e);
    }
    if let Err(e) = handoff_engine.flush() {
        warn!("Final handoff flush failed: {}", e);
    }

    info!("Shutdown complete");
    serve_result.map_err(Into::into)
}
