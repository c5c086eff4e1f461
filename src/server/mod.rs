/// HTTP Surface
///
/// One axum router carries the three planes:
/// - client plane: JSON `/put` and `/get`, base64 payloads, vector-clock
///   context tokens, 307 redirects to the key's coordinator
/// - replication plane: binary-framed `/replication/*` peer RPCs
/// - admin plane: gossip ingestion plus membership/ring/health introspection

use crate::clock::{Reconcile, Value, ValueList, VectorClock};
use crate::cluster::gossip::{ClusterState, Gossip};
use crate::error::KvError;
use crate::replication::rpc::{HandoffRpc, PutRpc};
use crate::replication::{Coordinator, ReplicaHandler};
use crate::ring::{HashRing, Node};
use crate::storage::serializer::Serializer;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Clone)]
pub struct AppState {
    pub local: Arc<Node>,
    pub ring: Arc<HashRing>,
    pub coordinator: Arc<Coordinator>,
    pub replica: Arc<ReplicaHandler>,
    pub gossip: Arc<Gossip>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/put", post(client_put))
        .route("/get", post(client_get))
        .route("/replication/put", post(replica_put))
        .route("/replication/handoff", post(replica_handoff))
        .route("/replication/get", post(replica_get))
        .route("/admin/gossip", post(admin_gossip))
        .route("/admin/membership", post(admin_membership))
        .route("/admin/ring", post(admin_ring))
        .route("/admin/health", get(admin_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for KvError {
    fn into_response(self) -> Response {
        let status = match self {
            KvError::StaleClock(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

// ============================================================================
// Client plane
// ============================================================================

#[derive(Debug, Deserialize)]
struct PutBody {
    key: String,
    data: String,
    #[serde(default)]
    context: String,
}

#[derive(Debug, Deserialize)]
struct GetBody {
    key: String,
}

#[derive(Debug, Serialize)]
struct ResponseValue {
    data: String,
    context: String,
}

#[derive(Debug, Serialize)]
struct GetResponse {
    values: Vec<ResponseValue>,
}

/// 307 pointing at the key's coordinator when this node does not own the
/// key; `None` when we are the right place to handle it.
fn redirect_if_foreign(
    state: &AppState,
    key: &str,
    endpoint: &str,
) -> Result<Option<Response>, KvError> {
    let owner = state.ring.find_node(key)?;
    if owner.id() == state.local.id() {
        return Ok(None);
    }

    debug!(
        "redirecting request for key '{}' to coordinator {}",
        key,
        owner.id()
    );
    let location = format!("http://{}/{}", owner.full_address(), endpoint);
    Ok(Some(
        (
            StatusCode::TEMPORARY_REDIRECT,
            [(header::LOCATION, location)],
        )
            .into_response(),
    ))
}

/// Drop exact `(payload, clock)` duplicates from a quorum read's union.
fn dedup_values(values: ValueList) -> ValueList {
    let mut unique = ValueList::new();
    for value in values {
        if !unique.contains(&value) {
            unique.push(value);
        }
    }
    unique
}

fn decode_context(context: &str) -> Result<VectorClock, KvError> {
    if context.is_empty() {
        return Ok(VectorClock::new());
    }
    let bytes = BASE64
        .decode(context)
        .map_err(|e| KvError::Serialization(format!("bad context encoding: {}", e)))?;
    Serializer::from_binary(&bytes)
}

async fn client_put(
    State(state): State<AppState>,
    Json(body): Json<PutBody>,
) -> Result<Response, KvError> {
    if let Some(redirect) = redirect_if_foreign(&state, &body.key, "put")? {
        return Ok(redirect);
    }

    let data = BASE64
        .decode(&body.data)
        .map_err(|e| KvError::Serialization(format!("bad data encoding: {}", e)))?;

    // The write's clock advances under the coordinator's id, never a
    // replica's.
    let mut clock = decode_context(&body.context)?;
    clock.increment(state.local.id());

    state
        .coordinator
        .put(&body.key, Value::new(data, clock))
        .await?;
    Ok(StatusCode::OK.into_response())
}

async fn client_get(
    State(state): State<AppState>,
    Json(body): Json<GetBody>,
) -> Result<Response, KvError> {
    if let Some(redirect) = redirect_if_foreign(&state, &body.key, "get")? {
        return Ok(redirect);
    }

    let values = dedup_values(state.coordinator.get(&body.key).await?);

    let mut response = GetResponse {
        values: Vec::with_capacity(values.len()),
    };
    for value in values {
        response.values.push(ResponseValue {
            data: BASE64.encode(&value.data),
            context: BASE64.encode(Serializer::to_binary(&value.clock)?),
        });
    }
    Ok(Json(response).into_response())
}

// ============================================================================
// Replication plane
// ============================================================================

async fn replica_put(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, KvError> {
    let rpc: PutRpc = Serializer::from_binary(&body)?;
    match state.replica.apply_put(&rpc)? {
        Reconcile::Applied => Ok(StatusCode::OK.into_response()),
        Reconcile::Stale => Ok((StatusCode::BAD_REQUEST, "stale clock").into_response()),
    }
}

async fn replica_handoff(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, KvError> {
    let rpc: HandoffRpc = Serializer::from_binary(&body)?;
    match state.replica.apply_handoff(&rpc)? {
        Reconcile::Applied => Ok(StatusCode::OK.into_response()),
        Reconcile::Stale => Ok((StatusCode::BAD_REQUEST, "stale clock").into_response()),
    }
}

async fn replica_get(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, KvError> {
    let key = String::from_utf8(body.to_vec())
        .map_err(|e| KvError::InvalidInput(format!("non-utf8 key: {}", e)))?;

    let values = state.replica.fetch(&key)?;
    let bytes = Serializer::to_binary(&values)?;
    Ok(([(header::CONTENT_TYPE, OCTET_STREAM)], bytes).into_response())
}

// ============================================================================
// Admin plane
// ============================================================================

async fn admin_gossip(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, KvError> {
    let other: ClusterState = Serializer::from_binary(&body)?;
    state.gossip.on_receive(other);
    Ok(StatusCode::OK.into_response())
}

async fn admin_membership(State(state): State<AppState>) -> Response {
    Json(state.gossip.cluster_state()).into_response()
}

async fn admin_ring(State(state): State<AppState>) -> Response {
    Json(state.ring.vnodes()).into_response()
}

async fn admin_health() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::failure::FailureDetector;
    use crate::cluster::gossip::GossipConfig;
    use crate::replication::handoff::HandoffQueue;
    use crate::replication::QuorumConfig;
    use crate::storage::engine::MemoryEngine;
    use crate::storage::ValueStore;
    use std::time::Duration;

    fn app_state(local_port: u16, dir: &std::path::Path) -> AppState {
        let ring = Arc::new(HashRing::new());
        let local = Arc::new(Node::new(
            "127.0.0.1",
            local_port,
            8,
            Duration::from_millis(50),
        ));
        ring.add_node(local.clone());

        let store = Arc::new(ValueStore::new(Arc::new(MemoryEngine::new())));
        let handoff = Arc::new(HandoffQueue::new(Arc::new(MemoryEngine::new())));
        let detector = Arc::new(FailureDetector::new(ring.clone(), 3));
        let coordinator = Arc::new(Coordinator::new(
            local.clone(),
            ring.clone(),
            store.clone(),
            detector,
            handoff.clone(),
            QuorumConfig {
                replicas: 1,
                reads: 1,
                writes: 1,
                deadline: Duration::from_millis(100),
            },
        ));
        let replica = Arc::new(ReplicaHandler::new(store, handoff));
        let gossip = Arc::new(Gossip::new(
            ring.clone(),
            local.clone(),
            GossipConfig {
                fanout: 3,
                interval: Duration::from_secs(3),
                rpc_timeout: Duration::from_millis(50),
                bootstrap_servers: Vec::new(),
                incarnation_path: dir.join("incarnation"),
            },
        ));

        AppState {
            local,
            ring,
            coordinator,
            replica,
            gossip,
        }
    }

    #[test]
    fn test_redirect_points_at_owner() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(7200, dir.path());

        // A second node with enough tokens is bound to own some key.
        let other = Arc::new(Node::new("10.0.0.2", 7200, 32, Duration::from_millis(50)));
        state.ring.add_node(other.clone());

        let foreign_key = (0..1000)
            .map(|i| i.to_string())
            .find(|k| state.ring.find_node(k).unwrap().id() == other.id())
            .expect("some key must map to the other node");

        let redirect = redirect_if_foreign(&state, &foreign_key, "put")
            .unwrap()
            .expect("foreign key must redirect");
        assert_eq!(redirect.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            redirect.headers()[header::LOCATION].to_str().unwrap(),
            format!("http://{}/put", other.full_address())
        );
    }

    #[test]
    fn test_owned_key_is_handled_locally() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(7201, dir.path());
        assert!(redirect_if_foreign(&state, "anything", "get").unwrap().is_none());
    }

    #[test]
    fn test_dedup_values_folds_exact_duplicates() {
        let mut clock = VectorClock::new();
        clock.increment("n1");
        let a = Value::new(b"a".to_vec(), clock.clone());
        let b = Value::new(b"b".to_vec(), clock);

        let unique = dedup_values(vec![a.clone(), a.clone(), b.clone()]);
        assert_eq!(unique, vec![a, b]);
    }

    #[test]
    fn test_decode_context_empty_is_fresh_clock() {
        assert_eq!(decode_context("").unwrap(), VectorClock::new());

        let mut clock = VectorClock::new();
        clock.increment("n1");
        let token = BASE64.encode(Serializer::to_binary(&clock).unwrap());
        assert_eq!(decode_context(&token).unwrap(), clock);
    }
}
