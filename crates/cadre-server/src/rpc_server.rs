//! JSON-RPC 2.0 server over TCP exposing the hierarchy API.
//!
//! Provides the following methods:
//! - `hierarchy.register_leader` - Create a detached or coordinator record
//! - `hierarchy.set_active` - Flip a leader's activity flag
//! - `hierarchy.add_subordinate` - Attach a detached leader under a parent
//! - `hierarchy.remove` - Detach a leader, reparenting its children
//! - `hierarchy.move_subtree` - Move a leader and its subtree
//! - `hierarchy.promote` - Make a leader the coordinator of its own tree
//! - `hierarchy.get_node` - Fetch one leader record
//! - `hierarchy.get_tree` - Materialize a subtree
//! - `hierarchy.get_path` - Path from the coordinator down to a leader
//! - `hierarchy.count_subordinates` - Recursive subordinate count
//! - `hierarchy.find_path` - Ids on the path from a root to a target
//! - `hierarchy.stats` - Per-level summary of a tree
//! - `hierarchy.audit` - Whole-forest invariant check
//!
//! Each line received is a JSON-RPC request; each line sent is a response.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::Instant;

use cadre_hierarchy::{HierarchyError, HierarchyManager};
use cadre_protocol::*;
use cadre_state::{InMemoryStore, StoreError};

/// Everything a request handler needs.
pub struct ServerState {
    pub manager: HierarchyManager,
    /// Concrete store handle for record-level actions outside the hierarchy
    /// engine (activity flag, snapshots).
    pub store: Arc<InMemoryStore>,
    pub snapshot_path: Option<PathBuf>,
    pub request_timeout: Duration,
    snapshot_lock: Mutex<()>,
}

impl ServerState {
    pub fn new(
        manager: HierarchyManager,
        store: Arc<InMemoryStore>,
        snapshot_path: Option<PathBuf>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            manager,
            store,
            snapshot_path,
            request_timeout,
            snapshot_lock: Mutex::new(()),
        }
    }

    /// Persist the committed forest, if a snapshot path is configured.
    async fn save_snapshot(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let _serialized = self.snapshot_lock.lock().await;
        if let Err(e) = self.store.save_snapshot(path).await {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to write forest snapshot"
            );
        }
    }
}

/// The JSON-RPC 2.0 server.
pub struct RpcServer {
    /// TCP listener address.
    bind_addr: String,
    /// Shared handler state.
    state: Arc<ServerState>,
    /// Maximum concurrent connections.
    max_connections: usize,
}

impl RpcServer {
    pub fn new(bind_addr: String, state: Arc<ServerState>, max_connections: usize) -> Self {
        Self {
            bind_addr,
            state,
            max_connections,
        }
    }

    /// Bind the configured address and serve until an accept error.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), anyhow::Error> {
        tracing::info!(addr = %listener.local_addr()?, "JSON-RPC server listening");

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.max_connections.max(1)));

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            tracing::debug!(peer = %peer_addr, "RPC client connected");

            let state = Arc::clone(&self.state);
            let permit = semaphore.clone().acquire_owned().await?;

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, state).await {
                    tracing::warn!(
                        peer = %peer_addr,
                        error = %e,
                        "RPC connection error"
                    );
                }
                drop(permit);
            });
        }
    }
}

/// Handle a single RPC client connection.
///
/// Reads newline-delimited JSON-RPC requests and sends back responses.
async fn handle_connection(
    stream: tokio::net::TcpStream,
    state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = process_request(&line, &state).await;
        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Process a single JSON-RPC request and return a response.
pub async fn process_request(request_str: &str, state: &ServerState) -> RpcResponse {
    let request: RpcRequest = match serde_json::from_str(request_str) {
        Ok(r) => r,
        Err(e) => {
            return RpcResponse::error(None, RPC_PARSE_ERROR, format!("Invalid JSON: {}", e));
        }
    };

    let id = request.id.clone();
    let Some(method) = RpcMethod::from_str(&request.method) else {
        return RpcResponse::error(
            id,
            RPC_METHOD_NOT_FOUND,
            format!("Unknown method: {}", request.method),
        );
    };

    // The manager enforces the deadline up to commit; anything committed is
    // reported and snapshotted even if verification runs past it.
    let deadline = Instant::now() + state.request_timeout;
    let manager = state.manager.with_deadline(deadline);

    match dispatch(method, &request.params, &manager, state, deadline).await {
        Ok(result) => {
            if method.is_mutation() {
                state.save_snapshot().await;
            }
            RpcResponse::success(id, result)
        }
        Err(failure) => failure.into_response(id, method),
    }
}

/// Why a request failed before producing a result.
enum Failure {
    InvalidParams(String),
    Hierarchy(HierarchyError),
}

impl From<HierarchyError> for Failure {
    fn from(err: HierarchyError) -> Self {
        Failure::Hierarchy(err)
    }
}

impl From<StoreError> for Failure {
    fn from(err: StoreError) -> Self {
        Failure::Hierarchy(err.into())
    }
}

impl Failure {
    fn into_response(self, id: Option<String>, method: RpcMethod) -> RpcResponse {
        match self {
            Failure::InvalidParams(message) => {
                RpcResponse::error(id, RPC_INVALID_PARAMS, message)
            }
            Failure::Hierarchy(err) => {
                let code = error_code(&err);
                if err.is_fatal() {
                    tracing::error!(method = method.as_str(), error = %err, "Fatal hierarchy error");
                }
                RpcResponse::error(id, code, err.to_string())
            }
        }
    }
}

/// Stable JSON-RPC code for each hierarchy failure.
pub fn error_code(err: &HierarchyError) -> i32 {
    match err {
        HierarchyError::NotFound(_) => RPC_NOT_FOUND,
        HierarchyError::DepthLimitExceeded { .. } => RPC_DEPTH_LIMIT_EXCEEDED,
        HierarchyError::CyclicMove { .. } => RPC_CYCLIC_MOVE,
        HierarchyError::AlreadyAttached(_) => RPC_ALREADY_ATTACHED,
        HierarchyError::AlreadyCoordinator(_) => RPC_ALREADY_COORDINATOR,
        HierarchyError::Detached(_) => RPC_DETACHED,
        HierarchyError::Inactive(_) => RPC_INACTIVE,
        HierarchyError::DeadlineExceeded(_) => RPC_DEADLINE_EXCEEDED,
        HierarchyError::LockContention { .. } => RPC_LOCK_CONTENTION,
        HierarchyError::ConsistencyViolation(_) => RPC_CONSISTENCY_VIOLATION,
        HierarchyError::Store(StoreError::NotFound(_)) => RPC_NOT_FOUND,
        HierarchyError::Store(StoreError::DuplicateId(_)) => RPC_INVALID_PARAMS,
        HierarchyError::Store(_) => RPC_STORE_ERROR,
    }
}

fn parse_params<T: DeserializeOwned>(params: &serde_json::Value) -> Result<T, Failure> {
    serde_json::from_value(params.clone())
        .map_err(|e| Failure::InvalidParams(ProtocolError::from(e).to_string()))
}

fn to_value<T: Serialize>(value: T) -> Result<serde_json::Value, Failure> {
    serde_json::to_value(value).map_err(|e| Failure::Hierarchy(StoreError::from(e).into()))
}

/// Reject blank ids before they reach the store.
fn checked(id: &LeaderId) -> Result<LeaderId, Failure> {
    LeaderId::parse(id.as_str()).map_err(|e| Failure::InvalidParams(e.to_string()))
}

async fn dispatch(
    method: RpcMethod,
    params: &serde_json::Value,
    manager: &HierarchyManager,
    state: &ServerState,
    deadline: Instant,
) -> Result<serde_json::Value, Failure> {
    match method {
        RpcMethod::RegisterLeader => handle_register_leader(params, manager).await,
        RpcMethod::SetActive => handle_set_active(params, state, deadline).await,
        RpcMethod::AddSubordinate => {
            let p: AddSubordinateParams = parse_params(params)?;
            let node = manager
                .add_subordinate(&checked(&p.parent_id)?, &checked(&p.leader_id)?)
                .await?;
            to_value(node)
        }
        RpcMethod::Remove => {
            let p: LeaderParams = parse_params(params)?;
            to_value(manager.remove_from_hierarchy(&checked(&p.id)?).await?)
        }
        RpcMethod::MoveSubtree => {
            let p: MoveSubtreeParams = parse_params(params)?;
            let outcome = manager
                .move_subtree(&checked(&p.id)?, &checked(&p.new_parent_id)?)
                .await?;
            to_value(outcome)
        }
        RpcMethod::Promote => {
            let p: LeaderParams = parse_params(params)?;
            to_value(manager.promote_to_coordinator(&checked(&p.id)?).await?)
        }
        RpcMethod::GetNode => {
            let p: LeaderParams = parse_params(params)?;
            to_value(manager.get_node(&checked(&p.id)?).await?)
        }
        RpcMethod::GetTree => {
            let p: TreeParams = parse_params(params)?;
            to_value(manager.get_tree(&checked(&p.root_id)?, p.include_inactive).await?)
        }
        RpcMethod::GetPath => {
            let p: LeaderParams = parse_params(params)?;
            to_value(manager.get_hierarchy_path(&checked(&p.id)?).await?)
        }
        RpcMethod::CountSubordinates => {
            let p: LeaderParams = parse_params(params)?;
            let count = manager.count_subordinates(&checked(&p.id)?).await?;
            Ok(serde_json::json!({ "count": count }))
        }
        RpcMethod::FindPath => {
            let p: FindPathParams = parse_params(params)?;
            let path = manager
                .find_path_to_node(&checked(&p.root_id)?, &checked(&p.target_id)?)
                .await?;
            // Sorted so responses are stable.
            let ids = path.map(|set| {
                let mut ids: Vec<LeaderId> = set.into_iter().collect();
                ids.sort();
                ids
            });
            to_value(ids)
        }
        RpcMethod::Stats => {
            let p: TreeParams = parse_params(params)?;
            to_value(manager.tree_stats(&checked(&p.root_id)?).await?)
        }
        RpcMethod::Audit => {
            let violations = manager.audit().await?;
            Ok(serde_json::json!({
                "consistent": violations.is_empty(),
                "violations": violations,
            }))
        }
    }
}

/// Handle `hierarchy.register_leader` - create a fresh record.
async fn handle_register_leader(
    params: &serde_json::Value,
    manager: &HierarchyManager,
) -> Result<serde_json::Value, Failure> {
    let p: RegisterLeaderParams = parse_params(params)?;
    let name = p.name.trim();
    if name.is_empty() {
        return Err(Failure::InvalidParams("Leader name must not be empty".into()));
    }
    let id = match &p.id {
        Some(id) => checked(id)?,
        None => LeaderId::generate(),
    };

    let node = if p.coordinator {
        LeaderNode::coordinator(id, name)
    } else {
        LeaderNode::detached(id, name)
    };
    let node = manager.register_leader(node).await?;

    tracing::info!(
        leader = %node.id,
        coordinator = node.is_coordinator,
        "Leader registered"
    );
    to_value(node)
}

/// Handle `hierarchy.set_active` - flip the activity flag.
///
/// Activity is a record attribute, not part of the tree shape, so this
/// bypasses the hierarchy engine and its tree locks.
async fn handle_set_active(
    params: &serde_json::Value,
    state: &ServerState,
    deadline: Instant,
) -> Result<serde_json::Value, Failure> {
    let p: SetActiveParams = parse_params(params)?;
    let leader = checked(&p.id)?;
    let node = tokio::time::timeout_at(deadline, state.store.set_active(&leader, p.active))
        .await
        .map_err(|_| {
            tracing::warn!(leader = %leader, "Activity change timed out");
            Failure::Hierarchy(HierarchyError::DeadlineExceeded("set_active"))
        })??;
    tracing::info!(leader = %node.id, active = node.is_active, "Leader activity changed");
    to_value(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            HierarchyError::NotFound("a".into()),
            HierarchyError::DepthLimitExceeded {
                leader: "a".into(),
                attempted: 7,
                max: 6,
            },
            HierarchyError::CyclicMove {
                node: "a".into(),
                target: "b".into(),
            },
            HierarchyError::AlreadyAttached("a".into()),
            HierarchyError::AlreadyCoordinator("a".into()),
            HierarchyError::Detached("a".into()),
            HierarchyError::Inactive("a".into()),
            HierarchyError::DeadlineExceeded("op"),
            HierarchyError::LockContention {
                operation: "op",
                attempts: 3,
            },
            HierarchyError::ConsistencyViolation("x".into()),
        ];
        let codes: std::collections::HashSet<i32> = errors.iter().map(error_code).collect();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_store_errors_mapped() {
        let err = HierarchyError::Store(StoreError::NotFound("a".into()));
        assert_eq!(error_code(&err), RPC_NOT_FOUND);
        let err = HierarchyError::Store(StoreError::Backend("down".into()));
        assert_eq!(error_code(&err), RPC_STORE_ERROR);
    }
}
