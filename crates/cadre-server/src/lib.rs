//! Cadre Server - JSON-RPC front end for the leader hierarchy
//!
//! Wires the subsystems together for a deployment:
//! - Configuration (TOML file, `CADRE_*` environment, CLI flags)
//! - In-memory store with optional snapshot persistence
//! - Hierarchy manager with its limits, locks and deadlines
//!
//! The server exposes a JSON-RPC 2.0 API over TCP, one request per line.

pub mod config;
pub mod rpc_server;

pub use config::ServerConfig;
pub use rpc_server::{RpcServer, ServerState};

use std::sync::Arc;
use std::time::Duration;

use cadre_hierarchy::HierarchyManager;
use cadre_state::InMemoryStore;

/// Build the shared handler state from a configuration.
///
/// Loads the forest snapshot when one is configured and present on disk;
/// starts from an empty forest otherwise.
pub fn build_state(config: &ServerConfig) -> Result<Arc<ServerState>, anyhow::Error> {
    let store = match &config.store.snapshot_path {
        Some(path) if path.exists() => InMemoryStore::load_snapshot(path)?,
        Some(path) => {
            tracing::info!(path = %path.display(), "No snapshot yet, starting with an empty forest");
            InMemoryStore::new()
        }
        None => InMemoryStore::new(),
    };
    let store = Arc::new(store);

    let manager = HierarchyManager::new(store.clone(), config.hierarchy.to_engine_config());

    Ok(Arc::new(ServerState::new(
        manager,
        store,
        config.store.snapshot_path.clone(),
        Duration::from_secs(config.rpc.request_timeout_secs),
    )))
}
