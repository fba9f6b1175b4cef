//! Forest snapshots: the whole record set as one JSON document.
//!
//! Snapshots are written to a sibling temp file and renamed into place, so
//! a crash mid-write never leaves a truncated snapshot behind.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cadre_protocol::{LeaderNode, SNAPSHOT_VERSION};

use crate::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestSnapshot {
    pub version: u32,
    pub taken_at: DateTime<Utc>,
    pub nodes: Vec<LeaderNode>,
}

impl ForestSnapshot {
    pub fn new(nodes: Vec<LeaderNode>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            taken_at: Utc::now(),
            nodes,
        }
    }

    /// Read and version-check a snapshot file.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: ForestSnapshot = serde_json::from_str(&content)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::UnsupportedSnapshotVersion {
                expected: SNAPSHOT_VERSION,
                got: snapshot.version,
            });
        }
        Ok(snapshot)
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        tracing::debug!(
            path = %path.display(),
            nodes = self.nodes.len(),
            "Forest snapshot written"
        );
        Ok(())
    }
}
