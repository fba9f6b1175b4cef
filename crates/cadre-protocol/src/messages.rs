use serde::{Deserialize, Serialize};

use crate::constants::JSONRPC_VERSION;
use crate::identity::LeaderId;

/// JSON-RPC 2.0 request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl RpcRequest {
    pub fn new(method: &str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            id: Some(uuid::Uuid::new_v4().to_string()),
            params,
        }
    }
}

/// JSON-RPC response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Option<String>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message,
                data: None,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// ── Method Parameters ──

/// Create a new leader record, either detached or as a coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterLeaderParams {
    pub name: String,
    #[serde(default)]
    pub id: Option<LeaderId>,
    #[serde(default)]
    pub coordinator: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetActiveParams {
    pub id: LeaderId,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddSubordinateParams {
    pub parent_id: LeaderId,
    pub leader_id: LeaderId,
}

/// Parameters for every method addressed at a single leader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderParams {
    pub id: LeaderId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveSubtreeParams {
    pub id: LeaderId,
    pub new_parent_id: LeaderId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeParams {
    pub root_id: LeaderId,
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindPathParams {
    pub root_id: LeaderId,
    pub target_id: LeaderId,
}

/// Methods exposed by the hierarchy RPC server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    RegisterLeader,
    SetActive,
    AddSubordinate,
    Remove,
    MoveSubtree,
    Promote,
    GetNode,
    GetTree,
    GetPath,
    CountSubordinates,
    FindPath,
    Stats,
    Audit,
}

impl RpcMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegisterLeader => "hierarchy.register_leader",
            Self::SetActive => "hierarchy.set_active",
            Self::AddSubordinate => "hierarchy.add_subordinate",
            Self::Remove => "hierarchy.remove",
            Self::MoveSubtree => "hierarchy.move_subtree",
            Self::Promote => "hierarchy.promote",
            Self::GetNode => "hierarchy.get_node",
            Self::GetTree => "hierarchy.get_tree",
            Self::GetPath => "hierarchy.get_path",
            Self::CountSubordinates => "hierarchy.count_subordinates",
            Self::FindPath => "hierarchy.find_path",
            Self::Stats => "hierarchy.stats",
            Self::Audit => "hierarchy.audit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "hierarchy.register_leader" => Some(Self::RegisterLeader),
            "hierarchy.set_active" => Some(Self::SetActive),
            "hierarchy.add_subordinate" => Some(Self::AddSubordinate),
            "hierarchy.remove" => Some(Self::Remove),
            "hierarchy.move_subtree" => Some(Self::MoveSubtree),
            "hierarchy.promote" => Some(Self::Promote),
            "hierarchy.get_node" => Some(Self::GetNode),
            "hierarchy.get_tree" => Some(Self::GetTree),
            "hierarchy.get_path" => Some(Self::GetPath),
            "hierarchy.count_subordinates" => Some(Self::CountSubordinates),
            "hierarchy.find_path" => Some(Self::FindPath),
            "hierarchy.stats" => Some(Self::Stats),
            "hierarchy.audit" => Some(Self::Audit),
            _ => None,
        }
    }

    /// Whether the method changes the forest (and so triggers a snapshot).
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::RegisterLeader
                | Self::SetActive
                | Self::AddSubordinate
                | Self::Remove
                | Self::MoveSubtree
                | Self::Promote
        )
    }
}
