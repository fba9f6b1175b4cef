/// Deepest level a leader may occupy. Level 1 is the coordinator (root).
pub const MAX_LEVEL: u32 = 6;

/// Level assigned to every tree root.
pub const COORDINATOR_LEVEL: u32 = 1;

/// JSON-RPC protocol version.
pub const JSONRPC_VERSION: &str = "2.0";

/// Version tag written into forest snapshots.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Default wall-clock budget for a single hierarchy mutation, in milliseconds.
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 5_000;

/// How many times a mutation re-resolves its tree locks before giving up.
pub const DEFAULT_LOCK_RETRIES: u32 = 3;

// JSON-RPC error codes.
pub const RPC_PARSE_ERROR: i32 = -32700;
pub const RPC_METHOD_NOT_FOUND: i32 = -32601;
pub const RPC_INVALID_PARAMS: i32 = -32602;
pub const RPC_INTERNAL_ERROR: i32 = -32000;
pub const RPC_NOT_FOUND: i32 = -32004;
pub const RPC_DEPTH_LIMIT_EXCEEDED: i32 = -32010;
pub const RPC_CYCLIC_MOVE: i32 = -32011;
pub const RPC_ALREADY_ATTACHED: i32 = -32012;
pub const RPC_ALREADY_COORDINATOR: i32 = -32013;
pub const RPC_DETACHED: i32 = -32014;
pub const RPC_INACTIVE: i32 = -32015;
pub const RPC_DEADLINE_EXCEEDED: i32 = -32020;
pub const RPC_LOCK_CONTENTION: i32 = -32021;
pub const RPC_STORE_ERROR: i32 = -32050;
pub const RPC_CONSISTENCY_VIOLATION: i32 = -32099;
