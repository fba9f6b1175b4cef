//! Cadre - Core leader types and message definitions
//!
//! Shared vocabulary for the leader hierarchy engine and the JSON-RPC
//! surface that fronts it: leader identities, the `LeaderNode` record,
//! the legal node shapes, and the request/response envelopes.

pub mod identity;
pub mod messages;
pub mod types;
pub mod error;
pub mod constants;

pub use identity::*;
pub use messages::*;
pub use types::*;
pub use error::*;
pub use constants::*;
