use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;

/// Opaque unique identifier of a leader record.
///
/// Ordered so that lock tables can acquire several trees in a stable order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaderId(pub String);

impl LeaderId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse a caller-supplied identifier, rejecting blank strings.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::InvalidLeaderId(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LeaderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for LeaderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims_and_rejects_blank() {
        assert_eq!(LeaderId::parse("  abc ").unwrap(), LeaderId::from("abc"));
        assert!(LeaderId::parse("   ").is_err());
    }

    #[test]
    fn test_generate_unique() {
        assert_ne!(LeaderId::generate(), LeaderId::generate());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let json = serde_json::to_string(&LeaderId::from("c-1")).unwrap();
        assert_eq!(json, "\"c-1\"");
    }
}
