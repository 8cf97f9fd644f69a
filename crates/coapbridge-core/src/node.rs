//! Node and resource types tracked by the resource directory

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Endpoint identifier of a registered node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate an identifier for a node that registered without one
    pub fn temporary() -> Self {
        Self(format!("temp-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A registered remote endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Base address the node is reachable at (e.g. `coap://10.0.0.5`)
    pub context: String,
    /// Registration lifetime in seconds
    pub lifetime_secs: u64,
    /// When the node last (re-)registered
    pub registered_at: DateTime<Utc>,
}

impl Node {
    pub fn new(id: NodeId, context: impl Into<String>, lifetime_secs: u64) -> Self {
        Self {
            id,
            context: context.into(),
            lifetime_secs,
            registered_at: Utc::now(),
        }
    }

    /// Whether the registration lifetime has elapsed at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let secs = i64::try_from(self.lifetime_secs).unwrap_or(i64::MAX);
        let Some(lifetime) = Duration::try_seconds(secs) else {
            return false;
        };
        match self.registered_at.checked_add_signed(lifetime) {
            Some(deadline) => now > deadline,
            None => false,
        }
    }
}

/// Resource path together with the node that owns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub path: String,
    pub owner: NodeId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_node_id() {
        let id = NodeId::temporary();
        assert!(id.as_str().starts_with("temp-"));
        assert_ne!(id, NodeId::temporary());
    }

    #[test]
    fn test_node_expiry() {
        let mut node = Node::new(NodeId::from("node42"), "coap://10.0.0.5", 60);
        let now = Utc::now();
        assert!(!node.is_expired(now));

        node.registered_at = now - Duration::seconds(61);
        assert!(node.is_expired(now));

        node.lifetime_secs = u64::MAX;
        assert!(!node.is_expired(now));
    }
}
