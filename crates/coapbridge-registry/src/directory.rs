//! Resource directory: which node owns which path, and where nodes live
//!
//! The directory never talks to the bus. Every change to the resource map is
//! published as a [`DirectoryEvent`] while the write lock is still held, so
//! the object manager sees additions and removals in the order they were
//! committed. Delivery is fire-and-forget: a resource is visible here before
//! its bus object exists.

use chrono::{DateTime, Utc};
use coapbridge_core::{Node, NodeId, ResourceEntry};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Resource lifecycle change published by the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryEvent {
    /// A path was registered (or re-registered)
    ResourceAdded(String),
    /// A path left the directory
    ResourceRemoved(String),
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<NodeId, Node>,
    resources: HashMap<String, NodeId>,
}

/// Registration state for nodes and their resources
pub struct ResourceDirectory {
    inner: RwLock<Inner>,
    events: mpsc::UnboundedSender<DirectoryEvent>,
    default_lifetime_secs: u64,
}

impl ResourceDirectory {
    /// Create an empty directory and the receiving end of its event stream
    pub fn new(default_lifetime_secs: u64) -> (Self, mpsc::UnboundedReceiver<DirectoryEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let directory = Self {
            inner: RwLock::new(Inner::default()),
            events,
            default_lifetime_secs,
        };
        (directory, rx)
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lifetime applied when a registration names none
    pub fn default_lifetime_secs(&self) -> u64 {
        self.default_lifetime_secs
    }

    /// Insert or overwrite the context of a node
    pub fn register_context(&self, node_id: &NodeId, context: &str) {
        let mut inner = self.write();
        self.upsert_context(&mut inner, node_id, context);
    }

    fn upsert_context(&self, inner: &mut Inner, node_id: &NodeId, context: &str) {
        match inner.nodes.get_mut(node_id) {
            Some(node) => {
                if node.context != context {
                    debug!(node = %node_id, context = %context, "Node context updated");
                }
                node.context = context.to_string();
            }
            None => {
                inner.nodes.insert(
                    node_id.clone(),
                    Node::new(node_id.clone(), context, self.default_lifetime_secs),
                );
            }
        }
    }

    pub fn get_context(&self, node_id: &NodeId) -> Option<String> {
        self.read().nodes.get(node_id).map(|n| n.context.clone())
    }

    /// Forget a node; its resources go with it
    pub fn remove_context(&self, node_id: &NodeId) {
        self.remove_node(node_id);
    }

    /// Record a full (re-)registration, restarting the node's lifetime
    pub fn register_node(&self, node_id: &NodeId, context: &str, lifetime_secs: u64) -> Node {
        let node = Node::new(node_id.clone(), context, lifetime_secs);
        self.write().nodes.insert(node_id.clone(), node.clone());
        info!(node = %node_id, context = %context, lifetime = lifetime_secs, "Node registered");
        node
    }

    /// Restart a node's lifetime; false if the node is unknown
    pub fn refresh_node(&self, node_id: &NodeId) -> bool {
        match self.write().nodes.get_mut(node_id) {
            Some(node) => {
                node.registered_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Record `path` as owned by `node`, (re)register the node's context and
    /// signal the new resource
    pub fn add_entry(&self, node: &Node, path: &str) {
        let mut inner = self.write();

        if let Some(previous) = inner.resources.insert(path.to_string(), node.id.clone()) {
            if previous != node.id {
                warn!(
                    path = %path,
                    previous = %previous,
                    node = %node.id,
                    "Resource ownership moved to another node"
                );
            }
        }
        self.upsert_context(&mut inner, &node.id, &node.context);

        debug!(path = %path, node = %node.id, "Resource registered");
        let _ = self.events.send(DirectoryEvent::ResourceAdded(path.to_string()));
    }

    /// Remove every resource whose path starts with `prefix`
    pub fn remove_resources_under(&self, prefix: &str) -> Vec<String> {
        let mut inner = self.write();
        let mut removed: Vec<String> = inner
            .resources
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect();
        removed.sort();

        for path in &removed {
            inner.resources.remove(path);
            let _ = self.events.send(DirectoryEvent::ResourceRemoved(path.clone()));
        }

        if !removed.is_empty() {
            info!(prefix = %prefix, count = removed.len(), "Resources removed");
        }
        removed
    }

    /// Remove a node and every resource it owns, returning the removed paths
    pub fn remove_node(&self, node_id: &NodeId) -> Vec<String> {
        let mut inner = self.write();
        let mut removed: Vec<String> = inner
            .resources
            .iter()
            .filter(|(_, owner)| *owner == node_id)
            .map(|(path, _)| path.clone())
            .collect();
        removed.sort();

        for path in &removed {
            inner.resources.remove(path);
            let _ = self.events.send(DirectoryEvent::ResourceRemoved(path.clone()));
        }

        if inner.nodes.remove(node_id).is_some() {
            info!(node = %node_id, resources = removed.len(), "Node removed");
        }
        removed
    }

    pub fn owner_of(&self, path: &str) -> Option<NodeId> {
        self.read().resources.get(path).cloned()
    }

    /// Context of the node owning `path`
    pub fn context_for_path(&self, path: &str) -> Option<String> {
        let inner = self.read();
        let owner = inner.resources.get(path)?;
        inner.nodes.get(owner).map(|n| n.context.clone())
    }

    pub fn get_node(&self, node_id: &NodeId) -> Option<Node> {
        self.read().nodes.get(node_id).cloned()
    }

    /// Nodes whose registration lifetime has elapsed at `now`
    pub fn expired_nodes(&self, now: DateTime<Utc>) -> Vec<NodeId> {
        let mut expired: Vec<NodeId> = self
            .read()
            .nodes
            .values()
            .filter(|n| n.is_expired(now))
            .map(|n| n.id.clone())
            .collect();
        expired.sort();
        expired
    }

    /// All resources, sorted by path
    pub fn list_resources(&self) -> Vec<ResourceEntry> {
        let mut entries: Vec<ResourceEntry> = self
            .read()
            .resources
            .iter()
            .map(|(path, owner)| ResourceEntry {
                path: path.clone(),
                owner: owner.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    /// All registered nodes, sorted by identifier
    pub fn list_contexts(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.read().nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn drain(rx: &mut mpsc::UnboundedReceiver<DirectoryEvent>) -> Vec<DirectoryEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_register_context_overwrites() {
        let (directory, _rx) = ResourceDirectory::new(86400);
        let id = NodeId::from("node42");

        directory.register_context(&id, "coap://10.0.0.5");
        assert_eq!(directory.get_context(&id).as_deref(), Some("coap://10.0.0.5"));

        directory.register_context(&id, "coap://10.0.0.6");
        assert_eq!(directory.get_context(&id).as_deref(), Some("coap://10.0.0.6"));
        assert_eq!(directory.list_contexts().len(), 1);
    }

    #[test]
    fn test_remove_context_absent_is_noop() {
        let (directory, mut rx) = ResourceDirectory::new(86400);
        directory.remove_context(&NodeId::from("ghost"));
        assert!(directory.list_contexts().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_add_entry_registers_context_and_signals() {
        let (directory, mut rx) = ResourceDirectory::new(86400);
        let node = Node::new(NodeId::from("node42"), "coap://10.0.0.5", 86400);

        directory.add_entry(&node, "/sensors/temp");

        assert_eq!(directory.owner_of("/sensors/temp"), Some(node.id.clone()));
        assert_eq!(directory.get_context(&node.id).as_deref(), Some("coap://10.0.0.5"));
        assert_eq!(
            directory.context_for_path("/sensors/temp").as_deref(),
            Some("coap://10.0.0.5")
        );
        assert_eq!(
            drain(&mut rx),
            vec![DirectoryEvent::ResourceAdded("/sensors/temp".to_string())]
        );
    }

    #[test]
    fn test_add_entry_updates_changed_context() {
        let (directory, _rx) = ResourceDirectory::new(86400);
        let mut node = Node::new(NodeId::from("node42"), "coap://10.0.0.5", 86400);
        directory.add_entry(&node, "/a");

        node.context = "coap://10.0.0.9".to_string();
        directory.add_entry(&node, "/b");
        assert_eq!(directory.context_for_path("/a").as_deref(), Some("coap://10.0.0.9"));
    }

    #[test]
    fn test_remove_resources_under_prefix() {
        let (directory, mut rx) = ResourceDirectory::new(86400);
        let node = Node::new(NodeId::from("node42"), "coap://10.0.0.5", 86400);
        for path in ["/node42/temp", "/node42/light", "/node7/temp"] {
            directory.add_entry(&node, path);
        }
        drain(&mut rx);

        let removed = directory.remove_resources_under("/node42");
        assert_eq!(removed, vec!["/node42/light", "/node42/temp"]);

        let remaining: Vec<String> = directory.list_resources().into_iter().map(|e| e.path).collect();
        assert_eq!(remaining, vec!["/node7/temp"]);
        assert_eq!(
            drain(&mut rx),
            vec![
                DirectoryEvent::ResourceRemoved("/node42/light".to_string()),
                DirectoryEvent::ResourceRemoved("/node42/temp".to_string()),
            ]
        );
    }

    #[test]
    fn test_remove_node_cascades() {
        let (directory, mut rx) = ResourceDirectory::new(86400);
        let a = Node::new(NodeId::from("a"), "coap://10.0.0.1", 86400);
        let b = Node::new(NodeId::from("b"), "coap://10.0.0.2", 86400);
        directory.add_entry(&a, "/temp");
        directory.add_entry(&b, "/temp2");
        drain(&mut rx);

        let removed = directory.remove_node(&a.id);
        assert_eq!(removed, vec!["/temp"]);
        assert_eq!(directory.get_context(&a.id), None);
        assert_eq!(directory.owner_of("/temp2"), Some(b.id.clone()));
        assert_eq!(
            drain(&mut rx),
            vec![DirectoryEvent::ResourceRemoved("/temp".to_string())]
        );
    }

    #[test]
    fn test_every_resource_has_a_context() {
        let (directory, _rx) = ResourceDirectory::new(86400);
        let node = Node::new(NodeId::from("n"), "coap://10.0.0.1", 86400);
        directory.add_entry(&node, "/x");
        directory.remove_context(&node.id);

        assert!(directory.list_resources().is_empty());
        assert!(directory.list_contexts().is_empty());
    }

    #[test]
    fn test_ownership_transfer() {
        let (directory, _rx) = ResourceDirectory::new(86400);
        let a = Node::new(NodeId::from("a"), "coap://10.0.0.1", 86400);
        let b = Node::new(NodeId::from("b"), "coap://10.0.0.2", 86400);
        directory.add_entry(&a, "/shared");
        directory.add_entry(&b, "/shared");

        assert_eq!(directory.owner_of("/shared"), Some(b.id));
        assert_eq!(directory.list_resources().len(), 1);
    }

    #[test]
    fn test_expired_nodes() {
        let (directory, _rx) = ResourceDirectory::new(86400);
        directory.register_node(&NodeId::from("short"), "coap://10.0.0.1", 10);
        directory.register_node(&NodeId::from("long"), "coap://10.0.0.2", 3600);

        let later = Utc::now() + Duration::seconds(60);
        assert_eq!(directory.expired_nodes(later), vec![NodeId::from("short")]);
        assert!(directory.expired_nodes(Utc::now()).is_empty());

        assert!(directory.refresh_node(&NodeId::from("short")));
        assert!(!directory.refresh_node(&NodeId::from("ghost")));
    }
}
