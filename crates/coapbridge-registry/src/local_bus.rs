//! In-process bus transport
//!
//! Keeps the table of exposed object paths for the daemon's bus gateway. The
//! gateway only dispatches to paths present here.

use coapbridge_core::{BusError, BusTransport};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

/// Object table plus the well-known name the bridge answers to
pub struct LocalBus {
    name: String,
    contact_port: u16,
    connected: AtomicBool,
    objects: RwLock<BTreeSet<String>>,
}

impl LocalBus {
    pub fn new(name: impl Into<String>, contact_port: u16) -> Self {
        Self {
            name: name.into(),
            contact_port,
            connected: AtomicBool::new(false),
            objects: RwLock::new(BTreeSet::new()),
        }
    }

    /// Request and advertise the well-known name, then bind the contact port
    pub fn connect(&self) -> Result<(), BusError> {
        if !is_valid_bus_name(&self.name) {
            return Err(BusError::Rejected(format!("invalid bus name {}", self.name)));
        }
        info!(name = %self.name, "Requested well-known name");
        info!(name = %self.name, "Advertised well-known name");
        info!(port = self.contact_port, "Bound session port");
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contact_port(&self) -> u16 {
        self.contact_port
    }

    pub fn is_registered(&self, path: &str) -> bool {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }

    pub fn object_paths(&self) -> Vec<String> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl BusTransport for LocalBus {
    fn register_object(&self, path: &str) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        if !is_valid_object_path(path) {
            return Err(BusError::InvalidPath(path.to_string()));
        }
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        if !objects.insert(path.to_string()) {
            return Err(BusError::AlreadyRegistered(path.to_string()));
        }
        debug!(path = %path, "Bus object registered");
        Ok(())
    }

    fn unregister_object(&self, path: &str) {
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        if objects.remove(path) {
            debug!(path = %path, "Bus object unregistered");
        }
    }
}

/// Absolute, no empty segments, no trailing slash, no query/fragment or
/// whitespace characters
pub fn is_valid_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    path.starts_with('/')
        && !path.ends_with('/')
        && !path.contains("//")
        && !path
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '?' || c == '#')
}

/// Dot-separated elements of `[A-Za-z0-9_-]`, at least two, none starting with a digit
fn is_valid_bus_name(name: &str) -> bool {
    let elements: Vec<&str> = name.split('.').collect();
    elements.len() >= 2
        && elements.iter().all(|e| {
            !e.is_empty()
                && !e.starts_with(|c: char| c.is_ascii_digit())
                && e.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_bus() -> LocalBus {
        let bus = LocalBus::new("com.bridge.coap", 42);
        bus.connect().unwrap();
        bus
    }

    #[test]
    fn test_register_requires_connection() {
        let bus = LocalBus::new("com.bridge.coap", 42);
        assert_eq!(bus.register_object("/a"), Err(BusError::NotConnected));
        bus.connect().unwrap();
        assert!(bus.register_object("/a").is_ok());
    }

    #[test]
    fn test_duplicate_and_invalid_paths() {
        let bus = connected_bus();
        bus.register_object("/sensors/temp").unwrap();
        assert_eq!(
            bus.register_object("/sensors/temp"),
            Err(BusError::AlreadyRegistered("/sensors/temp".to_string()))
        );
        for bad in ["sensors", "/a//b", "/a/", "/a b", "/a?x=1"] {
            assert!(matches!(bus.register_object(bad), Err(BusError::InvalidPath(_))), "{bad}");
        }
        assert_eq!(bus.object_paths(), vec!["/sensors/temp"]);
    }

    #[test]
    fn test_unregister() {
        let bus = connected_bus();
        bus.register_object("/a").unwrap();
        bus.unregister_object("/a");
        bus.unregister_object("/missing");
        assert!(!bus.is_registered("/a"));
    }

    #[test]
    fn test_bus_name_validation() {
        assert!(LocalBus::new("bridge", 42).connect().is_err());
        assert!(LocalBus::new("com.1bad", 42).connect().is_err());
        assert!(connected_bus().is_connected());
    }
}
