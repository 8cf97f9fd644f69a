//! Bus objects mirroring registered resources
//!
//! One [`BusObject`] exists per mirrored resource path. Registration and
//! removal happen under the write lock of the object table; method calls only
//! take the read lock to resolve their target and run the upstream exchange
//! with no lock held.

use coapbridge_core::{
    BridgeError, BusTransport, Proxy, ProxyError, RequestCode, RequestMessage, ResponseMessage,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::directory::DirectoryEvent;
use crate::translate::{to_proxy_request, to_response_message};

/// Bus-facing stand-in for a registered resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusObject {
    pub path: String,
    pub interface: String,
}

/// Owns the live set of mirrored bus objects
pub struct ObjectManager {
    bus: Arc<dyn BusTransport>,
    proxy: Arc<dyn Proxy>,
    interface: String,
    confirmable: bool,
    objects: RwLock<BTreeMap<String, BusObject>>,
}

impl ObjectManager {
    /// Create an object manager exposing objects under `<bus_name>.Resource`
    pub fn new(bus: Arc<dyn BusTransport>, proxy: Arc<dyn Proxy>, bus_name: &str) -> Self {
        Self {
            bus,
            proxy,
            interface: format!("{}.Resource", bus_name),
            confirmable: true,
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Whether outbound requests ask for confirmable delivery
    pub fn with_confirmable(mut self, confirmable: bool) -> Self {
        self.confirmable = confirmable;
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, BusObject>> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, BusObject>> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mirror `path` on the bus
    ///
    /// A path that is already mirrored is left as is. A bus rejection is
    /// logged and returned; the path simply stays unmirrored.
    pub fn add_resource(&self, path: &str) -> Result<(), BridgeError> {
        let mut objects = self.write();
        if objects.contains_key(path) {
            debug!(path = %path, "Resource already mirrored");
            return Ok(());
        }

        if let Err(e) = self.bus.register_object(path) {
            warn!(path = %path, error = %e, "Bus object registration failed");
            return Err(BridgeError::RegistrationFailed {
                path: path.to_string(),
                reason: e.to_string(),
            });
        }

        objects.insert(
            path.to_string(),
            BusObject {
                path: path.to_string(),
                interface: self.interface.clone(),
            },
        );
        info!(path = %path, "Resource mirrored on bus");
        Ok(())
    }

    /// Withdraw every mirror whose path starts with `prefix`
    pub fn remove_resource(&self, prefix: &str) -> Vec<String> {
        let mut objects = self.write();
        let matched: Vec<String> = objects
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect();

        for path in &matched {
            self.bus.unregister_object(path);
            objects.remove(path);
        }

        if !matched.is_empty() {
            info!(prefix = %prefix, count = matched.len(), "Mirrors removed from bus");
        }
        matched
    }

    fn remove_exact(&self, path: &str) -> bool {
        let mut objects = self.write();
        if objects.remove(path).is_some() {
            self.bus.unregister_object(path);
            info!(path = %path, "Mirror removed from bus");
            true
        } else {
            false
        }
    }

    pub fn is_mirrored(&self, path: &str) -> bool {
        self.read().contains_key(path)
    }

    pub fn list_objects(&self) -> Vec<BusObject> {
        self.read().values().cloned().collect()
    }

    /// Translate a bus method call into an upstream exchange and its reply
    pub async fn handle_method_call(
        &self,
        path: &str,
        code: RequestCode,
        message: &RequestMessage,
    ) -> Result<ResponseMessage, BridgeError> {
        if !self.read().contains_key(path) {
            return Err(BridgeError::NotFound(path.to_string()));
        }

        let request = to_proxy_request(path, code, message, self.confirmable);
        debug!(
            path = %path,
            code = %code,
            query = %request.options.uri_query,
            "Forwarding method call"
        );

        match self.proxy.exchange(request).await {
            Ok(response) => {
                debug!(path = %path, code = %response.code, "Upstream response");
                Ok(to_response_message(response))
            }
            // the owning node went away while the call was in flight
            Err(ProxyError::NoContext(_)) => Err(BridgeError::NotFound(path.to_string())),
            Err(e) => {
                warn!(path = %path, error = %e, "Upstream exchange failed");
                Err(BridgeError::UpstreamExchangeFailed(e.to_string()))
            }
        }
    }

    /// Apply one directory change
    pub fn apply(&self, event: &DirectoryEvent) {
        match event {
            DirectoryEvent::ResourceAdded(path) => {
                let _ = self.add_resource(path);
            }
            DirectoryEvent::ResourceRemoved(path) => {
                self.remove_exact(path);
            }
        }
    }

    /// Apply every directory change already queued, returning how many
    pub fn drain(&self, events: &mut mpsc::UnboundedReceiver<DirectoryEvent>) -> usize {
        let mut applied = 0;
        while let Ok(event) = events.try_recv() {
            self.apply(&event);
            applied += 1;
        }
        applied
    }

    /// Follow the directory until its event stream closes
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<DirectoryEvent>) {
        while let Some(event) = events.recv().await {
            self.apply(&event);
        }
        info!("Directory event stream closed");
    }
}
