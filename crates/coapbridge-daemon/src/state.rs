//! Application state management

use anyhow::Result;
use chrono::{DateTime, Utc};
use coapbridge_coap::CoapProxy;
use coapbridge_registry::{Bridge, LocalBus, ObjectManager, ResourceDirectory};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;

/// Shared application state
pub struct AppState {
    /// Bus attachment the mirrored objects live on
    pub bus: Arc<LocalBus>,
    /// Directory and object manager behind one facade
    pub bridge: Bridge,
    /// Configuration
    pub config: Config,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Assemble every service once and start mirroring directory changes
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let bus = Arc::new(LocalBus::new(config.bus.name.clone(), config.bus.contact_port));
        bus.connect()?;

        let (directory, events) = ResourceDirectory::new(config.coap.default_lifetime_secs);
        let directory = Arc::new(directory);
        let proxy = Arc::new(CoapProxy::new(directory.clone(), config.coap.timeout_ms));
        let objects = Arc::new(
            ObjectManager::new(bus.clone(), proxy, &config.bus.name)
                .with_confirmable(config.coap.confirmable),
        );
        let bridge = Bridge::new(directory, objects.clone());

        // Forward directory changes to the bus
        tokio::spawn(async move {
            objects.run(events).await;
        });

        info!(bus = %config.bus.name, "Bridge services started");

        Ok(Arc::new(Self {
            bus,
            bridge,
            config,
            started_at: Utc::now(),
        }))
    }

    /// Drop registrations whose lifetime has run out; returns the removed node count
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let expired = self.bridge.directory().expired_nodes(now);
        for node_id in &expired {
            let removed = self.bridge.on_node_removed(node_id);
            info!(node = %node_id, resources = removed.len(), "Registration expired");
        }
        expired.len()
    }
}
