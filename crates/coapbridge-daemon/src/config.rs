//! Configuration loading and validation

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub coap: CoapConfig,
    #[serde(default)]
    pub bus: BusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for the HTTP gateway and diagnostics API
    #[serde(default = "default_bind")]
    pub bind: String,
    /// How often expired registrations are swept, in seconds; 0 disables the sweep
    #[serde(default = "default_sweep_interval")]
    pub expiry_sweep_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            expiry_sweep_secs: default_sweep_interval(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_sweep_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoapConfig {
    /// UDP bind address of the resource directory endpoint
    #[serde(default = "default_coap_bind")]
    pub bind: String,
    /// Exchange timeout towards nodes
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Send forwarded requests as confirmable messages
    #[serde(default = "default_true")]
    pub confirmable: bool,
    /// Lifetime for registrations that carry no `lt`
    #[serde(default = "default_lifetime")]
    pub default_lifetime_secs: u64,
}

impl Default for CoapConfig {
    fn default() -> Self {
        Self {
            bind: default_coap_bind(),
            timeout_ms: default_timeout_ms(),
            confirmable: true,
            default_lifetime_secs: default_lifetime(),
        }
    }
}

fn default_coap_bind() -> String {
    "0.0.0.0:5683".to_string()
}

fn default_timeout_ms() -> u64 {
    coapbridge_coap::DEFAULT_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

fn default_lifetime() -> u64 {
    86400 // one day
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Well-known name requested on the bus
    #[serde(default = "default_bus_name")]
    pub name: String,
    /// Session port joiners connect to
    #[serde(default = "default_contact_port")]
    pub contact_port: u16,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            name: default_bus_name(),
            contact_port: default_contact_port(),
        }
    }
}

fn default_bus_name() -> String {
    "com.bridge.coap".to_string()
}

fn default_contact_port() -> u16 {
    42
}

impl Config {
    /// Reject values the services cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.coap.timeout_ms == 0 {
            bail!("coap.timeout_ms must be greater than zero");
        }
        Ok(())
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        config
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Config::default()
    };
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Sweep period, or `None` when the sweep is disabled
    pub fn sweep_interval(&self) -> Option<Duration> {
        match self.daemon.expiry_sweep_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
