//! Configuration handling for the netconf service.
//!
//! Settings come from a YAML file, then `NETCONF_*` environment variables,
//! then command-line flags (applied by `main`).

use anyhow::{Context, Result};
use netconf_session::{DeviceId, NetconfClientConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Device to keep connected
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Node name used in logs
    pub name: String,
    /// `host:port` of the NETCONF endpoint
    pub address: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "netconf-device".to_string(),
            address: String::new(),
        }
    }
}

/// Netconf service configuration (matches the YAML structure)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NetconfNodeConfig {
    /// Device to connect to
    pub device: DeviceConfig,
    /// Session, keepalive and reconnect settings
    pub client: NetconfClientConfig,
}

impl NetconfNodeConfig {
    /// Load configuration from file and environment variables.
    ///
    /// A missing file means defaults; a file that does not parse is an error.
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => {
                let config = serde_yaml::from_str::<Self>(&content)
                    .with_context(|| format!("failed to parse config file {:?}", path))?;
                info!("Loaded configuration from {:?}", path);
                config
            }
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Device identity for the session layer
    pub fn device_id(&self) -> DeviceId {
        DeviceId::new(self.device.name.clone(), self.device.address.clone())
    }

    /// Apply `NETCONF_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("NETCONF_DEVICE_NAME") {
            info!("Device name overridden by environment: {}", name);
            self.device.name = name;
        }

        if let Some(address) = lookup("NETCONF_DEVICE_ADDRESS") {
            info!("Device address overridden by environment: {}", address);
            self.device.address = address;
        }

        if let Some(delay) = lookup("NETCONF_KEEPALIVE_DELAY") {
            let delay = parse_duration("NETCONF_KEEPALIVE_DELAY", &delay)?;
            self.client.keepalive_delay_secs = delay.as_secs();
            info!("Keepalive delay overridden by environment: {:?}", delay);
        }

        if let Some(timeout) = lookup("NETCONF_REQUEST_TIMEOUT") {
            let timeout = parse_duration("NETCONF_REQUEST_TIMEOUT", &timeout)?;
            self.client.request_timeout_millis = timeout.as_millis() as u64;
            info!("Request timeout overridden by environment: {:?}", timeout);
        }

        if let Some(datastore) = lookup("NETCONF_KEEPALIVE_DATASTORE") {
            self.client.keepalive_datastore = datastore.into();
            info!(
                "Keepalive datastore overridden by environment: {}",
                self.client.keepalive_datastore.as_str()
            );
        }

        if let Some(limit) = lookup("NETCONF_CONCURRENT_RPC_LIMIT") {
            self.client.concurrent_rpc_limit = limit
                .parse()
                .with_context(|| format!("invalid NETCONF_CONCURRENT_RPC_LIMIT {:?}", limit))?;
        }

        if let Some(attempts) = lookup("NETCONF_MAX_CONNECTION_ATTEMPTS") {
            self.client.max_connection_attempts = attempts
                .parse()
                .with_context(|| format!("invalid NETCONF_MAX_CONNECTION_ATTEMPTS {:?}", attempts))?;
        }

        Ok(())
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim()).with_context(|| format!("invalid {} {:?}", key, value))
}
