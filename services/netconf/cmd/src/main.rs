//! NETCONF device session binary.
//!
//! Keeps one device connected: hello exchange, keepalive probing, request
//! deadlines and reconnect with backoff. Optionally reads the running
//! configuration every time the session comes up.

use clap::Parser;
use netconf_session::{
    BaseOperations, Connector, DeviceId, DeviceSchema, KeepaliveFacade, RemoteDeviceHandler,
    RemoteDeviceServices, SessionError, SessionPreferences,
};
use netconf_wire::{Notification, XmlNode};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::NetconfNodeConfig;
use logging::NetconfLogFormatter;

/// NETCONF device session with keepalive and reconnect
#[derive(Parser, Debug)]
#[command(name = "redb-netconf", version, about = "Keeps a NETCONF device session alive")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "netconf.yaml")]
    config: PathBuf,

    /// Device name used in logs
    #[arg(long)]
    device_name: Option<String>,

    /// Device address, e.g. 192.0.2.10:830
    #[arg(long)]
    address: Option<String>,

    /// Idle time before a keepalive probe, e.g. 2m; 0s disables keepalives
    #[arg(long)]
    keepalive_delay: Option<humantime::Duration>,

    /// Deadline for every device request, e.g. 60s
    #[arg(long)]
    request_timeout: Option<humantime::Duration>,

    /// Read the running configuration whenever the session comes up
    #[arg(long)]
    read_on_connect: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(&self, config: &mut NetconfNodeConfig) {
        if let Some(name) = &self.device_name {
            config.device.name = name.clone();
        }
        if let Some(address) = &self.address {
            config.device.address = address.clone();
        }
        if let Some(delay) = self.keepalive_delay {
            config.client.keepalive_delay_secs = Duration::from(delay).as_secs();
        }
        if let Some(timeout) = self.request_timeout {
            config.client.request_timeout_millis = Duration::from(timeout).as_millis() as u64;
        }
    }
}

/// Upper-layer handler of the binary: logs lifecycle events
struct LoggingDeviceHandler {
    id: DeviceId,
    read_on_connect: bool,
}

impl RemoteDeviceHandler for LoggingDeviceHandler {
    fn on_device_connected(
        &self,
        schema: DeviceSchema,
        preferences: SessionPreferences,
        services: RemoteDeviceServices,
    ) {
        component_info!(
            "device",
            "{}: connected, {} modules, candidate={}, notifications={}",
            self.id,
            schema.modules.len(),
            preferences.is_candidate_supported(),
            preferences.is_notifications_supported()
        );

        if !self.read_on_connect {
            return;
        }

        let id = self.id.clone();
        let ops = BaseOperations::from(services.rpcs);
        tokio::spawn(async move {
            match ops.get_config_running_data(&[]).await {
                Ok(data) => component_info!(
                    "device",
                    "{}: running configuration has {} top-level nodes: {}",
                    id,
                    data.children.len(),
                    summarize(&data.children)
                ),
                Err(e) => component_warn!("device", "{}: reading running configuration failed: {}", id, e),
            }
        });
    }

    fn on_device_disconnected(&self) {
        component_info!("device", "{}: disconnected", self.id);
    }

    fn on_device_failed(&self, cause: SessionError) {
        component_error!("device", "{}: failed: {}", self.id, cause);
    }

    fn on_notification(&self, notification: Notification) {
        component_debug!(
            "device",
            "{}: notification at {}: {}",
            self.id,
            notification.event_time.as_deref().unwrap_or("unknown time"),
            summarize(&notification.content)
        );
    }

    fn close(&self) {
        component_info!("device", "{}: handler closed", self.id);
    }
}

fn summarize(nodes: &[XmlNode]) -> String {
    nodes
        .iter()
        .map(|node| node.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("redb_netconf={}", args.log_level).parse()?)
        .add_directive(format!("netconf_session={}", args.log_level).parse()?)
        .add_directive(format!("netconf_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(NetconfLogFormatter::new("netconf"))
        .init();

    info!("Starting reDB NETCONF Service v{}", env!("CARGO_PKG_VERSION"));

    let mut config = NetconfNodeConfig::load_from_file(&args.config)?;
    args.apply(&mut config);

    if config.device.address.is_empty() {
        anyhow::bail!("no device address configured (use --address or NETCONF_DEVICE_ADDRESS)");
    }

    let id = config.device_id();
    info!(
        "{}: address={}, keepalive_delay={:?}, request_timeout={:?}, datastore={}",
        id,
        id.address,
        config.client.keepalive_delay(),
        config.client.request_timeout(),
        config.client.keepalive_datastore.as_str()
    );

    let handler = Arc::new(LoggingDeviceHandler {
        id: id.clone(),
        read_on_connect: args.read_on_connect,
    });
    let facade = Arc::new(KeepaliveFacade::new(id.clone(), handler, &config.client));
    let connector = Connector::new(id, config.client, facade)?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let mut connector_task = tokio::spawn(connector.run(shutdown_rx));

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGTERM handler: {}", e))?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGINT handler: {}", e))?;

    let result = tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
            None
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down");
            None
        }
        joined = &mut connector_task => Some(joined),
    };

    let joined = match result {
        Some(joined) => joined,
        None => {
            if shutdown_tx.send(()).await.is_err() {
                warn!("Connector already stopped");
            }
            connector_task.await
        }
    };

    joined??;
    info!("NETCONF service shutdown complete");
    Ok(())
}
