//! NETCONF device sessions: base operations, request deadlines, keepalives and reconnect.
//!
//! This crate sits between a framed NETCONF transport and the upper layer that
//! consumes a device. It owns the liveness policy of a session: requests get a
//! deadline, idle sessions are probed with an empty-filter `get-config`, and a
//! failed probe or timed-out request asks the connection layer to reconnect.
//!
//! ## Features
//!
//! - **Base operations**: lock, unlock, commit, validate, get, get-config,
//!   edit-config, copy-config and discard-changes as typed calls
//! - **Request guard**: every device request carries a deadline and suppresses
//!   keepalive probing while it is in flight
//! - **Keepalive**: one probe task per session, rescheduled by activity
//! - **Reconnect**: at most one reconnect per failed session
//! - **Communicator / Connector**: message-id correlation over a framed stream,
//!   TCP connect with exponential backoff
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use netconf_session::{Connector, DeviceId, KeepaliveFacade, NetconfClientConfig, RemoteDeviceHandler};
//! use tokio::sync::mpsc;
//!
//! # async fn example(handler: Arc<dyn RemoteDeviceHandler>) -> anyhow::Result<()> {
//! let id = DeviceId::new("edge-1", "192.0.2.10:830");
//! let config = NetconfClientConfig::default();
//! let facade = Arc::new(KeepaliveFacade::new(id.clone(), handler, &config));
//!
//! let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
//! Connector::new(id, config, facade)?.run(shutdown_rx).await
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod base_ops;
pub mod communicator;
pub mod config;
pub mod connector;
pub mod device;
pub mod error;
pub mod facade;
pub mod handler;
pub mod handshake;
pub mod keepalive;
pub mod reconnect;
pub mod rpc;
pub mod timeout;

// Re-export main types
pub use base_ops::BaseOperations;
pub use communicator::NetconfCommunicator;
pub use config::NetconfClientConfig;
pub use connector::{Backoff, Connector};
pub use device::DeviceId;
pub use error::SessionError;
pub use facade::KeepaliveFacade;
pub use handler::{RemoteDeviceHandler, RemoteDeviceServices};
pub use handshake::{client_handshake, DeviceSchema, HandshakeOutcome, SchemaModule, SessionPreferences};
pub use keepalive::{KeepaliveHandle, KeepaliveSettings};
pub use reconnect::{ReconnectCoordinator, SessionListener, SessionReconnect};
pub use rpc::{DeviceRpc, RpcInvoker, RpcResult, SchemalessRpc};
pub use timeout::{with_deadline, RequestGuard};
