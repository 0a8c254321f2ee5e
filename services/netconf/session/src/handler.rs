//! Upper-layer device handler contract.

use netconf_wire::Notification;

use crate::error::SessionError;
use crate::handshake::{DeviceSchema, SessionPreferences};
use crate::rpc::DeviceRpc;

/// Services a connected device offers to upper layers
#[derive(Debug, Clone)]
pub struct RemoteDeviceServices {
    /// RPC service of the session
    pub rpcs: DeviceRpc,
}

impl RemoteDeviceServices {
    /// Wrap an RPC service
    pub fn new(rpcs: DeviceRpc) -> Self {
        Self { rpcs }
    }
}

/// Receives device lifecycle events
pub trait RemoteDeviceHandler: Send + Sync {
    /// Session is up and ready for requests
    fn on_device_connected(
        &self,
        schema: DeviceSchema,
        preferences: SessionPreferences,
        services: RemoteDeviceServices,
    );

    /// Session went away; the connection layer may re-establish it
    fn on_device_disconnected(&self);

    /// Session could not be established
    fn on_device_failed(&self, cause: SessionError);

    /// Asynchronous event notification from the device
    fn on_notification(&self, notification: Notification);

    /// Release resources; called once when the device is removed
    fn close(&self) {}
}
