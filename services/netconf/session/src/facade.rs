//! Keepalive-instrumented device handler.
//!
//! [`KeepaliveFacade`] sits between the connection layer and the upper-layer
//! handler. On connect it starts the session's keepalive task and hands the
//! upper layer an RPC service whose every request runs through the
//! [`RequestGuard`]; all other events are passed through unchanged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use netconf_wire::{Notification, XmlNode};
use tracing::{debug, info};

use crate::config::NetconfClientConfig;
use crate::device::DeviceId;
use crate::error::SessionError;
use crate::handler::{RemoteDeviceHandler, RemoteDeviceServices};
use crate::handshake::{DeviceSchema, SessionPreferences};
use crate::keepalive::{KeepaliveHandle, KeepaliveSettings};
use crate::reconnect::{ReconnectCoordinator, SessionListener};
use crate::rpc::{DeviceRpc, RpcInvoker, RpcResult, SchemalessRpc};
use crate::timeout::RequestGuard;

/// Device handler adding keepalives, request deadlines and reconnect-on-failure
pub struct KeepaliveFacade {
    id: DeviceId,
    handler: Arc<dyn RemoteDeviceHandler>,
    settings: KeepaliveSettings,
    coordinator: ReconnectCoordinator,
    closed: AtomicBool,
}

impl KeepaliveFacade {
    /// Wrap `handler`; a zero keepalive delay disables probing but keeps deadlines
    pub fn new(
        id: DeviceId,
        handler: Arc<dyn RemoteDeviceHandler>,
        config: &NetconfClientConfig,
    ) -> Self {
        Self {
            coordinator: ReconnectCoordinator::new(id.clone()),
            id,
            handler,
            settings: KeepaliveSettings::from(config),
            closed: AtomicBool::new(false),
        }
    }

    /// Attach the transport listener of the session about to connect
    pub fn set_listener(&self, listener: Arc<dyn SessionListener>) {
        self.coordinator.set_listener(listener);
    }

    /// Stop keepalives and disconnect the current session
    pub fn reconnect(&self) -> Result<(), SessionError> {
        self.coordinator.reconnect()
    }

    /// Stop the current keepalive task; idempotent
    pub fn stop_keepalives(&self) {
        self.coordinator.stop_keepalives();
    }

    /// Keepalive of the current session, if one is running
    pub fn keepalive(&self) -> Option<KeepaliveHandle> {
        self.coordinator.keepalive()
    }

    /// True after [`RemoteDeviceHandler::close`]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl RemoteDeviceHandler for KeepaliveFacade {
    fn on_device_connected(
        &self,
        schema: DeviceSchema,
        preferences: SessionPreferences,
        services: RemoteDeviceServices,
    ) {
        let session = self.coordinator.begin_session();

        let keepalive = if self.settings.delay.is_zero() {
            debug!("{}: keepalives disabled", self.id);
            None
        } else {
            let handle = KeepaliveHandle::spawn(
                self.id.clone(),
                self.settings.clone(),
                services.rpcs.clone(),
                session.clone(),
            );
            self.coordinator.attach_keepalive(&session, handle.clone());
            Some(handle)
        };

        debug!(
            "{}: session {} initialized, keepalive delay {:?}",
            self.id,
            session.generation(),
            self.settings.delay
        );

        let guard = RequestGuard::new(keepalive, session, self.settings.request_timeout);
        let rpcs = wrap_rpcs(services.rpcs, guard);
        self.handler
            .on_device_connected(schema, preferences, RemoteDeviceServices::new(rpcs));
    }

    fn on_device_disconnected(&self) {
        self.stop_keepalives();
        self.handler.on_device_disconnected();
    }

    fn on_device_failed(&self, cause: SessionError) {
        self.stop_keepalives();
        self.handler.on_device_failed(cause);
    }

    fn on_notification(&self, notification: Notification) {
        if let Some(keepalive) = self.coordinator.keepalive() {
            keepalive.record_activity();
        }
        self.handler.on_notification(notification);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("{}: closing device handler", self.id);
        self.coordinator.release();
        self.handler.close();
    }
}

fn wrap_rpcs(rpcs: DeviceRpc, guard: RequestGuard) -> DeviceRpc {
    match rpcs {
        DeviceRpc::Normalized(inner) => {
            DeviceRpc::Normalized(Arc::new(NormalizedKeepaliveRpc { inner, guard }))
        }
        DeviceRpc::Schemaless(inner) => {
            DeviceRpc::Schemaless(Arc::new(SchemalessKeepaliveRpc { inner, guard }))
        }
    }
}

struct NormalizedKeepaliveRpc {
    inner: Arc<dyn RpcInvoker>,
    guard: RequestGuard,
}

#[async_trait]
impl RpcInvoker for NormalizedKeepaliveRpc {
    async fn invoke_rpc(&self, operation: &str, input: XmlNode) -> Result<RpcResult, SessionError> {
        self.guard.guard(self.inner.invoke_rpc(operation, input)).await
    }
}

struct SchemalessKeepaliveRpc {
    inner: Arc<dyn SchemalessRpc>,
    guard: RequestGuard,
}

#[async_trait]
impl SchemalessRpc for SchemalessKeepaliveRpc {
    async fn invoke_netconf(
        &self,
        operation: &str,
        input: XmlNode,
    ) -> Result<RpcResult, SessionError> {
        self.guard.guard(self.inner.invoke_netconf(operation, input)).await
    }

    async fn invoke_raw(&self, request: String) -> Result<String, SessionError> {
        self.guard.guard(self.inner.invoke_raw(request)).await
    }
}
