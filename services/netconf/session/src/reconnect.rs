//! Reconnect coordination.
//!
//! Every connected session gets a generation number. Reconnect requests carry
//! the generation they were issued for, so a late failure from an old session
//! cannot tear down its replacement, and a session is only torn down once no
//! matter how many of its requests fail.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::device::DeviceId;
use crate::error::SessionError;
use crate::keepalive::KeepaliveHandle;

/// Transport-side handle able to drop the current session
pub trait SessionListener: Send + Sync {
    /// Close the transport session; repeated calls have no further effect
    fn disconnect(&self);
}

#[derive(Default)]
struct SessionSlot {
    generation: u64,
    listener: Option<Arc<dyn SessionListener>>,
    keepalive: Option<KeepaliveHandle>,
    reconnect_requested: bool,
}

/// Owns the listener and keepalive of the current session
#[derive(Clone)]
pub struct ReconnectCoordinator {
    id: DeviceId,
    slot: Arc<Mutex<SessionSlot>>,
}

impl ReconnectCoordinator {
    /// Coordinator with no session attached
    pub fn new(id: DeviceId) -> Self {
        Self {
            id,
            slot: Arc::new(Mutex::new(SessionSlot::default())),
        }
    }

    /// Device this coordinator belongs to
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Attach the transport listener used for disconnects
    pub fn set_listener(&self, listener: Arc<dyn SessionListener>) {
        self.slot.lock().listener = Some(listener);
    }

    /// Start a new session generation, stopping any keepalive left from the last one
    pub fn begin_session(&self) -> SessionReconnect {
        let (previous, generation) = {
            let mut slot = self.slot.lock();
            slot.generation += 1;
            slot.reconnect_requested = false;
            (slot.keepalive.take(), slot.generation)
        };
        if let Some(keepalive) = previous {
            keepalive.stop();
        }

        SessionReconnect {
            coordinator: self.clone(),
            generation,
        }
    }

    /// Record the keepalive of `session`; stops it right away if the session is already gone
    pub fn attach_keepalive(&self, session: &SessionReconnect, keepalive: KeepaliveHandle) {
        let mut slot = self.slot.lock();
        if slot.generation == session.generation && !slot.reconnect_requested {
            slot.keepalive = Some(keepalive);
        } else {
            drop(slot);
            keepalive.stop();
        }
    }

    /// Keepalive of the current session, if running
    pub fn keepalive(&self) -> Option<KeepaliveHandle> {
        self.slot.lock().keepalive.clone()
    }

    /// Stop the current keepalive; idempotent
    pub fn stop_keepalives(&self) {
        let keepalive = self.slot.lock().keepalive.take();
        if let Some(keepalive) = keepalive {
            keepalive.stop();
        }
    }

    /// Drop the current session for good: the keepalive stops, the listener
    /// is disconnected and forgotten. Idempotent.
    pub fn release(&self) {
        let (listener, keepalive) = {
            let mut slot = self.slot.lock();
            slot.reconnect_requested = true;
            (slot.listener.take(), slot.keepalive.take())
        };

        if let Some(keepalive) = keepalive {
            keepalive.stop();
        }
        if let Some(listener) = listener {
            debug!("{}: releasing session", self.id);
            listener.disconnect();
        }
    }

    /// Stop keepalives and disconnect the current session
    pub fn reconnect(&self) -> Result<(), SessionError> {
        let generation = self.slot.lock().generation;
        self.disconnect_session(generation, true, &"explicit request")
            .map(|_| ())
    }

    fn disconnect_session(
        &self,
        generation: u64,
        force: bool,
        cause: &dyn fmt::Display,
    ) -> Result<bool, SessionError> {
        let (listener, keepalive) = {
            let mut slot = self.slot.lock();
            if slot.generation != generation || (slot.reconnect_requested && !force) {
                return Ok(false);
            }
            let listener = slot.listener.clone().ok_or(SessionError::MissingListener)?;
            slot.reconnect_requested = true;
            (listener, slot.keepalive.take())
        };

        info!("{}: reconnecting session ({})", self.id, cause);
        if let Some(keepalive) = keepalive {
            keepalive.stop();
        }
        listener.disconnect();
        Ok(true)
    }
}

/// Reconnect trigger bound to one session generation
#[derive(Clone)]
pub struct SessionReconnect {
    coordinator: ReconnectCoordinator,
    generation: u64,
}

impl SessionReconnect {
    /// Generation this trigger belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Request a reconnect because of `cause`.
    ///
    /// Returns `false` only when no listener is attached; a session that is
    /// already being torn down, or has been replaced, counts as handled.
    pub fn request(&self, cause: &dyn fmt::Display) -> bool {
        let id = &self.coordinator.id;
        match self.coordinator.disconnect_session(self.generation, false, cause) {
            Ok(true) => true,
            Ok(false) => {
                debug!("{}: reconnect already handled, ignoring {}", id, cause);
                true
            }
            Err(err) => {
                warn!("{}: cannot reconnect after {}: {}", id, cause, err);
                false
            }
        }
    }
}
