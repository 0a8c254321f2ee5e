//! Client-side session settings.

use std::time::Duration;

use netconf_wire::Datastore;
use serde::Deserialize;

/// Keepalive delay used when none is configured (seconds)
pub const DEFAULT_KEEPALIVE_DELAY_SECS: u64 = 120;
/// Request deadline used when none is configured (milliseconds)
pub const DEFAULT_REQUEST_TIMEOUT_MILLIS: u64 = 60_000;

/// Settings shared by the keepalive facade, communicator and connector
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NetconfClientConfig {
    /// Idle time before a keepalive probe is sent; 0 disables keepalives
    pub keepalive_delay_secs: u64,
    /// Deadline for every guarded request, keepalive probes included
    pub request_timeout_millis: u64,
    /// Datastore targeted by the keepalive get-config
    pub keepalive_datastore: Datastore,
    /// Maximum outstanding RPCs per session; 0 means unlimited
    pub concurrent_rpc_limit: usize,
    /// TCP connect plus hello exchange deadline
    pub connection_timeout_millis: u64,
    /// Initial delay between reconnect attempts
    pub between_attempts_timeout_millis: u64,
    /// Multiplier applied to the delay after each failed attempt
    pub sleep_factor: f64,
    /// Consecutive failed attempts before giving up; 0 retries forever
    pub max_connection_attempts: u32,
    /// Cap on the delay between attempts
    pub max_between_attempts_timeout_millis: u64,
}

impl Default for NetconfClientConfig {
    fn default() -> Self {
        Self {
            keepalive_delay_secs: DEFAULT_KEEPALIVE_DELAY_SECS,
            request_timeout_millis: DEFAULT_REQUEST_TIMEOUT_MILLIS,
            keepalive_datastore: Datastore::Running,
            concurrent_rpc_limit: 0,
            connection_timeout_millis: 20_000,
            between_attempts_timeout_millis: 2_000,
            sleep_factor: 1.5,
            max_connection_attempts: 0,
            max_between_attempts_timeout_millis: 30 * 60 * 1000,
        }
    }
}

impl NetconfClientConfig {
    /// Keepalive delay as a duration
    pub fn keepalive_delay(&self) -> Duration {
        Duration::from_secs(self.keepalive_delay_secs)
    }

    /// Whether keepalive probes run at all
    pub fn keepalives_enabled(&self) -> bool {
        self.keepalive_delay_secs > 0
    }

    /// Request deadline as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_millis)
    }

    /// Connection deadline as a duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_millis)
    }

    /// Initial reconnect delay as a duration
    pub fn between_attempts_timeout(&self) -> Duration {
        Duration::from_millis(self.between_attempts_timeout_millis)
    }

    /// Reconnect delay cap as a duration
    pub fn max_between_attempts_timeout(&self) -> Duration {
        Duration::from_millis(self.max_between_attempts_timeout_millis)
    }

    /// `None` when no limit applies
    pub fn rpc_limit(&self) -> Option<usize> {
        (self.concurrent_rpc_limit > 0).then_some(self.concurrent_rpc_limit)
    }
}
