//! Remote device identity.

use std::fmt;

use serde::Deserialize;

/// Identifies a remote device for logging and connection setup
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct DeviceId {
    /// Node name as configured
    pub name: String,
    /// `host:port` of the NETCONF endpoint
    pub address: String,
}

impl DeviceId {
    /// Create a new device id
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteDevice{{{}}}", self.name)
    }
}
