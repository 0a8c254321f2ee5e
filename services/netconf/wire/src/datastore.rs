//! Datastore identifiers and edit-config operations.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use crate::node::XmlNode;

/// A named configuration datastore on the device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum Datastore {
    /// `<running/>`
    Running,
    /// `<candidate/>`, requires the :candidate capability
    Candidate,
    /// `<startup/>`, requires the :startup capability
    Startup,
    /// Any other datastore advertised by the device
    Named(String),
}

impl Datastore {
    /// Element name used inside `<source>`/`<target>`
    pub fn as_str(&self) -> &str {
        match self {
            Datastore::Running => "running",
            Datastore::Candidate => "candidate",
            Datastore::Startup => "startup",
            Datastore::Named(name) => name,
        }
    }

    /// Empty marker element, e.g. `<running/>`
    pub fn element(&self) -> XmlNode {
        XmlNode::new(self.as_str())
    }
}

impl Default for Datastore {
    fn default() -> Self {
        Datastore::Running
    }
}

impl From<String> for Datastore {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "running" => Datastore::Running,
            "candidate" => Datastore::Candidate,
            "startup" => Datastore::Startup,
            _ => Datastore::Named(value.trim().to_string()),
        }
    }
}

impl FromStr for Datastore {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Datastore::from(s.to_string()))
    }
}

impl fmt::Display for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of `<default-operation>` in edit-config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModifyAction {
    /// Merge configuration at the corresponding level
    Merge,
    /// Replace configuration at the corresponding level
    Replace,
    /// Create, failing if the data exists
    Create,
    /// Delete, failing if the data does not exist
    Delete,
    /// Delete if present
    Remove,
    /// Only apply explicit per-node operations
    None,
}

impl ModifyAction {
    /// Lowercase wire form
    pub fn as_str(&self) -> &'static str {
        match self {
            ModifyAction::Merge => "merge",
            ModifyAction::Replace => "replace",
            ModifyAction::Create => "create",
            ModifyAction::Delete => "delete",
            ModifyAction::Remove => "remove",
            ModifyAction::None => "none",
        }
    }
}

impl FromStr for ModifyAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "merge" => Ok(ModifyAction::Merge),
            "replace" => Ok(ModifyAction::Replace),
            "create" => Ok(ModifyAction::Create),
            "delete" => Ok(ModifyAction::Delete),
            "remove" => Ok(ModifyAction::Remove),
            "none" => Ok(ModifyAction::None),
            other => Err(format!("unknown modify action: {}", other)),
        }
    }
}

impl fmt::Display for ModifyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
