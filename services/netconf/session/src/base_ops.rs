//! Base protocol operations (RFC 6241 section 7).
//!
//! Every call validates its arguments before building the request, then sends
//! exactly one RPC. Nothing is retried here.

use std::sync::Arc;

use netconf_wire::{op, Datastore, ModifyAction, XmlNode, BASE_NS, ROLLBACK_ON_ERROR_OPTION};
use tracing::trace;

use crate::error::SessionError;
use crate::rpc::{DeviceRpc, RpcInvoker, RpcResult};

/// Builds and sends base NETCONF operations
#[derive(Clone)]
pub struct BaseOperations {
    rpc: Arc<dyn RpcInvoker>,
}

impl BaseOperations {
    /// Operations over `rpc`
    pub fn new(rpc: Arc<dyn RpcInvoker>) -> Self {
        Self { rpc }
    }

    /// `<lock>` on `target`
    pub async fn lock(&self, target: &Datastore) -> Result<RpcResult, SessionError> {
        check_datastore(target)?;
        self.send(op::LOCK, vec![target_node(target)]).await
    }

    /// `<lock>` on running
    pub async fn lock_running(&self) -> Result<RpcResult, SessionError> {
        self.lock(&Datastore::Running).await
    }

    /// `<lock>` on candidate
    pub async fn lock_candidate(&self) -> Result<RpcResult, SessionError> {
        self.lock(&Datastore::Candidate).await
    }

    /// `<unlock>` on `target`
    pub async fn unlock(&self, target: &Datastore) -> Result<RpcResult, SessionError> {
        check_datastore(target)?;
        self.send(op::UNLOCK, vec![target_node(target)]).await
    }

    /// `<unlock>` on running
    pub async fn unlock_running(&self) -> Result<RpcResult, SessionError> {
        self.unlock(&Datastore::Running).await
    }

    /// `<unlock>` on candidate
    pub async fn unlock_candidate(&self) -> Result<RpcResult, SessionError> {
        self.unlock(&Datastore::Candidate).await
    }

    /// `<discard-changes>`
    pub async fn discard_changes(&self) -> Result<RpcResult, SessionError> {
        self.send(op::DISCARD_CHANGES, vec![]).await
    }

    /// `<commit>`
    pub async fn commit(&self) -> Result<RpcResult, SessionError> {
        self.send(op::COMMIT, vec![]).await
    }

    /// `<validate>` of `source`
    pub async fn validate(&self, source: &Datastore) -> Result<RpcResult, SessionError> {
        check_datastore(source)?;
        self.send(op::VALIDATE, vec![source_node(source)]).await
    }

    /// `<validate>` of running
    pub async fn validate_running(&self) -> Result<RpcResult, SessionError> {
        self.validate(&Datastore::Running).await
    }

    /// `<validate>` of candidate
    pub async fn validate_candidate(&self) -> Result<RpcResult, SessionError> {
        self.validate(&Datastore::Candidate).await
    }

    /// `<copy-config>` from `source` to `target`
    pub async fn copy_config(
        &self,
        source: &Datastore,
        target: &Datastore,
    ) -> Result<RpcResult, SessionError> {
        check_datastore(source)?;
        check_datastore(target)?;
        if source == target {
            return Err(SessionError::InvalidArgument(format!(
                "copy-config source and target are both {}",
                source
            )));
        }
        self.send(op::COPY_CONFIG, vec![target_node(target), source_node(source)])
            .await
    }

    /// Copy running into candidate
    pub async fn copy_running_to_candidate(&self) -> Result<RpcResult, SessionError> {
        self.copy_config(&Datastore::Running, &Datastore::Candidate)
            .await
    }

    /// `<get-config>` of `source`; an empty `filter` retrieves everything
    pub async fn get_config(
        &self,
        source: &Datastore,
        filter: &[XmlNode],
    ) -> Result<RpcResult, SessionError> {
        check_datastore(source)?;
        let mut children = vec![source_node(source)];
        children.extend(filter_node(filter));
        self.send(op::GET_CONFIG, children).await
    }

    /// `<get-config>` of running
    pub async fn get_config_running(&self, filter: &[XmlNode]) -> Result<RpcResult, SessionError> {
        self.get_config(&Datastore::Running, filter).await
    }

    /// `<get-config>` of candidate
    pub async fn get_config_candidate(
        &self,
        filter: &[XmlNode],
    ) -> Result<RpcResult, SessionError> {
        self.get_config(&Datastore::Candidate, filter).await
    }

    /// `<get>`; an empty `filter` retrieves everything
    pub async fn get(&self, filter: &[XmlNode]) -> Result<RpcResult, SessionError> {
        self.send(op::GET, filter_node(filter).into_iter().collect())
            .await
    }

    /// `<get>` reduced to its `<data>` tree
    pub async fn get_data(&self, filter: &[XmlNode]) -> Result<XmlNode, SessionError> {
        self.get(filter).await?.into_data()
    }

    /// `<get-config>` of running reduced to its `<data>` tree
    pub async fn get_config_running_data(
        &self,
        filter: &[XmlNode],
    ) -> Result<XmlNode, SessionError> {
        self.get_config_running(filter).await?.into_data()
    }

    /// `<edit-config>` of `target`.
    ///
    /// `default_operation` and rollback-on-error are only sent when requested.
    /// Only merge, replace and none are valid default operations.
    pub async fn edit_config(
        &self,
        target: &Datastore,
        content: Vec<XmlNode>,
        default_operation: Option<ModifyAction>,
        rollback: bool,
    ) -> Result<RpcResult, SessionError> {
        check_datastore(target)?;
        if content.is_empty() {
            return Err(SessionError::InvalidArgument(
                "edit-config requires configuration content".into(),
            ));
        }
        if let Some(node) = content.iter().find(|node| node.name.trim().is_empty()) {
            return Err(SessionError::InvalidArgument(format!(
                "edit-config content element without a name: {:?}",
                node
            )));
        }

        if let Some(
            action @ (ModifyAction::Create | ModifyAction::Delete | ModifyAction::Remove),
        ) = default_operation
        {
            return Err(SessionError::InvalidArgument(format!(
                "{} is not a valid default-operation",
                action.as_str()
            )));
        }

        let mut children = vec![target_node(target)];
        if let Some(action) = default_operation {
            children.push(XmlNode::leaf("default-operation", action.as_str()));
        }
        if rollback {
            children.push(XmlNode::leaf("error-option", ROLLBACK_ON_ERROR_OPTION));
        }
        children.push(XmlNode::new("config").with_children(content));

        self.send(op::EDIT_CONFIG, children).await
    }

    /// `<edit-config>` of running
    pub async fn edit_config_running(
        &self,
        content: Vec<XmlNode>,
        default_operation: Option<ModifyAction>,
        rollback: bool,
    ) -> Result<RpcResult, SessionError> {
        self.edit_config(&Datastore::Running, content, default_operation, rollback)
            .await
    }

    /// `<edit-config>` of candidate
    pub async fn edit_config_candidate(
        &self,
        content: Vec<XmlNode>,
        default_operation: Option<ModifyAction>,
        rollback: bool,
    ) -> Result<RpcResult, SessionError> {
        self.edit_config(&Datastore::Candidate, content, default_operation, rollback)
            .await
    }

    async fn send(&self, operation: &str, children: Vec<XmlNode>) -> Result<RpcResult, SessionError> {
        let input = XmlNode::new(operation)
            .with_namespace(BASE_NS)
            .with_children(children);
        trace!("sending {}", operation);
        self.rpc.invoke_rpc(operation, input).await
    }
}

impl From<DeviceRpc> for BaseOperations {
    fn from(rpc: DeviceRpc) -> Self {
        Self::new(Arc::new(rpc))
    }
}

// Named datastores become element names.
fn check_datastore(datastore: &Datastore) -> Result<(), SessionError> {
    match datastore {
        Datastore::Named(name) if !is_ncname(name) => Err(SessionError::InvalidArgument(
            format!("invalid datastore name {:?}", name),
        )),
        _ => Ok(()),
    }
}

fn is_ncname(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {
            chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
        }
        _ => false,
    }
}

fn target_node(datastore: &Datastore) -> XmlNode {
    XmlNode::new("target").with_child(datastore.element())
}

fn source_node(datastore: &Datastore) -> XmlNode {
    XmlNode::new("source").with_child(datastore.element())
}

fn filter_node(filter: &[XmlNode]) -> Option<XmlNode> {
    if filter.is_empty() {
        return None;
    }
    Some(
        XmlNode::new("filter")
            .with_attribute("type", "subtree")
            .with_children(filter.iter().cloned()),
    )
}
