//! RPC invocation seams and results.
//!
//! A device exposes its RPCs in one of two encodings: normalized (payload trees
//! in and out) or schemaless (which additionally accepts raw XML). Both are
//! carried by [`DeviceRpc`] so decorators can wrap either one.

use std::sync::Arc;

use async_trait::async_trait;
use netconf_wire::{ReplyBody, RpcError, XmlNode};

use crate::error::SessionError;

/// Outcome of an RPC the device answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcResult {
    /// Reply payload (`<data>`, RPC output, or `<ok/>`)
    Value(XmlNode),
    /// Reply carried rpc-errors
    Errors(Vec<RpcError>),
    /// Reply envelope without usable content
    Empty,
}

impl RpcResult {
    /// True when the device reported no errors
    pub fn is_success(&self) -> bool {
        !matches!(self, RpcResult::Errors(_))
    }

    /// Payload, if any
    pub fn value(&self) -> Option<&XmlNode> {
        match self {
            RpcResult::Value(node) => Some(node),
            _ => None,
        }
    }

    /// Reported rpc-errors, empty on success
    pub fn errors(&self) -> &[RpcError] {
        match self {
            RpcResult::Errors(errors) => errors,
            _ => &[],
        }
    }

    /// Turn a read reply into its `<data>` tree.
    ///
    /// Errors become [`SessionError::Rejected`]; a reply without data yields an
    /// empty `<data/>` element.
    pub fn into_data(self) -> Result<XmlNode, SessionError> {
        match self {
            RpcResult::Value(node) if node.name == "data" => Ok(node),
            RpcResult::Value(_) | RpcResult::Empty => Ok(XmlNode::new("data")),
            RpcResult::Errors(errors) => Err(SessionError::Rejected(errors)),
        }
    }
}

impl From<ReplyBody> for RpcResult {
    fn from(body: ReplyBody) -> Self {
        match body {
            ReplyBody::Ok => RpcResult::Value(XmlNode::new("ok")),
            ReplyBody::Data(node) => RpcResult::Value(node),
            ReplyBody::Errors(errors) => RpcResult::Errors(errors),
            ReplyBody::Empty => RpcResult::Empty,
        }
    }
}

/// Sends one RPC and resolves with the device's answer
#[async_trait]
pub trait RpcInvoker: Send + Sync {
    /// Invoke `operation` with `input` as the operation element's content
    async fn invoke_rpc(&self, operation: &str, input: XmlNode) -> Result<RpcResult, SessionError>;
}

/// RPC service that also accepts raw XML
#[async_trait]
pub trait SchemalessRpc: Send + Sync {
    /// Invoke `operation` with a payload tree
    async fn invoke_netconf(&self, operation: &str, input: XmlNode)
        -> Result<RpcResult, SessionError>;

    /// Send a raw operation element and return the raw `<rpc-reply>` document
    async fn invoke_raw(&self, request: String) -> Result<String, SessionError>;
}

/// RPC service handed to upper layers
#[derive(Clone)]
pub enum DeviceRpc {
    /// Normalized payload trees
    Normalized(Arc<dyn RpcInvoker>),
    /// Raw XML capable
    Schemaless(Arc<dyn SchemalessRpc>),
}

impl DeviceRpc {
    /// Invoke through whichever variant this is
    pub async fn invoke(&self, operation: &str, input: XmlNode) -> Result<RpcResult, SessionError> {
        match self {
            DeviceRpc::Normalized(rpc) => rpc.invoke_rpc(operation, input).await,
            DeviceRpc::Schemaless(rpc) => rpc.invoke_netconf(operation, input).await,
        }
    }
}

#[async_trait]
impl RpcInvoker for DeviceRpc {
    async fn invoke_rpc(&self, operation: &str, input: XmlNode) -> Result<RpcResult, SessionError> {
        self.invoke(operation, input).await
    }
}

impl std::fmt::Debug for DeviceRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceRpc::Normalized(_) => f.write_str("DeviceRpc::Normalized"),
            DeviceRpc::Schemaless(_) => f.write_str("DeviceRpc::Schemaless"),
        }
    }
}
