//! NETCONF message envelopes: `<rpc>`, `<rpc-reply>`, `<notification>` and `<hello>`.

use std::fmt;

use quick_xml::escape::escape;

use crate::error::WireError;
use crate::node::XmlNode;

/// NETCONF base namespace
pub const BASE_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
/// Notification namespace (RFC 5277)
pub const NOTIFICATION_NS: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";
/// ietf-netconf-monitoring namespace
pub const MONITORING_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring";

/// base:1.0 capability (end-of-message framing)
pub const BASE_1_0_CAPABILITY: &str = "urn:ietf:params:netconf:base:1.0";
/// base:1.1 capability (chunked framing)
pub const BASE_1_1_CAPABILITY: &str = "urn:ietf:params:netconf:base:1.1";
/// :candidate capability
pub const CANDIDATE_CAPABILITY: &str = "urn:ietf:params:netconf:capability:candidate:1.0";
/// :rollback-on-error capability
pub const ROLLBACK_ON_ERROR_CAPABILITY: &str =
    "urn:ietf:params:netconf:capability:rollback-on-error:1.0";
/// :writable-running capability
pub const WRITABLE_RUNNING_CAPABILITY: &str =
    "urn:ietf:params:netconf:capability:writable-running:1.0";
/// :notification capability prefix
pub const NOTIFICATION_CAPABILITY: &str = "urn:ietf:params:netconf:capability:notification:1.0";

/// Value of `<error-option>` requesting rollback
pub const ROLLBACK_ON_ERROR_OPTION: &str = "rollback-on-error";

/// Base protocol operation names
pub mod op {
    /// `<get>`
    pub const GET: &str = "get";
    /// `<get-config>`
    pub const GET_CONFIG: &str = "get-config";
    /// `<edit-config>`
    pub const EDIT_CONFIG: &str = "edit-config";
    /// `<copy-config>`
    pub const COPY_CONFIG: &str = "copy-config";
    /// `<lock>`
    pub const LOCK: &str = "lock";
    /// `<unlock>`
    pub const UNLOCK: &str = "unlock";
    /// `<commit>`
    pub const COMMIT: &str = "commit";
    /// `<discard-changes>`
    pub const DISCARD_CHANGES: &str = "discard-changes";
    /// `<validate>`
    pub const VALIDATE: &str = "validate";
    /// `<close-session>`
    pub const CLOSE_SESSION: &str = "close-session";
}

/// Severity of an `<rpc-error>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// error-severity = error
    Error,
    /// error-severity = warning
    Warning,
}

/// One `<rpc-error>` reported by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    /// transport, rpc, protocol or application
    pub error_type: String,
    /// error-tag, e.g. `lock-denied`
    pub tag: String,
    /// error-severity
    pub severity: ErrorSeverity,
    /// error-app-tag
    pub app_tag: Option<String>,
    /// error-path
    pub path: Option<String>,
    /// error-message
    pub message: Option<String>,
    /// error-info children serialized as XML
    pub info: Option<String>,
}

impl RpcError {
    /// Build an error record that did not come from the device
    pub fn new(error_type: &str, tag: &str, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.to_string(),
            tag: tag.to_string(),
            severity: ErrorSeverity::Error,
            app_tag: None,
            path: None,
            message: Some(message.into()),
            info: None,
        }
    }

    /// Decode an `<rpc-error>` element
    pub fn from_node(node: &XmlNode) -> Self {
        let text_of = |name: &str| {
            node.child(name)
                .map(|c| c.text().trim().to_string())
                .filter(|t| !t.is_empty())
        };

        let severity = match text_of("error-severity").as_deref() {
            Some("warning") => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        };

        Self {
            error_type: text_of("error-type").unwrap_or_else(|| "application".to_string()),
            tag: text_of("error-tag").unwrap_or_else(|| "operation-failed".to_string()),
            severity,
            app_tag: text_of("error-app-tag"),
            path: text_of("error-path"),
            message: text_of("error-message"),
            info: node
                .child("error-info")
                .map(|info| info.inner_xml())
                .filter(|s| !s.is_empty()),
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.error_type, self.tag)?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

/// Decoded body of an `<rpc-reply>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    /// `<ok/>`
    Ok,
    /// `<data>` element, or an `<output>` element wrapping non-data RPC output
    Data(XmlNode),
    /// One or more `<rpc-error>` elements
    Errors(Vec<RpcError>),
    /// Envelope with no usable content
    Empty,
}

/// A decoded `<rpc-reply>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcReply {
    /// message-id attribute echoed by the device
    pub message_id: Option<String>,
    /// Reply content
    pub body: ReplyBody,
}

impl RpcReply {
    fn from_node(node: XmlNode) -> Self {
        let message_id = node.attribute("message-id").map(str::to_string);

        let errors: Vec<RpcError> = node.children_named("rpc-error").map(RpcError::from_node).collect();
        let body = if !errors.is_empty() {
            ReplyBody::Errors(errors)
        } else if let Some(data) = node.child("data") {
            ReplyBody::Data(data.clone())
        } else if node.child("ok").is_some() {
            ReplyBody::Ok
        } else if !node.children.is_empty() {
            ReplyBody::Data(XmlNode::new("output").with_children(node.children))
        } else {
            ReplyBody::Empty
        };

        Self { message_id, body }
    }
}

/// A decoded `<notification>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// eventTime as sent by the device
    pub event_time: Option<String>,
    /// Notification content (everything except eventTime)
    pub content: Vec<XmlNode>,
}

/// A decoded `<hello>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Advertised capability URIs
    pub capabilities: Vec<String>,
    /// session-id, only present in the server hello
    pub session_id: Option<u32>,
}

/// Any message a client can receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingMessage {
    /// Reply to an RPC
    Reply(RpcReply),
    /// Asynchronous event notification
    Notification(Notification),
    /// Capability exchange
    Hello(Hello),
}

impl IncomingMessage {
    /// Decode one framed message
    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        let text = std::str::from_utf8(bytes).map_err(|_| WireError::Utf8)?;
        Self::from_node(XmlNode::parse(text)?)
    }

    /// Classify an already parsed document
    pub fn from_node(node: XmlNode) -> Result<Self, WireError> {
        match node.name.as_str() {
            "rpc-reply" => Ok(IncomingMessage::Reply(RpcReply::from_node(node))),
            "notification" => {
                let event_time = node.child("eventTime").map(|t| t.text().trim().to_string());
                let content = node.children.into_iter().filter(|c| c.name != "eventTime").collect();
                Ok(IncomingMessage::Notification(Notification { event_time, content }))
            }
            "hello" => {
                let capabilities = node
                    .child("capabilities")
                    .map(|caps| {
                        caps.children_named("capability")
                            .map(|c| c.text().trim().to_string())
                            .filter(|c| !c.is_empty())
                            .collect()
                    })
                    .unwrap_or_default();
                let session_id = node
                    .child("session-id")
                    .and_then(|s| s.text().trim().parse::<u32>().ok());
                Ok(IncomingMessage::Hello(Hello { capabilities, session_id }))
            }
            other => Err(WireError::UnexpectedRoot(other.to_string())),
        }
    }
}

/// Wrap an operation element in an `<rpc>` envelope
pub fn rpc_envelope(message_id: &str, operation: XmlNode) -> String {
    XmlNode::new("rpc")
        .with_namespace(BASE_NS)
        .with_attribute("message-id", message_id)
        .with_child(operation)
        .to_xml()
}

/// Wrap already serialized operation XML in an `<rpc>` envelope.
///
/// The text goes out unchanged so prefixed elements keep their namespace
/// declarations; only a leading XML declaration is dropped.
pub fn rpc_envelope_raw(message_id: &str, operation_xml: &str) -> String {
    let mut body = operation_xml.trim();
    if body.starts_with("<?xml") {
        if let Some(end) = body.find("?>") {
            body = body[end + 2..].trim_start();
        }
    }
    format!(
        "<rpc xmlns=\"{}\" message-id=\"{}\">{}</rpc>",
        BASE_NS,
        escape(message_id),
        body
    )
}

/// Build the client `<hello>` advertising the given capabilities
pub fn hello_message<'a, I: IntoIterator<Item = &'a str>>(capabilities: I) -> String {
    let caps = XmlNode::new("capabilities")
        .with_children(capabilities.into_iter().map(|c| XmlNode::leaf("capability", c)));
    XmlNode::new("hello").with_namespace(BASE_NS).with_child(caps).to_xml()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_envelope() {
        let xml = rpc_envelope("101", XmlNode::new(op::COMMIT));
        assert_eq!(
            xml,
            format!("<rpc xmlns=\"{}\" message-id=\"101\"><commit/></rpc>", BASE_NS)
        );
    }

    #[test]
    fn test_raw_envelope_keeps_prefixed_elements() {
        let operation = r#"<get><filter type="subtree"><if:interfaces xmlns:if="urn:example:if"/></filter></get>"#;
        let xml = rpc_envelope_raw("7", &format!("<?xml version=\"1.0\"?>\n{}", operation));
        assert_eq!(
            xml,
            format!("<rpc xmlns=\"{}\" message-id=\"7\">{}</rpc>", BASE_NS, operation)
        );
    }

    #[test]
    fn test_parse_ok_reply() {
        let msg = IncomingMessage::parse(
            br#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="3"><ok/></rpc-reply>"#,
        )
        .unwrap();

        match msg {
            IncomingMessage::Reply(reply) => {
                assert_eq!(reply.message_id.as_deref(), Some("3"));
                assert_eq!(reply.body, ReplyBody::Ok);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_reply() {
        let xml = br#"<rpc-reply message-id="4" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
              <rpc-error>
                <error-type>protocol</error-type>
                <error-tag>lock-denied</error-tag>
                <error-severity>error</error-severity>
                <error-message>Lock failed, lock is already held</error-message>
                <error-info><session-id>454</session-id></error-info>
              </rpc-error>
            </rpc-reply>"#;

        let IncomingMessage::Reply(reply) = IncomingMessage::parse(xml).unwrap() else {
            panic!("expected reply");
        };
        let ReplyBody::Errors(errors) = reply.body else {
            panic!("expected errors");
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].tag, "lock-denied");
        assert_eq!(errors[0].error_type, "protocol");
        assert_eq!(errors[0].info.as_deref(), Some("<session-id>454</session-id>"));
        assert_eq!(
            errors[0].to_string(),
            "protocol/lock-denied: Lock failed, lock is already held"
        );
    }

    #[test]
    fn test_parse_empty_and_output_replies() {
        let IncomingMessage::Reply(empty) =
            IncomingMessage::parse(br#"<rpc-reply message-id="5"/>"#).unwrap()
        else {
            panic!("expected reply");
        };
        assert_eq!(empty.body, ReplyBody::Empty);

        let IncomingMessage::Reply(output) = IncomingMessage::parse(
            br#"<rpc-reply message-id="6"><result xmlns="urn:example">done</result></rpc-reply>"#,
        )
        .unwrap() else {
            panic!("expected reply");
        };
        match output.body {
            ReplyBody::Data(node) => {
                assert_eq!(node.name, "output");
                assert_eq!(node.child("result").unwrap().text(), "done");
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_parse_notification_and_hello() {
        let notification = IncomingMessage::parse(
            br#"<notification xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0">
                  <eventTime>2024-01-01T00:00:00Z</eventTime>
                  <link-down xmlns="urn:example"><if>eth0</if></link-down>
                </notification>"#,
        )
        .unwrap();
        match notification {
            IncomingMessage::Notification(n) => {
                assert_eq!(n.event_time.as_deref(), Some("2024-01-01T00:00:00Z"));
                assert_eq!(n.content.len(), 1);
                assert_eq!(n.content[0].name, "link-down");
            }
            other => panic!("unexpected message {:?}", other),
        }

        let hello = IncomingMessage::parse(
            br#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
                  <capabilities>
                    <capability>urn:ietf:params:netconf:base:1.1</capability>
                    <capability>urn:ietf:params:netconf:capability:candidate:1.0</capability>
                  </capabilities>
                  <session-id>42</session-id>
                </hello>"#,
        )
        .unwrap();
        match hello {
            IncomingMessage::Hello(h) => {
                assert_eq!(h.session_id, Some(42));
                assert_eq!(h.capabilities.len(), 2);
                assert_eq!(h.capabilities[0], BASE_1_1_CAPABILITY);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_unknown_root_rejected() {
        assert_eq!(
            IncomingMessage::parse(b"<rpc message-id=\"1\"/>"),
            Err(WireError::UnexpectedRoot("rpc".to_string()))
        );
    }
}
