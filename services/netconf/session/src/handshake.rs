//! Hello exchange and session preferences.
//!
//! The client hello is sent immediately after the transport comes up. The
//! server hello is always end-of-message framed; if both peers advertise
//! base:1.1 the session switches to chunked framing afterwards.

use bytes::BytesMut;
use netconf_wire::{
    encode_frame, hello_message, FrameDecoder, Framing, IncomingMessage, BASE_1_0_CAPABILITY,
    BASE_1_1_CAPABILITY, CANDIDATE_CAPABILITY, MONITORING_NS, NOTIFICATION_CAPABILITY,
    ROLLBACK_ON_ERROR_CAPABILITY, WRITABLE_RUNNING_CAPABILITY,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::device::DeviceId;
use crate::error::SessionError;

/// Capabilities advertised by the device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPreferences {
    non_module_capabilities: Vec<String>,
    module_capabilities: Vec<String>,
}

impl SessionPreferences {
    /// Split raw capability URIs into module-based and protocol capabilities
    pub fn from_capabilities<I, S>(capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (module_capabilities, non_module_capabilities) = capabilities
            .into_iter()
            .map(Into::into)
            .partition(|cap: &String| cap.contains("?module=") || cap.contains("&module="));

        Self {
            non_module_capabilities,
            module_capabilities,
        }
    }

    /// Protocol capabilities (no `module=` parameter)
    pub fn non_module_capabilities(&self) -> &[String] {
        &self.non_module_capabilities
    }

    /// YANG module capabilities
    pub fn module_capabilities(&self) -> &[String] {
        &self.module_capabilities
    }

    /// Protocol capability match, ignoring any `?` parameters
    pub fn contains_non_module_capability(&self, capability: &str) -> bool {
        self.non_module_capabilities
            .iter()
            .any(|cap| cap.split('?').next() == Some(capability))
    }

    /// Module capability match by namespace
    pub fn contains_module_namespace(&self, namespace: &str) -> bool {
        self.module_capabilities
            .iter()
            .any(|cap| cap.split('?').next() == Some(namespace))
    }

    /// :candidate datastore present
    pub fn is_candidate_supported(&self) -> bool {
        self.contains_non_module_capability(CANDIDATE_CAPABILITY)
    }

    /// :rollback-on-error present
    pub fn is_rollback_supported(&self) -> bool {
        self.contains_non_module_capability(ROLLBACK_ON_ERROR_CAPABILITY)
    }

    /// :writable-running present
    pub fn is_running_writable(&self) -> bool {
        self.contains_non_module_capability(WRITABLE_RUNNING_CAPABILITY)
    }

    /// :notification present
    pub fn is_notifications_supported(&self) -> bool {
        self.contains_non_module_capability(NOTIFICATION_CAPABILITY)
    }

    /// ietf-netconf-monitoring module present
    pub fn is_monitoring_supported(&self) -> bool {
        self.contains_module_namespace(MONITORING_NS)
    }

    /// base:1.1 present
    pub fn is_chunked_framing_supported(&self) -> bool {
        self.contains_non_module_capability(BASE_1_1_CAPABILITY)
    }
}

/// A YANG module advertised in the hello
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaModule {
    /// Module namespace
    pub namespace: String,
    /// Module name
    pub name: String,
    /// Revision date, if advertised
    pub revision: Option<String>,
}

/// Modules the device claims to implement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSchema {
    /// Advertised modules in hello order
    pub modules: Vec<SchemaModule>,
}

impl DeviceSchema {
    /// Collect modules from the module capabilities
    pub fn from_preferences(preferences: &SessionPreferences) -> Self {
        let modules = preferences
            .module_capabilities()
            .iter()
            .filter_map(|cap| parse_module_capability(cap))
            .collect();
        Self { modules }
    }

    /// Look up a module by name
    pub fn module(&self, name: &str) -> Option<&SchemaModule> {
        self.modules.iter().find(|m| m.name == name)
    }
}

fn parse_module_capability(capability: &str) -> Option<SchemaModule> {
    let (namespace, query) = capability.split_once('?')?;
    let mut name = None;
    let mut revision = None;
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some(("module", value)) => name = Some(value.to_string()),
            Some(("revision", value)) => revision = Some(value.to_string()),
            _ => {}
        }
    }

    Some(SchemaModule {
        namespace: namespace.to_string(),
        name: name?,
        revision,
    })
}

/// Result of a completed hello exchange
#[derive(Debug)]
pub struct HandshakeOutcome {
    /// session-id assigned by the device
    pub session_id: u32,
    /// Device capabilities
    pub preferences: SessionPreferences,
    /// Decoder already switched to the negotiated framing
    pub decoder: FrameDecoder,
    /// Bytes read past the server hello
    pub buffer: BytesMut,
}

impl HandshakeOutcome {
    /// Framing negotiated for the rest of the session
    pub fn framing(&self) -> Framing {
        self.decoder.framing()
    }
}

/// Exchange hellos on a freshly connected stream
pub async fn client_handshake<S>(stream: &mut S, id: &DeviceId) -> Result<HandshakeOutcome, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let hello = hello_message([BASE_1_0_CAPABILITY, BASE_1_1_CAPABILITY]);
    stream
        .write_all(&encode_frame(Framing::EndOfMessage, hello.as_bytes()))
        .await?;
    stream.flush().await?;
    debug!("{}: sent client hello", id);

    let mut decoder = FrameDecoder::new();
    let mut buffer = BytesMut::with_capacity(16 * 1024);
    let message = loop {
        if let Some(message) = decoder.decode(&mut buffer)? {
            break message;
        }
        let read = stream.read_buf(&mut buffer).await?;
        if read == 0 {
            return Err(SessionError::Handshake("connection closed before server hello".into()));
        }
        trace!("{}: read {} bytes during handshake", id, read);
    };

    let server_hello = match IncomingMessage::parse(&message)? {
        IncomingMessage::Hello(hello) => hello,
        other => {
            return Err(SessionError::Handshake(format!(
                "expected hello, got {:?}",
                other
            )))
        }
    };

    let session_id = server_hello
        .session_id
        .ok_or_else(|| SessionError::Handshake("server hello without session-id".into()))?;
    let preferences = SessionPreferences::from_capabilities(server_hello.capabilities);

    if preferences.is_chunked_framing_supported() {
        decoder.set_framing(Framing::Chunked);
    }

    debug!(
        "{}: session {} established, framing {:?}, {} capabilities",
        id,
        session_id,
        decoder.framing(),
        preferences.non_module_capabilities().len() + preferences.module_capabilities().len()
    );

    Ok(HandshakeOutcome {
        session_id,
        preferences,
        decoder,
        buffer,
    })
}
