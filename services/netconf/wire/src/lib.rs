//! NETCONF wire format: RFC 6242 framing, message envelopes and payload trees.
//!
//! This crate knows nothing about sessions or timers. It turns bytes into
//! framed messages, framed messages into [`IncomingMessage`] values, and
//! [`XmlNode`] payloads into `<rpc>` envelopes.
//!
//! ## Framing
//!
//! ```text
//! base:1.0   <message>]]>]]>
//! base:1.1   \n#<len>\n<data>...\n##\n
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod datastore;
pub mod error;
pub mod framing;
pub mod message;
pub mod node;

// Re-export main types
pub use datastore::{Datastore, ModifyAction};
pub use error::WireError;
pub use framing::{
    encode_frame, encode_frame_with_chunk_size, FrameDecoder, Framing, DEFAULT_CHUNK_SIZE,
    MAX_CHUNK_SIZE, MAX_MESSAGE_SIZE,
};
pub use message::{
    hello_message, op, rpc_envelope, rpc_envelope_raw, ErrorSeverity, Hello, IncomingMessage,
    Notification, ReplyBody, RpcError, RpcReply, BASE_1_0_CAPABILITY, BASE_1_1_CAPABILITY,
    BASE_NS, CANDIDATE_CAPABILITY, MONITORING_NS, NOTIFICATION_CAPABILITY, NOTIFICATION_NS,
    ROLLBACK_ON_ERROR_CAPABILITY, ROLLBACK_ON_ERROR_OPTION, WRITABLE_RUNNING_CAPABILITY,
};
pub use node::XmlNode;
