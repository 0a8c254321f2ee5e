//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Chunk header did not match `\n#<len>\n`
    #[error("malformed chunk header: {0}")]
    ChunkHeader(String),

    /// Chunk footer did not match `\n##\n`
    #[error("malformed chunk footer: {0}")]
    ChunkFooter(String),

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Message bytes were not valid UTF-8
    #[error("message is not valid utf-8")]
    Utf8,

    /// XML could not be parsed
    #[error("xml invalid: {0}")]
    Xml(String),

    /// Document root is not a NETCONF message
    #[error("unexpected root element <{0}>")]
    UnexpectedRoot(String),

    /// Required attribute or element missing
    #[error("missing {0}")]
    Missing(&'static str),
}

impl From<quick_xml::Error> for WireError {
    fn from(err: quick_xml::Error) -> Self {
        WireError::Xml(err.to_string())
    }
}
