//! RFC 6242 message framing.
//!
//! Sessions start with end-of-message framing (`]]>]]>` delimiter) and switch
//! to chunked framing once both peers advertise base:1.1 in their hello.
//!
//! ```text
//! chunked-message = 1*chunk end-of-chunks
//! chunk           = LF HASH chunk-size LF chunk-data
//! end-of-chunks   = LF HASH HASH LF
//! chunk-size      = 1-9 *DIGIT
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::error::WireError;

/// Largest single chunk accepted from the peer (16 MiB)
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;
/// Largest reassembled message accepted from the peer (64 MiB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;
/// Chunk size used when sending
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

const END_OF_MESSAGE: &[u8] = b"]]>]]>";
const END_OF_CHUNKS: &[u8] = b"\n##\n";
// "\n#" + up to 10 digits + "\n"
const MAX_CHUNK_HEADER_LEN: usize = 13;

/// Framing mechanism in use on a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// base:1.0 `]]>]]>` delimiter
    #[default]
    EndOfMessage,
    /// base:1.1 chunked framing
    Chunked,
}

/// Incremental decoder for framed NETCONF messages
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    max_chunk_size: usize,
    max_message_size: usize,
    pending: BytesMut,
}

impl FrameDecoder {
    /// Create a decoder in end-of-message mode
    pub fn new() -> Self {
        Self {
            framing: Framing::EndOfMessage,
            max_chunk_size: MAX_CHUNK_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
            pending: BytesMut::new(),
        }
    }

    /// Override the size limits
    pub fn with_limits(mut self, max_chunk_size: usize, max_message_size: usize) -> Self {
        self.max_chunk_size = max_chunk_size;
        self.max_message_size = max_message_size;
        self
    }

    /// Current framing
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Switch framing; bytes already buffered are decoded with the new mode
    pub fn set_framing(&mut self, framing: Framing) {
        debug!(from = ?self.framing, to = ?framing, "switching framing");
        self.framing = framing;
        self.pending.clear();
    }

    /// Decode one complete message from `buf`, consuming its bytes
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, WireError> {
        match self.framing {
            Framing::EndOfMessage => self.decode_eom(buf),
            Framing::Chunked => self.decode_chunked(buf),
        }
    }

    fn decode_eom(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, WireError> {
        let Some(pos) = find(buf, END_OF_MESSAGE) else {
            if buf.len() > self.max_message_size {
                return Err(WireError::Size(buf.len()));
            }
            return Ok(None);
        };

        let message = buf.split_to(pos).freeze();
        buf.advance(END_OF_MESSAGE.len());
        Ok(Some(message))
    }

    fn decode_chunked(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, WireError> {
        loop {
            if buf.len() < 4 {
                return Ok(None);
            }
            if buf[0] != b'\n' || buf[1] != b'#' {
                return Err(WireError::ChunkHeader(describe(&buf[..2])));
            }

            if buf[2] == b'#' {
                if buf[3] != b'\n' {
                    return Err(WireError::ChunkFooter(describe(&buf[..4])));
                }
                if self.pending.is_empty() {
                    return Err(WireError::ChunkFooter("end-of-chunks without data".into()));
                }
                buf.advance(END_OF_CHUNKS.len());
                return Ok(Some(self.pending.split().freeze()));
            }

            let Some(lf) = buf[2..].iter().position(|b| *b == b'\n') else {
                if buf.len() >= MAX_CHUNK_HEADER_LEN {
                    return Err(WireError::ChunkHeader(describe(&buf[..MAX_CHUNK_HEADER_LEN])));
                }
                return Ok(None);
            };

            let digits = &buf[2..2 + lf];
            let size = parse_chunk_size(digits)?;
            if size > self.max_chunk_size {
                return Err(WireError::Size(size));
            }
            if self.pending.len() + size > self.max_message_size {
                return Err(WireError::Size(self.pending.len() + size));
            }

            let header_len = 2 + lf + 1;
            if buf.len() < header_len + size {
                return Ok(None);
            }

            buf.advance(header_len);
            self.pending.extend_from_slice(&buf.split_to(size));
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame an outgoing message
pub fn encode_frame(framing: Framing, payload: &[u8]) -> Bytes {
    encode_frame_with_chunk_size(framing, payload, DEFAULT_CHUNK_SIZE)
}

/// Frame an outgoing message, splitting chunked output at `chunk_size`
pub fn encode_frame_with_chunk_size(framing: Framing, payload: &[u8], chunk_size: usize) -> Bytes {
    match framing {
        Framing::EndOfMessage => {
            let mut buf = BytesMut::with_capacity(payload.len() + END_OF_MESSAGE.len());
            buf.put_slice(payload);
            buf.put_slice(END_OF_MESSAGE);
            buf.freeze()
        }
        Framing::Chunked => {
            let chunk_size = chunk_size.max(1);
            let mut buf = BytesMut::with_capacity(payload.len() + 16);
            for chunk in payload.chunks(chunk_size) {
                buf.put_slice(format!("\n#{}\n", chunk.len()).as_bytes());
                buf.put_slice(chunk);
            }
            buf.put_slice(END_OF_CHUNKS);
            buf.freeze()
        }
    }
}

fn parse_chunk_size(digits: &[u8]) -> Result<usize, WireError> {
    let valid = !digits.is_empty()
        && digits.len() <= 10
        && (b'1'..=b'9').contains(&digits[0])
        && digits.iter().all(u8::is_ascii_digit);
    if !valid {
        return Err(WireError::ChunkHeader(describe(digits)));
    }

    let size: u64 = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| WireError::ChunkHeader(describe(digits)))?;
    if size > u32::MAX as u64 {
        return Err(WireError::ChunkHeader(describe(digits)));
    }
    Ok(size as usize)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn describe(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).escape_debug().to_string()
}
