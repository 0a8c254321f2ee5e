//! Session communicator: the transport side of a device session.
//!
//! Owns the framed stream after the hello exchange. Requests are written by a
//! dedicated writer task and correlated with replies by message-id; every
//! outstanding request is failed when the session ends.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use netconf_wire::{
    encode_frame, op, rpc_envelope, rpc_envelope_raw, FrameDecoder, Framing, IncomingMessage, RpcReply, XmlNode,
    BASE_NS,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::device::DeviceId;
use crate::error::SessionError;
use crate::handler::RemoteDeviceHandler;
use crate::handshake::HandshakeOutcome;
use crate::reconnect::SessionListener;
use crate::rpc::{RpcInvoker, RpcResult, SchemalessRpc};

struct Reply {
    reply: RpcReply,
    raw: Bytes,
}

type PendingMap = DashMap<u64, oneshot::Sender<Result<Reply, SessionError>>>;

struct Inner {
    id: DeviceId,
    framing: Framing,
    outbound: mpsc::UnboundedSender<Bytes>,
    pending: PendingMap,
    next_message_id: AtomicU64,
    limit: Option<(usize, Arc<Semaphore>)>,
    closing: AtomicBool,
    shutdown: Notify,
}

/// Handle to a running session; cheap to clone
#[derive(Clone)]
pub struct NetconfCommunicator {
    inner: Arc<Inner>,
}

// Removes the pending record when the request finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    message_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.message_id);
    }
}

impl NetconfCommunicator {
    /// Start the session task on a stream that completed the hello exchange.
    ///
    /// The returned join handle resolves once the session has ended and
    /// `handler.on_device_disconnected()` has been called.
    pub fn start<S>(
        id: DeviceId,
        stream: S,
        handshake: HandshakeOutcome,
        handler: Arc<dyn RemoteDeviceHandler>,
        concurrent_rpc_limit: Option<usize>,
    ) -> (Self, JoinHandle<()>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            id,
            framing: handshake.framing(),
            outbound,
            pending: DashMap::new(),
            next_message_id: AtomicU64::new(1),
            limit: concurrent_rpc_limit.map(|limit| (limit, Arc::new(Semaphore::new(limit)))),
            closing: AtomicBool::new(false),
            shutdown: Notify::new(),
        });

        let task = tokio::spawn(run_session(
            inner.clone(),
            stream,
            handshake.decoder,
            handshake.buffer,
            outbound_rx,
            handler,
        ));

        (Self { inner }, task)
    }

    /// Device this session talks to
    pub fn id(&self) -> &DeviceId {
        &self.inner.id
    }

    /// Number of requests awaiting a reply
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// True once the session is shutting down
    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    /// Ask the device to end the session, then disconnect
    pub async fn close_session(&self) -> Result<(), SessionError> {
        let result = self
            .send_request(op::CLOSE_SESSION, |message_id| {
                rpc_envelope(
                    message_id,
                    XmlNode::new(op::CLOSE_SESSION).with_namespace(BASE_NS),
                )
            })
            .await;
        self.disconnect();
        result.map(|_| ())
    }

    // `render` builds the envelope for the allocated message-id.
    async fn send_request<F>(&self, operation: &str, render: F) -> Result<Reply, SessionError>
    where
        F: FnOnce(&str) -> String,
    {
        let inner = &self.inner;
        if inner.closing.load(Ordering::SeqCst) {
            return Err(SessionError::SessionDown);
        }

        let _permit = match &inner.limit {
            Some((limit, semaphore)) => Some(
                semaphore
                    .clone()
                    .try_acquire_owned()
                    .map_err(|_| SessionError::LimitReached(*limit))?,
            ),
            None => None,
        };

        let message_id = inner.next_message_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        inner.pending.insert(message_id, tx);
        let _guard = PendingGuard {
            pending: &inner.pending,
            message_id,
        };

        let message = render(&message_id.to_string());
        trace!("{}: sending {} (message-id {})", inner.id, operation, message_id);
        inner
            .outbound
            .send(encode_frame(inner.framing, message.as_bytes()))
            .map_err(|_| SessionError::SessionDown)?;

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(SessionError::SessionDown),
        }
    }
}

#[async_trait]
impl RpcInvoker for NetconfCommunicator {
    async fn invoke_rpc(&self, operation: &str, input: XmlNode) -> Result<RpcResult, SessionError> {
        let mut element = input;
        element.name = operation.to_string();
        let reply = self
            .send_request(operation, |message_id| rpc_envelope(message_id, element))
            .await?;
        Ok(RpcResult::from(reply.reply.body))
    }
}

#[async_trait]
impl SchemalessRpc for NetconfCommunicator {
    async fn invoke_netconf(
        &self,
        operation: &str,
        input: XmlNode,
    ) -> Result<RpcResult, SessionError> {
        self.invoke_rpc(operation, input).await
    }

    async fn invoke_raw(&self, request: String) -> Result<String, SessionError> {
        // parsed only to reject malformed input; the text itself is sent as is
        let operation = XmlNode::parse(&request)
            .map_err(|err| SessionError::InvalidArgument(format!("raw request: {}", err)))?;
        let reply = self
            .send_request(&operation.name, |message_id| {
                rpc_envelope_raw(message_id, &request)
            })
            .await?;
        String::from_utf8(reply.raw.to_vec())
            .map_err(|_| SessionError::Wire(netconf_wire::WireError::Utf8))
    }
}

impl SessionListener for NetconfCommunicator {
    fn disconnect(&self) {
        if !self.inner.closing.swap(true, Ordering::SeqCst) {
            debug!("{}: disconnect requested", self.inner.id);
            self.inner.shutdown.notify_one();
        }
    }
}

impl Inner {
    fn dispatch(&self, raw: Bytes, handler: &dyn RemoteDeviceHandler) {
        let message = match IncomingMessage::parse(&raw) {
            Ok(message) => message,
            Err(err) => {
                warn!("{}: dropping malformed message: {}", self.id, err);
                return;
            }
        };

        match message {
            IncomingMessage::Reply(reply) => {
                let Some(message_id) = reply
                    .message_id
                    .as_deref()
                    .and_then(|id| id.trim().parse::<u64>().ok())
                else {
                    warn!("{}: ignoring reply without usable message-id", self.id);
                    return;
                };

                match self.pending.remove(&message_id) {
                    Some((_, tx)) => {
                        trace!("{}: reply for message-id {}", self.id, message_id);
                        let _ = tx.send(Ok(Reply { reply, raw }));
                    }
                    None => warn!(
                        "{}: ignoring reply for unknown message-id {}",
                        self.id, message_id
                    ),
                }
            }
            IncomingMessage::Notification(notification) => {
                trace!("{}: notification received", self.id);
                handler.on_notification(notification);
            }
            IncomingMessage::Hello(_) => {
                warn!("{}: ignoring unexpected hello", self.id);
            }
        }
    }

    fn fail_pending(&self) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        if !ids.is_empty() {
            debug!("{}: failing {} outstanding request(s)", self.id, ids.len());
        }
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(SessionError::SessionDown));
            }
        }
    }
}

async fn run_session<S>(
    inner: Arc<Inner>,
    stream: S,
    mut decoder: FrameDecoder,
    mut buffer: BytesMut,
    outbound_rx: mpsc::UnboundedReceiver<Bytes>,
    handler: Arc<dyn RemoteDeviceHandler>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let mut writer_task = tokio::spawn(write_frames(inner.id.clone(), writer, outbound_rx));

    // bytes that arrived together with the server hello
    let mut alive = drain_messages(&inner, &mut decoder, &mut buffer, handler.as_ref());

    while alive {
        tokio::select! {
            biased;

            _ = inner.shutdown.notified() => {
                debug!("{}: closing session", inner.id);
                break;
            }

            _ = &mut writer_task => break,

            read = reader.read_buf(&mut buffer) => match read {
                Ok(0) => {
                    info!("{}: session closed by device", inner.id);
                    break;
                }
                Ok(n) => {
                    trace!("{}: read {} bytes", inner.id, n);
                    alive = drain_messages(&inner, &mut decoder, &mut buffer, handler.as_ref());
                }
                Err(e) => {
                    warn!("{}: read failed: {}", inner.id, e);
                    break;
                }
            },
        }
    }

    inner.closing.store(true, Ordering::SeqCst);
    // a write stuck on a device that stopped reading must not hold teardown
    writer_task.abort();
    inner.fail_pending();

    info!("{}: session disconnected", inner.id);
    handler.on_device_disconnected();
}

fn drain_messages(
    inner: &Inner,
    decoder: &mut FrameDecoder,
    buffer: &mut BytesMut,
    handler: &dyn RemoteDeviceHandler,
) -> bool {
    loop {
        match decoder.decode(buffer) {
            Ok(Some(message)) => inner.dispatch(message, handler),
            Ok(None) => return true,
            Err(e) => {
                warn!("{}: framing error, dropping session: {}", inner.id, e);
                return false;
            }
        }
    }
}

async fn write_frames<W>(
    id: DeviceId,
    mut writer: W,
    mut outbound_rx: mpsc::UnboundedReceiver<Bytes>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbound_rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            warn!("{}: write failed: {}", id, e);
            return;
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}
