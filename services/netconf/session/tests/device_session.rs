//! End-to-end device session tests against a scripted device.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use netconf_session::{
    client_handshake, BaseOperations, Connector, DeviceId, DeviceRpc, DeviceSchema,
    KeepaliveFacade, NetconfClientConfig, NetconfCommunicator, RemoteDeviceHandler,
    RemoteDeviceServices, SessionError, SessionPreferences,
};
use netconf_wire::{
    encode_frame, op, FrameDecoder, Framing, Notification, XmlNode, BASE_1_0_CAPABILITY,
    BASE_1_1_CAPABILITY, BASE_NS, NOTIFICATION_NS,
};
use parking_lot::Mutex;
use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const DELAY: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct UpperHandler {
    connected: AtomicUsize,
    disconnected: AtomicUsize,
    failed: AtomicUsize,
    closed: AtomicUsize,
    services: Mutex<Option<DeviceRpc>>,
    notifications: Mutex<Vec<Notification>>,
}

impl UpperHandler {
    fn operations(&self) -> BaseOperations {
        let rpcs = self.services.lock().clone().expect("device not connected");
        BaseOperations::from(rpcs)
    }
}

impl RemoteDeviceHandler for UpperHandler {
    fn on_device_connected(
        &self,
        _schema: DeviceSchema,
        _preferences: SessionPreferences,
        services: RemoteDeviceServices,
    ) {
        self.connected.fetch_add(1, Ordering::SeqCst);
        *self.services.lock() = Some(services.rpcs);
    }

    fn on_device_disconnected(&self) {
        self.disconnected.fetch_add(1, Ordering::SeqCst);
    }

    fn on_device_failed(&self, _cause: SessionError) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_notification(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeDevice<S> {
    stream: S,
    framing: Framing,
    decoder: FrameDecoder,
    buffer: BytesMut,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FakeDevice<S> {
    /// Read the client hello and answer with `capabilities`
    async fn accept(mut stream: S, capabilities: &[&str]) -> Self {
        let mut decoder = FrameDecoder::new();
        let mut buffer = BytesMut::new();
        loop {
            if decoder.decode(&mut buffer).unwrap().is_some() {
                break;
            }
            assert!(stream.read_buf(&mut buffer).await.unwrap() > 0);
        }

        let caps: String = capabilities
            .iter()
            .map(|c| format!("<capability>{}</capability>", c))
            .collect();
        let hello = format!(
            r#"<hello xmlns="{}"><capabilities>{}</capabilities><session-id>4</session-id></hello>"#,
            BASE_NS, caps
        );
        stream
            .write_all(&encode_frame(Framing::EndOfMessage, hello.as_bytes()))
            .await
            .unwrap();

        let framing = if capabilities.contains(&BASE_1_1_CAPABILITY) {
            Framing::Chunked
        } else {
            Framing::EndOfMessage
        };
        decoder.set_framing(framing);

        Self {
            stream,
            framing,
            decoder,
            buffer,
        }
    }

    /// Next request as (message-id, operation element)
    async fn next_rpc(&mut self) -> (String, XmlNode) {
        loop {
            if let Some(msg) = self.decoder.decode(&mut self.buffer).unwrap() {
                let rpc = XmlNode::parse(std::str::from_utf8(&msg).unwrap()).unwrap();
                let id = rpc.attribute("message-id").unwrap().to_string();
                return (id, rpc.children.into_iter().next().unwrap());
            }
            let read = self.stream.read_buf(&mut self.buffer).await.unwrap();
            assert!(read > 0, "client closed the session");
        }
    }

    async fn send(&mut self, xml: &str) {
        self.stream
            .write_all(&encode_frame(self.framing, xml.as_bytes()))
            .await
            .unwrap();
    }

    async fn reply(&mut self, message_id: &str, body: &str) {
        let xml = format!(
            r#"<rpc-reply xmlns="{}" message-id="{}">{}</rpc-reply>"#,
            BASE_NS, message_id, body
        );
        self.send(&xml).await;
    }

    /// True once the client has shut its side of the stream
    async fn is_closed(&mut self) -> bool {
        let mut rest = Vec::new();
        matches!(self.stream.read_to_end(&mut rest).await, Ok(_)) && rest.is_empty()
    }
}

fn is_keepalive(operation: &XmlNode) -> bool {
    operation.name == op::GET_CONFIG
        && operation.child("filter").map_or(false, |f| f.children.is_empty())
        && operation.child("source").and_then(|s| s.child("running")).is_some()
}

struct Session {
    device: FakeDevice<DuplexStream>,
    handler: Arc<UpperHandler>,
    facade: Arc<KeepaliveFacade>,
    task: JoinHandle<()>,
}

async fn connect(config: NetconfClientConfig) -> Session {
    let id = DeviceId::new("edge-1", "192.0.2.10:830");
    let (mut client, server) = duplex(256 * 1024);

    let (handshake, device) = tokio::join!(
        client_handshake(&mut client, &id),
        FakeDevice::accept(server, &[BASE_1_0_CAPABILITY, BASE_1_1_CAPABILITY]),
    );
    let handshake = handshake.unwrap();
    assert_eq!(handshake.framing(), Framing::Chunked);
    let preferences = handshake.preferences.clone();

    let handler = Arc::new(UpperHandler::default());
    let facade = Arc::new(KeepaliveFacade::new(id.clone(), handler.clone(), &config));
    let (comm, task) = NetconfCommunicator::start(
        id,
        client,
        handshake,
        facade.clone(),
        config.rpc_limit(),
    );
    facade.set_listener(Arc::new(comm.clone()));
    facade.on_device_connected(
        DeviceSchema::from_preferences(&preferences),
        preferences,
        RemoteDeviceServices::new(DeviceRpc::Schemaless(Arc::new(comm))),
    );

    Session {
        device,
        handler,
        facade,
        task,
    }
}

fn client_config() -> NetconfClientConfig {
    NetconfClientConfig {
        keepalive_delay_secs: DELAY.as_secs(),
        request_timeout_millis: REQUEST_TIMEOUT.as_millis() as u64,
        ..Default::default()
    }
}

fn assert_near(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(100),
        "expected ~{:?}, got {:?}",
        expected,
        actual
    );
}

#[tokio::test(start_paused = true)]
async fn test_idle_session_is_probed_every_delay() {
    let mut session = connect(client_config()).await;
    let start = Instant::now();

    let (id, operation) = session.device.next_rpc().await;
    assert!(is_keepalive(&operation));
    assert_near(start.elapsed(), DELAY);
    session.device.reply(&id, "<data/>").await;

    let (id, operation) = session.device.next_rpc().await;
    assert!(is_keepalive(&operation));
    assert_near(start.elapsed(), DELAY * 2);
    session
        .device
        .reply(
            &id,
            "<rpc-error><error-type>application</error-type>\
             <error-tag>operation-not-supported</error-tag>\
             <error-severity>error</error-severity></rpc-error>",
        )
        .await;

    // an error reply still proves the session alive
    let (_, operation) = session.device.next_rpc().await;
    assert!(is_keepalive(&operation));
    assert_near(start.elapsed(), DELAY * 3);
    assert_eq!(session.handler.disconnected.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_device_is_disconnected_once() {
    let mut session = connect(client_config()).await;
    let start = Instant::now();

    let (_, operation) = session.device.next_rpc().await;
    assert!(is_keepalive(&operation));

    session.task.await.unwrap();
    assert_near(start.elapsed(), DELAY + REQUEST_TIMEOUT);
    assert_eq!(session.handler.disconnected.load(Ordering::SeqCst), 1);

    // nothing but EOF after the reconnect request
    assert!(session.device.is_closed().await);
}

#[tokio::test(start_paused = true)]
async fn test_empty_probe_reply_forces_reconnect() {
    let mut session = connect(client_config()).await;

    let (id, _) = session.device.next_rpc().await;
    session.device.reply(&id, "").await;

    session.task.await.unwrap();
    assert_eq!(session.handler.disconnected.load(Ordering::SeqCst), 1);
    assert!(session.device.is_closed().await);
}

#[tokio::test(start_paused = true)]
async fn test_foreground_request_suppresses_probe() {
    let mut session = connect(client_config()).await;
    let start = Instant::now();

    tokio::time::sleep(Duration::from_secs(9)).await;
    let ops = session.handler.operations();
    let request = tokio::spawn(async move { ops.get_config_running(&[]).await });

    let (id, operation) = session.device.next_rpc().await;
    assert_eq!(operation.name, op::GET_CONFIG);
    assert!(operation.child("filter").is_none());

    // the probe due at 10s must not be sent while the request is outstanding
    let quiet = tokio::time::timeout(Duration::from_millis(1500), session.device.next_rpc()).await;
    assert!(quiet.is_err());

    session.device.reply(&id, "<data><interfaces/></data>").await;
    let result = request.await.unwrap().unwrap();
    assert!(result.into_data().unwrap().child("interfaces").is_some());
    let replied_at = start.elapsed();

    // cadence resumes one delay after the reply
    let (_, operation) = session.device.next_rpc().await;
    assert!(is_keepalive(&operation));
    assert_near(start.elapsed(), replied_at + DELAY);
    assert_eq!(session.handler.disconnected.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_foreground_timeout_tears_down_session() {
    let mut session = connect(client_config()).await;

    let ops = session.handler.operations();
    let start = Instant::now();
    let request = tokio::spawn(async move { ops.lock_candidate().await });

    let (_, operation) = session.device.next_rpc().await;
    assert_eq!(operation.name, op::LOCK);

    let err = request.await.unwrap().unwrap_err();
    assert!(err.is_timeout());
    assert_near(start.elapsed(), REQUEST_TIMEOUT);

    session.task.await.unwrap();
    assert_eq!(session.handler.disconnected.load(Ordering::SeqCst), 1);
    assert!(session.device.is_closed().await);

    // later requests fail without touching the device
    let err = session
        .handler
        .operations()
        .commit()
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::SessionDown));
}

#[tokio::test(start_paused = true)]
async fn test_notification_postpones_probe() {
    let mut session = connect(client_config()).await;
    let start = Instant::now();

    tokio::time::sleep(Duration::from_secs(5)).await;
    session
        .device
        .send(&format!(
            r#"<notification xmlns="{}"><eventTime>2024-05-01T10:00:00Z</eventTime><config-change/></notification>"#,
            NOTIFICATION_NS
        ))
        .await;

    let (_, operation) = session.device.next_rpc().await;
    assert!(is_keepalive(&operation));
    assert_near(start.elapsed(), Duration::from_secs(15));

    let notifications = session.handler.notifications.lock();
    assert_eq!(notifications.len(), 1);
    assert_eq!(
        notifications[0].event_time.as_deref(),
        Some("2024-05-01T10:00:00Z")
    );
}

#[tokio::test(start_paused = true)]
async fn test_close_is_idempotent() {
    let mut session = connect(client_config()).await;

    session.facade.close();
    session.facade.close();
    session.facade.stop_keepalives();

    assert!(session.facade.is_closed());
    assert_eq!(session.handler.closed.load(Ordering::SeqCst), 1);

    // closing releases the transport too
    session.task.await.unwrap();
    assert_eq!(session.handler.disconnected.load(Ordering::SeqCst), 1);
    assert!(session.device.is_closed().await);
    assert!(matches!(
        session.facade.reconnect(),
        Err(SessionError::MissingListener)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_explicit_reconnect_drops_session() {
    let mut session = connect(client_config()).await;

    session.facade.reconnect().unwrap();
    session.task.await.unwrap();

    assert_eq!(session.handler.disconnected.load(Ordering::SeqCst), 1);
    assert!(session.device.is_closed().await);
}

fn connector_config() -> NetconfClientConfig {
    NetconfClientConfig {
        keepalive_delay_secs: 0,
        connection_timeout_millis: 1_000,
        between_attempts_timeout_millis: 10,
        max_between_attempts_timeout_millis: 50,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_connector_reestablishes_dropped_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let id = DeviceId::new("edge-2", address);
    let config = connector_config();
    let handler = Arc::new(UpperHandler::default());
    let facade = Arc::new(KeepaliveFacade::new(id.clone(), handler.clone(), &config));
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let connector = tokio::spawn(Connector::new(id, config, facade).unwrap().run(shutdown_rx));

    // first session: dropped by the device right after the hello
    let (stream, _) = listener.accept().await.unwrap();
    let device = FakeDevice::accept(stream, &[BASE_1_0_CAPABILITY]).await;
    drop(device);

    // second session: answers one request, then the client shuts down
    let (stream, _) = listener.accept().await.unwrap();
    let mut device = FakeDevice::accept(stream, &[BASE_1_0_CAPABILITY]).await;

    let ops = loop {
        if handler.connected.load(Ordering::SeqCst) == 2 {
            break handler.operations();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    let (result, ()) = tokio::join!(ops.discard_changes(), async {
        let (id, operation) = device.next_rpc().await;
        assert_eq!(operation.name, op::DISCARD_CHANGES);
        device.reply(&id, "<ok/>").await;
    });
    assert!(result.unwrap().is_success());

    shutdown_tx.send(()).await.unwrap();
    connector.await.unwrap().unwrap();

    assert!(device.is_closed().await);
    assert_eq!(handler.disconnected.load(Ordering::SeqCst), 2);
    assert_eq!(handler.closed.load(Ordering::SeqCst), 1);
    assert_eq!(handler.failed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_connector_gives_up_after_max_attempts() {
    // reserve a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let id = DeviceId::new("edge-3", address);
    let config = NetconfClientConfig {
        max_connection_attempts: 3,
        ..connector_config()
    };
    let handler = Arc::new(UpperHandler::default());
    let facade = Arc::new(KeepaliveFacade::new(id.clone(), handler.clone(), &config));
    let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);

    let result = Connector::new(id, config, facade).unwrap().run(shutdown_rx).await;

    assert!(result.is_err());
    assert_eq!(handler.failed.load(Ordering::SeqCst), 1);
    assert_eq!(handler.connected.load(Ordering::SeqCst), 0);
    assert_eq!(handler.closed.load(Ordering::SeqCst), 1);
}
