//! Keepalive scheduling.
//!
//! One task per session owns all scheduling state. Foreground requests talk to
//! it through a [`KeepaliveHandle`]: `disable` before sending, `enable` once a
//! reply arrived. The task fires a probe (get-config with an empty subtree
//! filter) only after a full delay without traffic and with no foreground
//! request outstanding.
//!
//! Probe outcome:
//!
//! | reply                      | action     |
//! |----------------------------|------------|
//! | payload                    | reschedule |
//! | non-empty rpc-error list   | reschedule |
//! | no payload / empty errors  | reconnect  |
//! | failure or timeout         | reconnect  |

use std::time::Duration;

use futures::future;
use netconf_wire::{op, Datastore, XmlNode, BASE_NS};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace, warn};

use crate::config::NetconfClientConfig;
use crate::device::DeviceId;
use crate::error::SessionError;
use crate::reconnect::SessionReconnect;
use crate::rpc::{DeviceRpc, RpcResult};
use crate::timeout::with_deadline;

type ProbeResult = Result<RpcResult, SessionError>;

/// Keepalive timing and probe target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepaliveSettings {
    /// Idle time before probing
    pub delay: Duration,
    /// Deadline for the probe reply
    pub request_timeout: Duration,
    /// Datastore read by the probe
    pub datastore: Datastore,
}

impl From<&NetconfClientConfig> for KeepaliveSettings {
    fn from(config: &NetconfClientConfig) -> Self {
        Self {
            delay: config.keepalive_delay(),
            request_timeout: config.request_timeout(),
            datastore: config.keepalive_datastore.clone(),
        }
    }
}

/// What to do after a probe completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeVerdict {
    /// Device answered; probe again after the delay
    Reschedule,
    /// Session is dead or misbehaving
    Reconnect,
}

/// Classify a probe outcome
pub fn evaluate_probe(result: &ProbeResult) -> ProbeVerdict {
    match result {
        Ok(RpcResult::Value(_)) => ProbeVerdict::Reschedule,
        Ok(RpcResult::Errors(errors)) if !errors.is_empty() => ProbeVerdict::Reschedule,
        Ok(_) | Err(_) => ProbeVerdict::Reconnect,
    }
}

/// get-config on `datastore` with an empty subtree filter
pub fn keepalive_request(datastore: &Datastore) -> XmlNode {
    XmlNode::new(op::GET_CONFIG)
        .with_namespace(BASE_NS)
        .with_child(XmlNode::new("source").with_child(datastore.element()))
        .with_child(XmlNode::new("filter").with_attribute("type", "subtree"))
}

#[derive(Debug)]
enum Command {
    Disable,
    Enable,
    RecordActivity,
    Stop,
}

/// Sender side of a session's keepalive task
#[derive(Debug, Clone)]
pub struct KeepaliveHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl KeepaliveHandle {
    /// Start the keepalive task; the first probe is due one delay from now
    pub fn spawn(
        id: DeviceId,
        settings: KeepaliveSettings,
        rpc: DeviceRpc,
        reconnect: SessionReconnect,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        let task = KeepaliveTask {
            deadline: Some(now + settings.delay),
            id,
            settings,
            rpc,
            reconnect,
            rx,
            last_activity: now,
            in_flight: 0,
            probe: None,
        };
        tokio::spawn(task.run());
        Self { tx }
    }

    /// A foreground request is about to be sent
    pub fn disable_keepalive(&self) {
        let _ = self.tx.send(Command::Disable);
    }

    /// A foreground request completed
    pub fn enable_keepalive(&self) {
        let _ = self.tx.send(Command::Enable);
    }

    /// Traffic observed; postpone the next probe
    pub fn record_activity(&self) {
        let _ = self.tx.send(Command::RecordActivity);
    }

    /// Stop the task; idempotent
    pub fn stop(&self) {
        let _ = self.tx.send(Command::Stop);
    }

    /// True once the task has exited
    pub fn is_stopped(&self) -> bool {
        self.tx.is_closed()
    }
}

struct KeepaliveTask {
    id: DeviceId,
    settings: KeepaliveSettings,
    rpc: DeviceRpc,
    reconnect: SessionReconnect,
    rx: mpsc::UnboundedReceiver<Command>,
    last_activity: Instant,
    // foreground requests between disable and enable
    in_flight: usize,
    // at most one armed timer
    deadline: Option<Instant>,
    probe: Option<JoinHandle<ProbeResult>>,
}

impl KeepaliveTask {
    async fn run(mut self) {
        debug!("{}: keepalive started, delay {:?}", self.id, self.settings.delay);

        let cause = loop {
            tokio::select! {
                biased;

                cmd = self.rx.recv() => match cmd {
                    Some(Command::Disable) => self.in_flight += 1,
                    Some(Command::Enable) => self.on_enable(),
                    Some(Command::RecordActivity) => self.last_activity = Instant::now(),
                    Some(Command::Stop) | None => break None,
                },

                joined = wait_probe(&mut self.probe) => {
                    self.probe = None;
                    let result = joined.unwrap_or(Err(SessionError::Cancelled));
                    if let Some(cause) = self.on_probe_completed(result) {
                        break Some(cause);
                    }
                }

                _ = wait_deadline(self.deadline) => self.on_timer(),
            }
        };

        if let Some(probe) = self.probe.take() {
            probe.abort();
        }
        self.rx.close();

        match cause {
            Some(cause) => {
                self.reconnect.request(&cause);
            }
            None => debug!("{}: keepalive stopped", self.id),
        }
    }

    fn on_enable(&mut self) {
        self.last_activity = Instant::now();
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.deadline.is_none() && self.probe.is_none() {
            self.deadline = Some(self.last_activity + self.settings.delay);
        }
    }

    fn on_timer(&mut self) {
        self.deadline = None;

        let elapsed = self.last_activity.elapsed();
        if elapsed < self.settings.delay {
            let remaining = self.settings.delay - elapsed;
            trace!("{}: traffic seen {:?} ago, next keepalive in {:?}", self.id, elapsed, remaining);
            self.deadline = Some(self.last_activity + self.settings.delay);
            return;
        }

        if self.in_flight > 0 {
            debug!(
                "{}: skipping keepalive, {} request(s) outstanding",
                self.id, self.in_flight
            );
            return;
        }

        if self.probe.is_none() {
            self.send_probe();
        }
    }

    fn send_probe(&mut self) {
        trace!("{}: sending keepalive", self.id);
        let rpc = self.rpc.clone();
        let request = keepalive_request(&self.settings.datastore);
        let timeout = self.settings.request_timeout;
        self.probe = Some(tokio::spawn(async move {
            with_deadline(rpc.invoke(op::GET_CONFIG, request), timeout).await
        }));
    }

    fn on_probe_completed(&mut self, result: ProbeResult) -> Option<SessionError> {
        match evaluate_probe(&result) {
            ProbeVerdict::Reschedule => {
                if let Ok(RpcResult::Errors(errors)) = &result {
                    warn!(
                        "{}: keepalive answered with {} error(s), session is alive: {}",
                        self.id,
                        errors.len(),
                        errors[0]
                    );
                } else {
                    trace!("{}: keepalive ok", self.id);
                }
                self.last_activity = Instant::now();
                self.deadline = Some(self.last_activity + self.settings.delay);
                None
            }
            ProbeVerdict::Reconnect => {
                let cause = match result {
                    Err(err) => err,
                    Ok(_) => SessionError::Transport("keepalive reply carried no payload".into()),
                };
                warn!("{}: keepalive failed: {}", self.id, cause);
                Some(cause)
            }
        }
    }
}

async fn wait_probe(probe: &mut Option<JoinHandle<ProbeResult>>) -> Result<ProbeResult, JoinError> {
    match probe {
        Some(handle) => handle.await,
        None => future::pending().await,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconnect::{ReconnectCoordinator, SessionListener};
    use crate::rpc::RpcInvoker;
    use async_trait::async_trait;
    use netconf_wire::RpcError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::sleep;

    #[derive(Clone)]
    enum Behavior {
        Reply(RpcResult),
        Hang,
    }

    struct ScriptedDevice {
        behavior: Behavior,
        calls: Mutex<Vec<(String, XmlNode)>>,
    }

    impl ScriptedDevice {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl RpcInvoker for ScriptedDevice {
        async fn invoke_rpc(&self, operation: &str, input: XmlNode) -> Result<RpcResult, SessionError> {
            self.calls.lock().push((operation.to_string(), input));
            match self.behavior.clone() {
                Behavior::Reply(result) => Ok(result),
                Behavior::Hang => future::pending().await,
            }
        }
    }

    #[derive(Default)]
    struct CountingListener {
        disconnects: AtomicUsize,
    }

    impl SessionListener for CountingListener {
        fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        device: Arc<ScriptedDevice>,
        listener: Arc<CountingListener>,
        handle: KeepaliveHandle,
    }

    impl Harness {
        fn disconnects(&self) -> usize {
            self.listener.disconnects.load(Ordering::SeqCst)
        }
    }

    fn start(behavior: Behavior) -> Harness {
        let id = DeviceId::new("r1", "127.0.0.1:830");
        let device = ScriptedDevice::new(behavior);
        let listener = Arc::new(CountingListener::default());
        let coordinator = ReconnectCoordinator::new(id.clone());
        coordinator.set_listener(listener.clone());

        let session = coordinator.begin_session();
        let settings = KeepaliveSettings {
            delay: Duration::from_secs(10),
            request_timeout: Duration::from_secs(2),
            datastore: Datastore::Running,
        };
        let handle = KeepaliveHandle::spawn(id, settings, DeviceRpc::Normalized(device.clone()), session.clone());
        coordinator.attach_keepalive(&session, handle.clone());

        Harness {
            device,
            listener,
            handle,
        }
    }

    fn data() -> RpcResult {
        RpcResult::Value(XmlNode::new("data"))
    }

    #[test]
    fn test_probe_payload() {
        assert_eq!(
            keepalive_request(&Datastore::Running).to_xml(),
            "<get-config xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\">\
             <source><running/></source><filter type=\"subtree\"/></get-config>"
        );
    }

    #[test]
    fn test_evaluate_probe() {
        assert_eq!(evaluate_probe(&Ok(data())), ProbeVerdict::Reschedule);
        assert_eq!(
            evaluate_probe(&Ok(RpcResult::Errors(vec![RpcError::new("rpc", "operation-failed", "x")]))),
            ProbeVerdict::Reschedule
        );
        assert_eq!(evaluate_probe(&Ok(RpcResult::Errors(vec![]))), ProbeVerdict::Reconnect);
        assert_eq!(evaluate_probe(&Ok(RpcResult::Empty)), ProbeVerdict::Reconnect);
        assert_eq!(evaluate_probe(&Err(SessionError::Cancelled)), ProbeVerdict::Reconnect);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_after_delay_then_rescheduled() {
        let h = start(Behavior::Reply(data()));

        sleep(Duration::from_millis(9_900)).await;
        assert_eq!(h.device.calls(), 0);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(h.device.calls(), 1);
        assert_eq!(h.device.calls.lock()[0].0, op::GET_CONFIG);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(h.device.calls(), 2);
        assert_eq!(h.disconnects(), 0);
        assert!(!h.handle.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_reply_keeps_session() {
        let h = start(Behavior::Reply(RpcResult::Errors(vec![RpcError::new(
            "application",
            "operation-not-supported",
            "filtering not supported",
        )])));

        sleep(Duration::from_millis(30_100)).await;
        assert_eq!(h.device.calls(), 3);
        assert_eq!(h.disconnects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_reply_reconnects_once() {
        let h = start(Behavior::Reply(RpcResult::Empty));

        sleep(Duration::from_millis(10_100)).await;
        assert_eq!(h.device.calls(), 1);
        assert_eq!(h.disconnects(), 1);

        sleep(Duration::from_secs(120)).await;
        assert_eq!(h.device.calls(), 1);
        assert_eq!(h.disconnects(), 1);
        assert!(h.handle.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_device_reconnects_once() {
        let h = start(Behavior::Hang);

        sleep(Duration::from_millis(11_900)).await;
        assert_eq!(h.device.calls(), 1);
        assert_eq!(h.disconnects(), 0);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(h.disconnects(), 1);

        sleep(Duration::from_secs(120)).await;
        assert_eq!(h.device.calls(), 1);
        assert_eq!(h.disconnects(), 1);
        assert!(h.handle.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_probe_while_request_outstanding() {
        let h = start(Behavior::Reply(data()));

        sleep(Duration::from_secs(5)).await;
        h.handle.disable_keepalive();

        sleep(Duration::from_secs(25)).await;
        assert_eq!(h.device.calls(), 0);

        h.handle.enable_keepalive();
        sleep(Duration::from_millis(9_900)).await;
        assert_eq!(h.device.calls(), 0);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(h.device.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_requests_keep_suppression() {
        let h = start(Behavior::Reply(data()));

        h.handle.disable_keepalive();
        h.handle.disable_keepalive();
        h.handle.enable_keepalive();

        sleep(Duration::from_secs(40)).await;
        assert_eq!(h.device.calls(), 0);

        h.handle.enable_keepalive();
        sleep(Duration::from_millis(10_100)).await;
        assert_eq!(h.device.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_postpones_probe() {
        let h = start(Behavior::Reply(data()));

        sleep(Duration::from_secs(8)).await;
        h.handle.record_activity();

        sleep(Duration::from_millis(9_900)).await;
        assert_eq!(h.device.calls(), 0);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(h.device.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let h = start(Behavior::Reply(data()));

        h.handle.stop();
        h.handle.stop();
        sleep(Duration::from_secs(60)).await;
        h.handle.stop();

        assert!(h.handle.is_stopped());
        assert_eq!(h.device.calls(), 0);
        assert_eq!(h.disconnects(), 0);
    }
}
