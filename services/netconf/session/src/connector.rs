//! Connection layer: establishes device sessions and re-establishes them with backoff.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::communicator::NetconfCommunicator;
use crate::config::NetconfClientConfig;
use crate::device::DeviceId;
use crate::error::SessionError;
use crate::facade::KeepaliveFacade;
use crate::handler::{RemoteDeviceHandler, RemoteDeviceServices};
use crate::handshake::{client_handshake, DeviceSchema};
use crate::reconnect::SessionListener;
use crate::rpc::DeviceRpc;
use crate::timeout::with_deadline;

/// Exponential backoff between connection attempts
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Multiplier applied per consecutive failure
    pub factor: f64,
    /// Consecutive failures tolerated; 0 retries forever
    pub max_attempts: u32,
}

impl Backoff {
    /// Delay after `attempt` consecutive failures (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.factor.powi(attempt.min(i32::MAX as u32) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// True once `failures` consecutive attempts have failed and retries are bounded
    pub fn should_give_up(&self, failures: u32) -> bool {
        self.max_attempts > 0 && failures >= self.max_attempts
    }
}

impl From<&NetconfClientConfig> for Backoff {
    fn from(config: &NetconfClientConfig) -> Self {
        Self {
            initial_delay: config.between_attempts_timeout(),
            max_delay: config.max_between_attempts_timeout(),
            factor: config.sleep_factor,
            max_attempts: config.max_connection_attempts,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Dropped,
    Shutdown,
}

/// Keeps one device connected for as long as it runs
pub struct Connector {
    id: DeviceId,
    config: NetconfClientConfig,
    backoff: Backoff,
    facade: Arc<KeepaliveFacade>,
}

impl Connector {
    /// Create a connector feeding sessions into `facade`
    pub fn new(
        id: DeviceId,
        config: NetconfClientConfig,
        facade: Arc<KeepaliveFacade>,
    ) -> anyhow::Result<Self> {
        ensure!(!id.address.is_empty(), "{}: device address is empty", id);
        ensure!(
            config.sleep_factor.is_finite() && config.sleep_factor >= 1.0,
            "{}: sleep_factor must be at least 1.0, got {}",
            id,
            config.sleep_factor
        );

        Ok(Self {
            backoff: Backoff::from(&config),
            id,
            config,
            facade,
        })
    }

    /// Device served by this connector
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Connect, serve and reconnect until `shutdown` fires or retries run out.
    ///
    /// Giving up is reported to the handler through `on_device_failed` and
    /// returned as an error.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) -> anyhow::Result<()> {
        let mut failures: u32 = 0;

        let result = loop {
            let attempt = tokio::select! {
                biased;
                _ = shutdown.recv() => break Ok(()),
                attempt = self.establish() => attempt,
            };

            let delay = match attempt {
                Ok((comm, task)) => {
                    failures = 0;
                    if self.serve(comm, task, &mut shutdown).await == SessionEnd::Shutdown
                        || self.facade.is_closed()
                    {
                        break Ok(());
                    }
                    self.backoff.delay_for_attempt(0)
                }
                Err(e) => {
                    failures += 1;
                    warn!("{}: connection attempt {} failed: {}", self.id, failures, e);
                    if self.backoff.should_give_up(failures) {
                        let message = format!(
                            "{}: giving up after {} failed connection attempts: {}",
                            self.id, failures, e
                        );
                        self.facade.on_device_failed(e);
                        break Err(anyhow!(message));
                    }
                    self.backoff.delay_for_attempt(failures - 1)
                }
            };

            debug!("{}: reconnecting in {:?}", self.id, delay);
            tokio::select! {
                biased;
                _ = shutdown.recv() => break Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        };

        self.facade.close();
        info!("{}: connector stopped", self.id);
        result
    }

    async fn establish(&self) -> Result<(NetconfCommunicator, JoinHandle<()>), SessionError> {
        debug!("{}: connecting to {}", self.id, self.id.address);

        let (stream, handshake) = with_deadline(
            async {
                let mut stream = TcpStream::connect(&self.id.address).await?;
                stream.set_nodelay(true)?;
                let handshake = client_handshake(&mut stream, &self.id).await?;
                Ok::<_, SessionError>((stream, handshake))
            },
            self.config.connection_timeout(),
        )
        .await?;

        let preferences = handshake.preferences.clone();
        info!(
            "{}: connected, session-id {}, framing {:?}",
            self.id,
            handshake.session_id,
            handshake.framing()
        );

        let (comm, task) = NetconfCommunicator::start(
            self.id.clone(),
            stream,
            handshake,
            self.facade.clone(),
            self.config.rpc_limit(),
        );

        self.facade.set_listener(Arc::new(comm.clone()));
        self.facade.on_device_connected(
            DeviceSchema::from_preferences(&preferences),
            preferences,
            RemoteDeviceServices::new(DeviceRpc::Schemaless(Arc::new(comm.clone()))),
        );

        Ok((comm, task))
    }

    async fn serve(
        &self,
        comm: NetconfCommunicator,
        mut task: JoinHandle<()>,
        shutdown: &mut mpsc::Receiver<()>,
    ) -> SessionEnd {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                info!("{}: shutting down session", self.id);
                comm.disconnect();
                if let Err(e) = task.await {
                    warn!("{}: session task failed: {}", self.id, e);
                }
                SessionEnd::Shutdown
            }
            joined = &mut task => {
                if let Err(e) = joined {
                    warn!("{}: session task failed: {}", self.id, e);
                }
                info!("{}: session ended", self.id);
                SessionEnd::Dropped
            }
        }
    }
}
