//! Request deadlines and the keepalive-aware request guard.

use std::future::Future;
use std::time::Duration;

use crate::error::SessionError;
use crate::keepalive::KeepaliveHandle;
use crate::reconnect::SessionReconnect;

/// Bound `request` by `timeout`.
///
/// On expiry the request future is dropped, which abandons it all the way down
/// to the transport, and the result is [`SessionError::Timeout`].
pub async fn with_deadline<T, F>(request: F, timeout: Duration) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    match tokio::time::timeout(timeout, request).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::Timeout(timeout)),
    }
}

/// Wraps every foreground request of one session.
///
/// Keepalive is disabled for the duration of the request. Success (or a local
/// refusal) re-enables it; a session-fatal failure requests a reconnect instead.
#[derive(Clone)]
pub struct RequestGuard {
    keepalive: Option<KeepaliveHandle>,
    reconnect: SessionReconnect,
    timeout: Duration,
}

impl RequestGuard {
    /// Guard requests of the session behind `reconnect`
    pub fn new(
        keepalive: Option<KeepaliveHandle>,
        reconnect: SessionReconnect,
        timeout: Duration,
    ) -> Self {
        Self {
            keepalive,
            reconnect,
            timeout,
        }
    }

    /// Deadline applied to each request
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `request` under the deadline and keepalive suppression
    pub async fn guard<T, F>(&self, request: F) -> Result<T, SessionError>
    where
        F: Future<Output = Result<T, SessionError>>,
    {
        let mut suppression = Suppression::begin(self.keepalive.clone());
        let result = with_deadline(request, self.timeout).await;

        if let Err(err) = &result {
            if err.is_session_fatal() && self.reconnect.request(err) {
                suppression.abandon();
            }
        }
        result
    }
}

// Re-enables keepalive on drop, including when the caller drops the request.
struct Suppression {
    keepalive: Option<KeepaliveHandle>,
}

impl Suppression {
    fn begin(keepalive: Option<KeepaliveHandle>) -> Self {
        if let Some(handle) = &keepalive {
            handle.disable_keepalive();
        }
        Self { keepalive }
    }

    fn abandon(&mut self) {
        self.keepalive = None;
    }
}

impl Drop for Suppression {
    fn drop(&mut self) {
        if let Some(handle) = self.keepalive.take() {
            handle.enable_keepalive();
        }
    }
}
