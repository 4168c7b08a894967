//! Session controller
//!
//! Client-side handle on a playback session. A controller finds the session
//! through a `SessionEndpoint` (the session advertises itself there once it
//! is ready), then forwards commands and exposes the snapshot stream.
//!
//! Commands issued while disconnected are rejected with `NotConnected`.
//! Nothing is buffered on the controller side.

use cadence_common::PlaybackSnapshot;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::playback::{Command, SessionLink};

/// Create a connected publisher/endpoint pair
pub fn endpoint() -> (EndpointPublisher, SessionEndpoint) {
    let (tx, rx) = watch::channel(None);
    (EndpointPublisher { tx }, SessionEndpoint { rx })
}

/// Session side of the rendezvous
pub struct EndpointPublisher {
    tx: watch::Sender<Option<SessionLink>>,
}

impl EndpointPublisher {
    /// Advertise a ready session
    pub fn publish(&self, link: SessionLink) {
        info!("Session {} available", link.session_id());
        self.tx.send_replace(Some(link));
    }

    /// Withdraw the session; later connects wait for a new one
    pub fn clear(&self) {
        if self.tx.send_replace(None).is_some() {
            debug!("Session endpoint cleared");
        }
    }

    pub fn endpoint(&self) -> SessionEndpoint {
        SessionEndpoint {
            rx: self.tx.subscribe(),
        }
    }
}

/// Controller side of the rendezvous
#[derive(Clone)]
pub struct SessionEndpoint {
    rx: watch::Receiver<Option<SessionLink>>,
}

impl SessionEndpoint {
    /// Link to the advertised session, if one is live right now
    pub fn current(&self) -> Option<SessionLink> {
        self.rx
            .borrow()
            .as_ref()
            .filter(|link| !link.is_closed())
            .cloned()
    }

    /// Wait up to `timeout` for a live session
    pub async fn wait(&self, timeout: Duration) -> Result<SessionLink> {
        let mut rx = self.rx.clone();
        let ready = rx.wait_for(|link| link.as_ref().is_some_and(|l| !l.is_closed()));
        let outcome = match tokio::time::timeout(timeout, ready).await {
            Ok(Ok(link)) => link.clone().ok_or(Error::NotConnected),
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => {
                debug!("No session within {} ms", timeout.as_millis());
                Err(Error::NotConnected)
            }
        };
        outcome
    }
}

/// Client handle: command sender plus snapshot subscription
pub struct SessionController {
    endpoint: SessionEndpoint,
    link: Option<SessionLink>,
}

impl SessionController {
    /// New controller, not yet connected
    pub fn new(endpoint: SessionEndpoint) -> Self {
        Self {
            endpoint,
            link: None,
        }
    }

    /// Wait for the session and attach to it
    pub async fn connect(&mut self, timeout: Duration) -> Result<()> {
        let link = self.endpoint.wait(timeout).await?;
        debug!("Controller connected to session {}", link.session_id());
        self.link = Some(link);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.link.as_ref().is_some_and(|link| !link.is_closed())
    }

    fn link(&self) -> Result<&SessionLink> {
        self.link.as_ref().ok_or(Error::NotConnected)
    }

    /// Fire-and-forget; the session logs the outcome
    pub async fn submit(&self, command: Command) -> Result<()> {
        self.link()?.submit(command).await
    }

    /// Send a command and wait for its outcome
    pub async fn execute(&self, command: Command) -> Result<()> {
        self.link()?.execute(command).await
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Result<Arc<PlaybackSnapshot>> {
        Ok(self.link()?.snapshot())
    }

    /// Snapshot stream starting with the current snapshot
    pub fn subscribe(&self) -> Result<SnapshotSubscription> {
        Ok(SnapshotSubscription::new(self.link()?.watch()))
    }

    /// Detach from the session. Safe to call repeatedly.
    pub fn release(&mut self) {
        if self.link.take().is_some() {
            debug!("Controller released");
        }
    }
}

/// Replay-1 view of the snapshot stream
///
/// The first `next()` yields the snapshot current at subscription time,
/// later calls wait for replacements. Intermediate snapshots may be skipped
/// when the reader is slower than the session.
pub struct SnapshotSubscription {
    rx: watch::Receiver<Arc<PlaybackSnapshot>>,
    primed: bool,
}

impl SnapshotSubscription {
    fn new(rx: watch::Receiver<Arc<PlaybackSnapshot>>) -> Self {
        Self { rx, primed: false }
    }

    pub fn current(&self) -> Arc<PlaybackSnapshot> {
        self.rx.borrow().clone()
    }

    /// Next snapshot, or None once the session is gone
    pub async fn next(&mut self) -> Option<Arc<PlaybackSnapshot>> {
        if !self.primed {
            self.primed = true;
            return Some(self.rx.borrow_and_update().clone());
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// First snapshot (current one included) matching `predicate`
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<Arc<PlaybackSnapshot>>
    where
        F: FnMut(&PlaybackSnapshot) -> bool,
    {
        self.primed = true;
        let matched = self.rx.wait_for(|snapshot| predicate(snapshot)).await.ok()?;
        Some(matched.clone())
    }

    /// Convert into a `Stream`, current snapshot first
    pub fn into_stream(self) -> WatchStream<Arc<PlaybackSnapshot>> {
        WatchStream::new(self.rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disconnected_controller_rejects_commands() {
        let (_publisher, endpoint) = endpoint();
        let mut controller = SessionController::new(endpoint);

        assert!(!controller.is_connected());
        assert_eq!(
            controller.execute(Command::SkipNext).await,
            Err(Error::NotConnected)
        );
        assert_eq!(
            controller.submit(Command::TogglePlayPause).await,
            Err(Error::NotConnected)
        );
        assert!(controller.snapshot().is_err());
        assert!(controller.subscribe().is_err());

        controller.release();
        controller.release();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out_without_session() {
        let (_publisher, endpoint) = endpoint();
        let mut controller = SessionController::new(endpoint);
        assert_eq!(
            controller.connect(Duration::from_millis(200)).await,
            Err(Error::NotConnected)
        );
    }
}
