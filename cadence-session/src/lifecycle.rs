//! Lifecycle supervisor
//!
//! Decides when the hosting process may tear the session down. The policy
//! itself (`teardown_authorized`) is a pure function of the latest snapshot
//! and the host signal; the supervisor applies it and performs the teardown.

use cadence_common::events::SessionEvent;
use cadence_common::{PlaybackSnapshot, TransportStatus};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::controller::EndpointPublisher;
use crate::playback::PlaybackSession;

/// Signals the host can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostSignal {
    /// Last foreground client went away
    HostDetached,
    /// User dismissed the task
    TaskRemoved,
    /// Process is exiting
    Shutdown,
}

impl std::fmt::Display for HostSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostSignal::HostDetached => write!(f, "host_detached"),
            HostSignal::TaskRemoved => write!(f, "task_removed"),
            HostSignal::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// May the session be torn down in response to `signal`?
///
/// Never while audio is playing or about to play (`Loading`), except on
/// process shutdown.
pub fn teardown_authorized(snapshot: &PlaybackSnapshot, signal: HostSignal) -> bool {
    match signal {
        HostSignal::Shutdown => true,
        HostSignal::HostDetached | HostSignal::TaskRemoved => !matches!(
            snapshot.status,
            TransportStatus::Playing | TransportStatus::Loading
        ),
    }
}

/// Applies the teardown policy to a running session
pub struct LifecycleSupervisor {
    session: Arc<PlaybackSession>,
    publisher: EndpointPublisher,
    /// Deferred teardown waiting for playback to stop
    watcher: std::sync::Mutex<Option<JoinHandle<()>>>,
    torn_down: Mutex<bool>,
    teardown_tx: watch::Sender<bool>,
}

impl LifecycleSupervisor {
    /// Advertise `session` on the endpoint and start supervising it
    pub fn start(session: Arc<PlaybackSession>, publisher: EndpointPublisher) -> Arc<Self> {
        publisher.publish(session.link());
        let (teardown_tx, _) = watch::channel(false);
        Arc::new(Self {
            session,
            publisher,
            watcher: std::sync::Mutex::new(None),
            torn_down: Mutex::new(false),
            teardown_tx,
        })
    }

    pub fn session(&self) -> &Arc<PlaybackSession> {
        &self.session
    }

    /// The host went to the background
    ///
    /// Returns true when the session was torn down. Otherwise playback is
    /// active and the supervisor tears down later, once it stops, unless
    /// `on_host_attached` comes first.
    pub async fn on_host_detached(self: &Arc<Self>) -> bool {
        self.on_signal(HostSignal::HostDetached).await
    }

    /// The user removed the task; same policy as detaching
    pub async fn on_task_removed(self: &Arc<Self>) -> bool {
        self.on_signal(HostSignal::TaskRemoved).await
    }

    /// The host is back; cancel any deferred teardown
    ///
    /// A teardown that already began runs to completion.
    pub fn on_host_attached(&self) {
        if let Some(watcher) = self.lock_watcher().take() {
            watcher.abort();
            debug!("Deferred teardown cancelled");
        }
    }

    /// Unconditional teardown. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.on_host_attached();
        self.teardown(HostSignal::Shutdown).await;
    }

    pub async fn is_torn_down(&self) -> bool {
        *self.torn_down.lock().await
    }

    /// Receiver that flips to true once the session is torn down
    pub fn teardown_signal(&self) -> watch::Receiver<bool> {
        self.teardown_tx.subscribe()
    }

    /// Resolve once the session has been torn down
    pub async fn wait_for_teardown(&self) {
        let mut rx = self.teardown_signal();
        let _ = rx.wait_for(|done| *done).await;
    }

    async fn on_signal(self: &Arc<Self>, signal: HostSignal) -> bool {
        let snapshot = self.session.snapshot();
        if teardown_authorized(&snapshot, signal) {
            self.teardown(signal).await;
            return true;
        }

        info!(
            "Teardown on {} deferred while {}",
            signal, snapshot.status
        );
        self.defer_teardown(signal);
        false
    }

    fn defer_teardown(self: &Arc<Self>, signal: HostSignal) {
        let mut watcher = self.lock_watcher();
        if watcher.as_ref().is_some_and(|w| !w.is_finished()) {
            return;
        }

        let supervisor: Weak<Self> = Arc::downgrade(self);
        let mut snapshots = self.session.link().watch();
        *watcher = Some(tokio::spawn(async move {
            let stopped = snapshots
                .wait_for(|snapshot| teardown_authorized(snapshot, signal))
                .await
                .is_ok();
            if !stopped {
                return;
            }
            let Some(supervisor) = supervisor.upgrade() else {
                return;
            };
            // Own task: aborting the watcher must not cut a teardown short
            tokio::spawn(async move {
                supervisor.teardown(signal).await;
            });
        }));
    }

    async fn teardown(&self, signal: HostSignal) {
        let mut torn_down = self.torn_down.lock().await;
        if *torn_down {
            return;
        }

        info!("Tearing down playback session on {}", signal);
        self.session
            .events()
            .emit_lossy(SessionEvent::TeardownAuthorized {
                session_id: self.session.id(),
                reason: signal.to_string(),
                timestamp: chrono::Utc::now(),
            });
        self.publisher.clear();
        self.session.shutdown().await;

        *torn_down = true;
        self.teardown_tx.send_replace(true);
    }

    fn lock_watcher(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.watcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for LifecycleSupervisor {
    fn drop(&mut self) {
        if let Some(watcher) = self.lock_watcher().take() {
            watcher.abort();
        }
    }
}
