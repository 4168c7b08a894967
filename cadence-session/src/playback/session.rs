//! Playback session
//!
//! Single writer for all playback state. One worker task owns the queue and
//! the transport. Commands arrive over a bounded channel and run to
//! completion (transport call included) before the next one is taken.
//! Transport events are folded on the same task, between commands.
//!
//! After every command and every transport event the worker rebuilds the
//! `PlaybackSnapshot` and publishes it through a `watch` channel, so readers
//! always see a whole snapshot and a late reader gets the latest one.
//!
//! A separate position reporter refreshes `position_ms` on a fixed interval.
//! It only ever touches position and duration, and only when the transport
//! clock is reading the item under the cursor.

use cadence_common::config::{ErrorPolicy, SessionSettings};
use cadence_common::events::{EventBus, QueueChangeTrigger, SessionEvent};
use cadence_common::{PlaybackSnapshot, TrackId, TransportStatus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::catalog::{Catalog, MemoryCatalog};
use super::command::{Command, CommandEnvelope};
use super::queue::{Direction, QueueModel};
use super::transport::{
    PositionProbe, PositionSample, Transport, TransportError, TransportErrorKind, TransportEvent,
};
use crate::error::{Error, Result};

/// Marker for "transport is not reading the cursor item"
const UNBOUND: usize = usize::MAX;

/// Configures and starts a playback session
pub struct SessionBuilder {
    transport: Box<dyn Transport>,
    catalog: Arc<dyn Catalog>,
    settings: SessionSettings,
    events: Option<EventBus>,
    shuffle_seed: Option<u64>,
}

impl SessionBuilder {
    pub fn new(transport: impl Transport) -> Self {
        Self {
            transport: Box::new(transport),
            catalog: Arc::new(MemoryCatalog::new()),
            settings: SessionSettings::default(),
            events: None,
            shuffle_seed: None,
        }
    }

    pub fn catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Share an existing event bus instead of creating one
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Deterministic shuffle order (tests)
    pub fn shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    /// Spawn the worker and the position reporter
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(self) -> PlaybackSession {
        let SessionBuilder {
            mut transport,
            catalog,
            settings,
            events,
            shuffle_seed,
        } = self;

        let id = Uuid::new_v4();
        let events = events.unwrap_or_else(|| EventBus::new(settings.event_capacity.max(1)));
        let (command_tx, command_rx) = mpsc::channel(settings.command_queue_capacity.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(PlaybackSnapshot::initial()));
        let snapshot_tx = Arc::new(snapshot_tx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let bound_index = Arc::new(AtomicUsize::new(UNBOUND));

        let probe = transport.position_probe();
        let transport_events = transport.take_events();

        let queue = match shuffle_seed {
            Some(seed) => QueueModel::with_seed(seed),
            None => QueueModel::new(),
        };

        let reporter = tokio::spawn(run_position_reporter(
            probe.clone(),
            Arc::clone(&snapshot_tx),
            Arc::clone(&bound_index),
            settings.position_interval(),
            shutdown_rx.clone(),
        ));

        let worker = SessionWorker {
            id,
            queue,
            transport,
            catalog,
            settings,
            events: events.clone(),
            snapshots: snapshot_tx,
            bound_index,
            probe,
            loaded: Vec::new(),
            loaded_index: None,
            pending_transitions: 0,
            play_when_ready: false,
            buffering: false,
            engine_playing: false,
            awaiting_engine: false,
            ended: false,
            error: None,
            position_ms: 0,
            duration_ms: None,
            consecutive_failures: 0,
            last_status: TransportStatus::Idle,
        };
        let worker = tokio::spawn(worker.run(command_rx, transport_events, shutdown_rx));

        info!("Playback session {} spawned", id);

        PlaybackSession {
            id,
            link: SessionLink {
                session_id: id,
                commands: command_tx,
                snapshots: snapshot_rx,
                events,
            },
            shutdown_tx,
            tasks: Mutex::new(Some((worker, reporter))),
        }
    }
}

/// Running session: owns the worker tasks
pub struct PlaybackSession {
    id: Uuid,
    link: SessionLink,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

impl PlaybackSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Command sender and snapshot receiver for controllers
    pub fn link(&self) -> SessionLink {
        self.link.clone()
    }

    pub fn snapshot(&self) -> Arc<PlaybackSnapshot> {
        self.link.snapshot()
    }

    pub fn events(&self) -> &EventBus {
        &self.link.events
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Stop the reporter and the worker, releasing the transport
    ///
    /// The command in progress (if any) completes first. Commands still
    /// queued are dropped and their issuers see `NotConnected`. Safe to call
    /// more than once.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let Some((worker, reporter)) = self.tasks.lock().await.take() else {
            return;
        };
        if let Err(e) = reporter.await {
            warn!("Position reporter ended abnormally: {}", e);
        }
        if let Err(e) = worker.await {
            warn!("Session worker ended abnormally: {}", e);
        }
        info!("Playback session {} shut down", self.id);
    }
}

/// Cloneable connection to a running session
#[derive(Clone)]
pub struct SessionLink {
    session_id: Uuid,
    commands: mpsc::Sender<CommandEnvelope>,
    snapshots: watch::Receiver<Arc<PlaybackSnapshot>>,
    events: EventBus,
}

impl SessionLink {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Run a command and wait for its outcome
    pub async fn execute(&self, command: Command) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(CommandEnvelope {
                command,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)?
    }

    /// Queue a command without waiting for its outcome
    ///
    /// Returns once the command is accepted by the session.
    pub async fn submit(&self, command: Command) -> Result<()> {
        self.commands
            .send(CommandEnvelope {
                command,
                reply: None,
            })
            .await
            .map_err(|_| Error::NotConnected)
    }

    pub fn snapshot(&self) -> Arc<PlaybackSnapshot> {
        self.snapshots.borrow().clone()
    }

    /// New snapshot receiver; the current value counts as seen
    pub fn watch(&self) -> watch::Receiver<Arc<PlaybackSnapshot>> {
        self.snapshots.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// True once the worker has stopped
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

struct SessionWorker {
    id: Uuid,
    queue: QueueModel,
    transport: Box<dyn Transport>,
    catalog: Arc<dyn Catalog>,
    settings: SessionSettings,
    events: EventBus,
    snapshots: Arc<watch::Sender<Arc<PlaybackSnapshot>>>,
    /// Transport index of the cursor item, `UNBOUND` when not loaded
    bound_index: Arc<AtomicUsize>,
    probe: PositionProbe,

    /// Ids of the list last handed to `Transport::load`
    loaded: Vec<TrackId>,
    /// Index in `loaded` the transport was last told to play
    loaded_index: Option<usize>,
    /// `ItemTransitioned` events still owed by the transport
    pending_transitions: usize,

    play_when_ready: bool,
    buffering: bool,
    /// Last `PlayingChanged` from the engine for the current item
    engine_playing: bool,
    /// A toggle was applied optimistically and the engine has not answered
    awaiting_engine: bool,
    ended: bool,
    error: Option<String>,
    position_ms: u64,
    duration_ms: Option<u64>,
    consecutive_failures: usize,
    last_status: TransportStatus,
}

impl SessionWorker {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<CommandEnvelope>,
        transport_events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Session worker {} running", self.id);

        let mut events_open = transport_events.is_some();
        let mut transport_events = transport_events.unwrap_or_else(|| {
            warn!("Transport event receiver already taken; folding no transport events");
            mpsc::unbounded_channel().1
        });

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    debug!("Session worker {} received shutdown", self.id);
                    break;
                }

                envelope = commands.recv() => match envelope {
                    Some(envelope) => self.handle_envelope(envelope).await,
                    None => {
                        debug!("All session links dropped");
                        break;
                    }
                },

                event = transport_events.recv(), if events_open => match event {
                    Some(event) => {
                        self.on_transport_event(event).await;
                        self.publish();
                    }
                    None => {
                        warn!("Transport event channel closed");
                        events_open = false;
                    }
                },
            }
        }

        self.transport.release().await;
        self.bound_index.store(UNBOUND, Ordering::SeqCst);
        info!("Session worker {} stopped, transport released", self.id);
    }

    async fn handle_envelope(&mut self, envelope: CommandEnvelope) {
        let CommandEnvelope { command, reply } = envelope;
        let name = command.name();
        debug!("Command: {}", name);

        let result = self.apply(command).await;
        if let Err(e) = &result {
            warn!("Command {} failed: {}", name, e);
        }

        // Publish before replying so the issuer observes its own effect
        self.publish();

        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    async fn apply(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Play {
                tracks,
                start_index,
            } => {
                self.queue.set_all(tracks, start_index);
                self.emit_queue_changed(QueueChangeTrigger::Replaced);
                if self.queue.is_empty() {
                    self.stop_transport().await;
                    self.reset_playback();
                    return Ok(());
                }
                self.clear_terminal();
                self.consecutive_failures = 0;
                self.play_when_ready = true;
                self.start_with_policy().await
            }

            Command::EnqueueNext { track } => {
                let was_empty = self.queue.is_empty();
                self.queue.insert_next(track);
                self.after_enqueue(was_empty).await
            }

            Command::EnqueueLast { track } => {
                let was_empty = self.queue.is_empty();
                self.queue.append(track);
                self.after_enqueue(was_empty).await
            }

            Command::RemoveAt { index } => self.remove_at(index).await,

            Command::MoveTrack { from, to } => {
                self.queue.move_track(from, to)?;
                self.emit_queue_changed(QueueChangeTrigger::UserReorder);
                Ok(())
            }

            Command::Clear => {
                self.queue.clear();
                self.stop_transport().await;
                self.reset_playback();
                self.emit_queue_changed(QueueChangeTrigger::Cleared);
                Ok(())
            }

            Command::TogglePlayPause => {
                match self.status() {
                    TransportStatus::Idle | TransportStatus::Ended | TransportStatus::Error => {
                        debug!("togglePlayPause ignored in {}", self.status());
                        return Ok(());
                    }
                    _ => {}
                }
                // Optimistic: the snapshot flips now, the engine confirms later
                self.play_when_ready = !self.play_when_ready;
                self.awaiting_engine = true;
                self.apply_play_intent().await
            }

            Command::SkipNext => {
                if self.queue.is_empty() {
                    return Err(Error::NoCurrentTrack);
                }
                match self.queue.skip(Direction::Forward) {
                    Some(_) => {
                        if self.ended {
                            self.play_when_ready = true;
                        }
                        self.consecutive_failures = 0;
                        self.start_with_policy().await
                    }
                    None => {
                        self.finish_queue().await;
                        Ok(())
                    }
                }
            }

            Command::SkipPrevious => {
                if self.queue.is_empty() {
                    return Err(Error::NoCurrentTrack);
                }
                if self.ended {
                    return Ok(());
                }
                self.sync_position();
                if self.error.is_none()
                    && self.position_ms > self.settings.previous_restart_threshold_ms
                {
                    return self.seek_current(0).await;
                }
                self.queue.skip(Direction::Backward);
                self.consecutive_failures = 0;
                self.start_with_policy().await
            }

            Command::SeekTo { position_ms } => {
                if self.queue.is_empty() {
                    return Err(Error::NoCurrentTrack);
                }
                if self.ended || self.error.is_some() {
                    debug!("seekTo ignored in {}", self.status());
                    return Ok(());
                }
                self.seek_current(position_ms).await
            }

            Command::ToggleShuffle => {
                self.queue.set_shuffle(!self.queue.shuffle_enabled());
                self.emit_policy_changed();
                Ok(())
            }

            Command::CycleRepeat => {
                let mode = self.queue.cycle_repeat();
                debug!("Repeat mode now {}", mode);
                self.emit_policy_changed();
                Ok(())
            }

            Command::ToggleFavoriteOfCurrent => self.toggle_favorite().await,
        }
    }

    // ------------------------------------------------------------------
    // Command helpers
    // ------------------------------------------------------------------

    async fn after_enqueue(&mut self, was_empty: bool) -> Result<()> {
        self.emit_queue_changed(QueueChangeTrigger::UserEnqueue);
        if !was_empty {
            return Ok(());
        }
        // First item of an empty queue is loaded but not started
        self.clear_terminal();
        self.consecutive_failures = 0;
        self.play_when_ready = false;
        self.start_with_policy().await
    }

    async fn remove_at(&mut self, index: usize) -> Result<()> {
        let removal = self.queue.remove_at(index)?;
        debug!("Removed {} from queue", removal.removed.id);
        self.emit_queue_changed(QueueChangeTrigger::UserDequeue);

        if self.queue.is_empty() {
            self.stop_transport().await;
            self.reset_playback();
            return Ok(());
        }
        if !removal.was_current {
            return Ok(());
        }

        if removal.exhausted {
            self.duration_ms = self.queue.current().and_then(|t| t.duration_ms);
            self.position_ms = 0;
            self.finish_queue().await;
            self.stop_transport().await;
            Ok(())
        } else if self.ended {
            self.duration_ms = self.queue.current().and_then(|t| t.duration_ms);
            self.pin_to_end();
            Ok(())
        } else {
            self.consecutive_failures = 0;
            self.start_with_policy().await
        }
    }

    async fn seek_current(&mut self, position_ms: u64) -> Result<()> {
        let target = match self.duration_ms {
            Some(duration) => position_ms.min(duration),
            None => position_ms,
        };
        if let Err(e) = self.transport.seek(target).await {
            return Err(self.transport_failed(e));
        }
        self.position_ms = target;
        Ok(())
    }

    async fn toggle_favorite(&mut self) -> Result<()> {
        let current = self.queue.current().cloned().ok_or(Error::NoCurrentTrack)?;
        let target = !current.favorite;
        let timeout = self.settings.catalog_timeout();

        match tokio::time::timeout(timeout, self.catalog.set_favorite(&current.id, target)).await {
            Ok(Ok(())) => {
                self.queue.replace_track(&current.with_favorite(target));
                self.events.emit_lossy(SessionEvent::FavoriteChanged {
                    session_id: self.id,
                    track_id: current.id.clone(),
                    favorite: target,
                    timestamp: chrono::Utc::now(),
                });
                info!("Favorite for {} set to {}", current.id, target);
                Ok(())
            }
            Ok(Err(e)) => Err(Error::FavoriteUpdateFailed(e.to_string())),
            Err(_) => Err(Error::FavoriteUpdateFailed(format!(
                "catalog did not answer within {} ms",
                timeout.as_millis()
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Transport control
    // ------------------------------------------------------------------

    /// Start the cursor item, skipping failures when the error policy says so
    async fn start_with_policy(&mut self) -> Result<()> {
        loop {
            let err = match self.start_current().await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            self.consecutive_failures += 1;

            if self.settings.on_transport_error != ErrorPolicy::Skip
                || self.consecutive_failures >= self.queue.len()
            {
                return Err(err);
            }
            if self.queue.skip(Direction::Forward).is_none() {
                self.finish_queue().await;
                return Err(err);
            }
            debug!("Skipping failed item, now at {:?}", self.queue.cursor());
        }
    }

    /// Point the transport at the cursor item and apply the play intent
    async fn start_current(&mut self) -> Result<()> {
        let Some(cursor) = self.queue.cursor() else {
            return Ok(());
        };

        self.clear_terminal();
        self.position_ms = 0;
        self.duration_ms = self.queue.current().and_then(|t| t.duration_ms);
        self.buffering = true;
        self.engine_playing = false;
        self.awaiting_engine = false;

        let in_sync = self.loaded_matches_queue();
        let result = if in_sync {
            self.transport.skip_to_index(cursor).await
        } else {
            self.transport.load(self.queue.tracks(), cursor, 0).await
        };

        if let Err(e) = result {
            self.loaded.clear();
            self.loaded_index = None;
            return Err(self.transport_failed(e));
        }
        if !in_sync {
            self.loaded = self.queue.tracks().iter().map(|t| t.id.clone()).collect();
        }
        self.loaded_index = Some(cursor);
        self.pending_transitions += 1;

        self.apply_play_intent().await?;
        self.on_item_started().await;
        Ok(())
    }

    async fn apply_play_intent(&mut self) -> Result<()> {
        let result = if self.play_when_ready {
            self.transport.play().await
        } else {
            self.transport.pause().await
        };
        result.map_err(|e| self.transport_failed(e))
    }

    async fn stop_transport(&mut self) {
        if let Err(e) = self.transport.stop().await {
            warn!("Transport stop failed: {}", e);
        }
        self.loaded.clear();
        self.loaded_index = None;
    }

    /// Playback ran past the last item with nowhere to go
    async fn finish_queue(&mut self) {
        info!(
            "Queue finished on {}",
            self.queue.current().map(|t| t.id.as_str()).unwrap_or("-")
        );
        self.ended = true;
        self.error = None;
        self.play_when_ready = false;
        self.buffering = false;
        self.awaiting_engine = false;
        self.pin_to_end();
        if let Err(e) = self.transport.pause().await {
            warn!("Transport pause at end of queue failed: {}", e);
        }
    }

    fn pin_to_end(&mut self) {
        if self.duration_ms.is_none() {
            self.duration_ms = self.queue.current().and_then(|t| t.duration_ms);
        }
        if let Some(duration) = self.duration_ms {
            self.position_ms = duration;
        }
    }

    fn loaded_matches_queue(&self) -> bool {
        !self.loaded.is_empty()
            && self.loaded.len() == self.queue.len()
            && self
                .loaded
                .iter()
                .zip(self.queue.tracks())
                .all(|(id, track)| *id == track.id)
    }

    /// Record a synchronous transport failure and convert it for the issuer
    fn transport_failed(&mut self, err: TransportError) -> Error {
        self.enter_error(err.kind, err.message.clone());
        err.into()
    }

    fn enter_error(&mut self, kind: TransportErrorKind, message: String) {
        let track_id = self.queue.current().map(|t| t.id.clone());
        error!(
            "Transport fault ({}) on {}: {}",
            kind,
            track_id.as_ref().map(|id| id.as_str()).unwrap_or("-"),
            message
        );
        self.buffering = false;
        self.awaiting_engine = false;
        self.error = Some(message.clone());
        self.events.emit_lossy(SessionEvent::TransportFault {
            session_id: self.id,
            track_id,
            kind: kind.to_string(),
            message,
            timestamp: chrono::Utc::now(),
        });
    }

    fn clear_terminal(&mut self) {
        self.ended = false;
        self.error = None;
    }

    fn reset_playback(&mut self) {
        self.clear_terminal();
        self.play_when_ready = false;
        self.buffering = false;
        self.engine_playing = false;
        self.awaiting_engine = false;
        self.position_ms = 0;
        self.duration_ms = None;
        self.consecutive_failures = 0;
    }

    async fn on_item_started(&mut self) {
        let Some(track) = self.queue.current().cloned() else {
            return;
        };
        info!("Starting {} ({})", track.id, track.name);
        self.events.emit_lossy(SessionEvent::TrackStarted {
            session_id: self.id,
            track_id: track.id.clone(),
            queue_index: self.queue.cursor().unwrap_or(0),
            timestamp: chrono::Utc::now(),
        });

        let timeout = self.settings.catalog_timeout();

        // Refresh metadata (favorite flag in particular) from the catalog
        match tokio::time::timeout(timeout, self.catalog.get_track_by_id(&track.id)).await {
            Ok(Ok(Some(fresh))) if fresh != track => {
                debug!("Refreshed {} from catalog", track.id);
                self.queue.replace_track(&fresh);
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Catalog lookup for {} failed: {}", track.id, e),
            Err(_) => warn!("Catalog lookup for {} timed out", track.id),
        }

        let catalog = Arc::clone(&self.catalog);
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, catalog.increment_play_count(&track.id)).await {
                Ok(Ok(())) => trace!("Play count incremented for {}", track.id),
                Ok(Err(e)) => warn!("Play count update for {} failed: {}", track.id, e),
                Err(_) => warn!("Play count update for {} timed out", track.id),
            }
        });
    }

    // ------------------------------------------------------------------
    // Transport events
    // ------------------------------------------------------------------

    async fn on_transport_event(&mut self, event: TransportEvent) {
        if let TransportEvent::ItemTransitioned(index) = event {
            if self.pending_transitions > 0 {
                self.pending_transitions -= 1;
                trace!("Transport on item {}", index);
            } else {
                debug!("Ignoring unsolicited transition to item {}", index);
            }
            return;
        }
        if self.pending_transitions > 0 {
            if !matches!(event, TransportEvent::TransportError { .. }) {
                trace!("Dropping stale transport event {:?}", event);
                return;
            }
            // The item being loaded failed before it started
            debug!(
                "Transport error with {} transition(s) owed",
                self.pending_transitions
            );
            self.pending_transitions = 0;
        }

        match event {
            TransportEvent::ItemTransitioned(_) => {}
            TransportEvent::PositionTick(position_ms) => {
                if self.binding().is_some() && !self.ended && self.error.is_none() {
                    self.position_ms = self.clamp_position(position_ms);
                }
            }
            TransportEvent::BufferingChanged(buffering) => {
                self.buffering = buffering;
                if !buffering && self.error.is_none() {
                    self.consecutive_failures = 0;
                }
            }
            TransportEvent::PlayingChanged(playing) => {
                trace!("Engine playing: {}", playing);
                self.engine_playing = playing;
                self.awaiting_engine = false;
                if self.ended || self.error.is_some() {
                    return;
                }
                // The engine is authoritative: a stop it initiated (focus
                // loss, device change) drops the play intent. A stall while
                // rebuffering does not.
                if playing {
                    self.play_when_ready = true;
                } else if !self.buffering {
                    self.play_when_ready = false;
                }
            }
            TransportEvent::DurationResolved(duration_ms) => {
                self.duration_ms = Some(duration_ms);
                self.position_ms = self.position_ms.min(duration_ms);
            }
            TransportEvent::TransportError { kind, message } => {
                self.enter_error(kind, message);
                self.consecutive_failures += 1;
                if self.settings.on_transport_error == ErrorPolicy::Skip {
                    self.skip_failed().await;
                }
            }
            TransportEvent::ItemCompleted(index) => {
                if Some(index) == self.loaded_index && !self.ended {
                    self.on_item_completed().await;
                } else {
                    debug!("Ignoring completion of item {}", index);
                }
            }
        }
    }

    async fn on_item_completed(&mut self) {
        debug!(
            "Item {} completed",
            self.queue.current().map(|t| t.id.as_str()).unwrap_or("-")
        );
        match self.queue.advance(Direction::Forward) {
            Some(_) => {
                if let Err(e) = self.start_with_policy().await {
                    warn!("Could not start next item: {}", e);
                }
            }
            None => self.finish_queue().await,
        }
    }

    /// Skip past an item that failed asynchronously
    async fn skip_failed(&mut self) {
        if self.consecutive_failures >= self.queue.len() {
            warn!(
                "{} consecutive failures, stalling in error",
                self.consecutive_failures
            );
            return;
        }
        match self.queue.skip(Direction::Forward) {
            Some(_) => {
                if let Err(e) = self.start_with_policy().await {
                    warn!("Could not start item after failure: {}", e);
                }
            }
            None => self.finish_queue().await,
        }
    }

    // ------------------------------------------------------------------
    // Snapshot publication
    // ------------------------------------------------------------------

    fn status(&self) -> TransportStatus {
        if self.queue.is_empty() {
            TransportStatus::Idle
        } else if self.error.is_some() {
            TransportStatus::Error
        } else if self.ended {
            TransportStatus::Ended
        } else if self.buffering {
            TransportStatus::Loading
        } else if self.awaiting_engine {
            if self.play_when_ready {
                TransportStatus::Playing
            } else {
                TransportStatus::Paused
            }
        } else if self.engine_playing {
            TransportStatus::Playing
        } else if self.play_when_ready {
            // Buffered, waiting for the engine to start
            TransportStatus::Loading
        } else {
            TransportStatus::Paused
        }
    }

    /// Transport index whose clock belongs to the cursor item
    fn binding(&self) -> Option<usize> {
        if self.pending_transitions > 0 {
            return None;
        }
        let index = self.loaded_index?;
        let current = self.queue.current()?;
        (self.loaded.get(index) == Some(&current.id)).then_some(index)
    }

    fn clamp_position(&self, position_ms: u64) -> u64 {
        match self.duration_ms {
            Some(duration) => position_ms.min(duration),
            None => position_ms,
        }
    }

    /// Pull the latest clock reading into the worker's own position
    fn sync_position(&mut self) {
        if self.ended || self.error.is_some() {
            return;
        }
        let Some(bound) = self.binding() else {
            return;
        };
        let sample = self.probe.read();
        if sample.item_index == Some(bound) {
            if sample.duration_ms.is_some() {
                self.duration_ms = sample.duration_ms;
            }
            self.position_ms = self.clamp_position(sample.position_ms);
        }
    }

    fn publish(&mut self) {
        self.sync_position();

        let status = self.status();
        let current = self.queue.current().cloned();
        let snapshot = PlaybackSnapshot {
            revision: 0,
            favorite: current.as_ref().map(|t| t.favorite).unwrap_or(false),
            current_track: current,
            status,
            position_ms: if status == TransportStatus::Idle {
                0
            } else {
                self.position_ms
            },
            duration_ms: if status == TransportStatus::Idle {
                None
            } else {
                self.duration_ms
            },
            queue: self.queue.tracks().to_vec(),
            cursor: self.queue.cursor(),
            shuffle_enabled: self.queue.shuffle_enabled(),
            repeat_mode: self.queue.repeat_mode(),
            last_error: if status == TransportStatus::Error {
                self.error.clone()
            } else {
                None
            },
        };

        let binding = self.binding().unwrap_or(UNBOUND);
        let bound_index = &self.bound_index;
        let published = self.snapshots.send_if_modified(|current| {
            // Updated under the channel lock so the reporter never pairs a
            // new binding with an old snapshot
            bound_index.store(binding, Ordering::SeqCst);

            let mut next = snapshot;
            next.revision = current.revision;
            if **current == next {
                return false;
            }
            next.revision += 1;
            *current = Arc::new(next);
            true
        });
        if published {
            trace!("Published snapshot ({})", status);
        }

        if status != self.last_status {
            info!("Status {} -> {}", self.last_status, status);
            self.events.emit_lossy(SessionEvent::StatusChanged {
                session_id: self.id,
                old_status: self.last_status,
                new_status: status,
                timestamp: chrono::Utc::now(),
            });
            self.last_status = status;
        }
    }

    fn emit_queue_changed(&self, trigger: QueueChangeTrigger) {
        self.events.emit_lossy(SessionEvent::QueueChanged {
            session_id: self.id,
            length: self.queue.len(),
            cursor: self.queue.cursor(),
            trigger,
            timestamp: chrono::Utc::now(),
        });
    }

    fn emit_policy_changed(&self) {
        self.events.emit_lossy(SessionEvent::PolicyChanged {
            session_id: self.id,
            shuffle_enabled: self.queue.shuffle_enabled(),
            repeat_mode: self.queue.repeat_mode(),
            timestamp: chrono::Utc::now(),
        });
    }
}

// ----------------------------------------------------------------------
// Position reporter
// ----------------------------------------------------------------------

async fn run_position_reporter(
    probe: PositionProbe,
    snapshots: Arc<watch::Sender<Arc<PlaybackSnapshot>>>,
    bound_index: Arc<AtomicUsize>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let sample = probe.read();
                snapshots.send_if_modified(|current| {
                    apply_position_sample(current, sample, bound_index.load(Ordering::SeqCst))
                });
            }
        }
    }
    debug!("Position reporter stopped");
}

/// Fold a clock sample into the published snapshot
///
/// Returns true when the snapshot was replaced. The sample is only used when
/// it was taken on the transport index bound to the cursor.
fn apply_position_sample(
    current: &mut Arc<PlaybackSnapshot>,
    sample: PositionSample,
    bound_index: usize,
) -> bool {
    if bound_index == UNBOUND || sample.item_index != Some(bound_index) {
        return false;
    }
    if !matches!(
        current.status,
        TransportStatus::Loading | TransportStatus::Playing | TransportStatus::Paused
    ) {
        return false;
    }

    let duration_ms = sample.duration_ms.or(current.duration_ms);
    let position_ms = match duration_ms {
        Some(duration) => sample.position_ms.min(duration),
        None => sample.position_ms,
    };
    if position_ms == current.position_ms && duration_ms == current.duration_ms {
        return false;
    }

    let mut next = (**current).clone();
    next.position_ms = position_ms;
    next.duration_ms = duration_ms;
    next.revision += 1;
    *current = Arc::new(next);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_common::TrackRef;

    fn playing_snapshot() -> Arc<PlaybackSnapshot> {
        let track = TrackRef::new("a", "A", "file:///a");
        Arc::new(PlaybackSnapshot {
            revision: 4,
            current_track: Some(track.clone()),
            status: TransportStatus::Playing,
            queue: vec![track],
            cursor: Some(0),
            duration_ms: Some(10_000),
            ..PlaybackSnapshot::default()
        })
    }

    fn sample(item_index: Option<usize>, position_ms: u64) -> PositionSample {
        PositionSample {
            item_index,
            position_ms,
            duration_ms: Some(10_000),
        }
    }

    #[test]
    fn test_position_sample_applies_to_bound_item() {
        let mut snapshot = playing_snapshot();
        assert!(apply_position_sample(&mut snapshot, sample(Some(0), 1200), 0));
        assert_eq!(snapshot.position_ms, 1200);
        assert_eq!(snapshot.revision, 5);

        // Same reading again is not a change
        assert!(!apply_position_sample(&mut snapshot, sample(Some(0), 1200), 0));
        assert_eq!(snapshot.revision, 5);
    }

    #[test]
    fn test_position_sample_from_other_item_is_ignored() {
        let mut snapshot = playing_snapshot();
        assert!(!apply_position_sample(&mut snapshot, sample(Some(1), 1200), 0));
        assert!(!apply_position_sample(&mut snapshot, sample(Some(0), 1200), UNBOUND));
        assert!(!apply_position_sample(&mut snapshot, sample(None, 1200), 0));
        assert_eq!(snapshot.position_ms, 0);
    }

    #[test]
    fn test_position_sample_clamped_and_skipped_when_ended() {
        let mut snapshot = playing_snapshot();
        assert!(apply_position_sample(&mut snapshot, sample(Some(0), 99_000), 0));
        assert_eq!(snapshot.position_ms, 10_000);

        let mut ended = playing_snapshot();
        Arc::make_mut(&mut ended).status = TransportStatus::Ended;
        assert!(!apply_position_sample(&mut ended, sample(Some(0), 500), 0));
    }
}
