//! Scripted transport
//!
//! Accepts every call and emits nothing on its own. The test plays the
//! engine by pushing `TransportEvent`s through `EngineScript`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cadence_common::{PlaybackSnapshot, TrackRef};
use cadence_session::playback::{
    PositionProbe, Transport, TransportCall, TransportError, TransportErrorKind, TransportEvent,
};
use cadence_session::{
    endpoint, LifecycleSupervisor, PlaybackSession, SessionBuilder, SessionController,
    SnapshotSubscription,
};
use tokio::sync::mpsc;

pub struct ScriptedTransport {
    calls: Arc<Mutex<Vec<TransportCall>>>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    probe: PositionProbe,
}

/// Test side of a `ScriptedTransport`
#[derive(Clone)]
pub struct EngineScript {
    calls: Arc<Mutex<Vec<TransportCall>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl ScriptedTransport {
    pub fn new() -> (Self, EngineScript) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let transport = Self {
            calls: Arc::clone(&calls),
            events_rx: Some(events_rx),
            probe: PositionProbe::new(),
        };
        (
            transport,
            EngineScript {
                calls,
                events: events_tx,
            },
        )
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl EngineScript {
    pub fn emit(&self, event: TransportEvent) {
        self.events.send(event).expect("session dropped the event channel");
    }

    /// Item `index` transitioned, finished buffering and started playing
    pub fn start_playing(&self, index: usize) {
        self.emit(TransportEvent::ItemTransitioned(index));
        self.emit(TransportEvent::BufferingChanged(false));
        self.emit(TransportEvent::PlayingChanged(true));
    }

    pub fn fail(&self, message: &str) {
        self.emit(TransportEvent::TransportError {
            kind: TransportErrorKind::ItemUnavailable,
            message: message.to_string(),
        });
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn load(
        &mut self,
        items: &[TrackRef],
        start_index: usize,
        start_position_ms: u64,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::Load {
            ids: items.iter().map(|t| t.id.to_string()).collect(),
            start_index,
            start_position_ms,
        });
        Ok(())
    }

    async fn play(&mut self) -> Result<(), TransportError> {
        self.record(TransportCall::Play);
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), TransportError> {
        self.record(TransportCall::Pause);
        Ok(())
    }

    async fn seek(&mut self, position_ms: u64) -> Result<(), TransportError> {
        self.record(TransportCall::Seek(position_ms));
        Ok(())
    }

    async fn skip_to_index(&mut self, index: usize) -> Result<(), TransportError> {
        self.record(TransportCall::SkipToIndex(index));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TransportError> {
        self.record(TransportCall::Stop);
        Ok(())
    }

    async fn release(&mut self) {
        self.record(TransportCall::Release);
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.take()
    }

    fn position_probe(&self) -> PositionProbe {
        self.probe.clone()
    }
}

/// Session on a `ScriptedTransport` with a connected controller
pub struct ScriptedSession {
    pub session: Arc<PlaybackSession>,
    pub engine: EngineScript,
    pub supervisor: Arc<LifecycleSupervisor>,
    pub controller: SessionController,
}

impl ScriptedSession {
    pub async fn start() -> Self {
        let (transport, engine) = ScriptedTransport::new();
        let session = Arc::new(SessionBuilder::new(transport).shuffle_seed(42).spawn());

        let (publisher, session_endpoint) = endpoint();
        let supervisor = LifecycleSupervisor::start(Arc::clone(&session), publisher);

        let mut controller = SessionController::new(session_endpoint);
        controller
            .connect(Duration::from_secs(1))
            .await
            .expect("controller should connect");

        Self {
            session,
            engine,
            supervisor,
            controller,
        }
    }

    pub fn subscribe(&self) -> SnapshotSubscription {
        self.controller.subscribe().expect("connected")
    }

    pub fn snapshot(&self) -> Arc<PlaybackSnapshot> {
        self.controller.snapshot().expect("connected")
    }

    /// Let the session worker drain the events pushed so far
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
