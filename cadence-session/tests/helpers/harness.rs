//! Session harness for integration tests
//!
//! Spawns a playback session on a `SimulatedTransport`, publishes it on an
//! endpoint and connects a controller, the same wiring the binary uses.

use std::sync::Arc;
use std::time::Duration;

use cadence_common::config::{ErrorPolicy, SessionSettings};
use cadence_common::{PlaybackSnapshot, TrackRef};
use cadence_session::playback::{
    MemoryCatalog, SimulatedTransport, SimulatorConfig, SimulatorControl,
};
use cadence_session::{
    endpoint, LifecycleSupervisor, PlaybackSession, SessionBuilder, SessionController,
    SessionEndpoint, SnapshotSubscription,
};

/// Default duration of fixture tracks
pub const TRACK_MS: u64 = 10_000;

/// Simulator with a short load latency and a fine clock
pub fn fast_simulator() -> SimulatorConfig {
    SimulatorConfig {
        load_latency: Duration::from_millis(50),
        tick: Duration::from_millis(50),
        default_duration_ms: TRACK_MS,
    }
}

pub fn track(id: &str) -> TrackRef {
    TrackRef::new(id, id.to_uppercase(), format!("file:///music/{}.flac", id))
        .with_artist("Fixture")
        .with_duration_ms(TRACK_MS)
}

/// Fixture tracks; ids starting with `fail:` get a failing locator
pub fn tracks(ids: &[&str]) -> Vec<TrackRef> {
    ids.iter()
        .map(|id| match id.strip_prefix("fail:") {
            Some(name) => TrackRef::new(*id, name, format!("fail://{}", name)),
            None => track(id),
        })
        .collect()
}

pub fn ids(snapshot: &PlaybackSnapshot) -> Vec<String> {
    snapshot.queue.iter().map(|t| t.id.to_string()).collect()
}

/// Wait (bounded) for a snapshot matching `predicate`
pub async fn wait_for<F>(subscription: &mut SnapshotSubscription, predicate: F) -> Arc<PlaybackSnapshot>
where
    F: FnMut(&PlaybackSnapshot) -> bool,
{
    let last = subscription.current();
    tokio::time::timeout(Duration::from_secs(30), subscription.wait_for(predicate))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for snapshot; last seen {:?}", last))
        .expect("session closed while waiting")
}

/// Running session plus everything a test pokes at
pub struct TestSession {
    pub session: Arc<PlaybackSession>,
    pub control: SimulatorControl,
    pub catalog: Arc<MemoryCatalog>,
    pub supervisor: Arc<LifecycleSupervisor>,
    pub endpoint: SessionEndpoint,
    pub controller: SessionController,
}

impl TestSession {
    pub async fn start() -> Self {
        Self::start_with(SessionSettings::default()).await
    }

    pub async fn start_with_policy(policy: ErrorPolicy) -> Self {
        Self::start_with(SessionSettings {
            on_transport_error: policy,
            ..SessionSettings::default()
        })
        .await
    }

    pub async fn start_with(settings: SessionSettings) -> Self {
        let catalog = Arc::new(MemoryCatalog::new());
        let transport = SimulatedTransport::new(fast_simulator());
        let control = transport.control();

        let session = Arc::new(
            SessionBuilder::new(transport)
                .catalog(Arc::clone(&catalog) as Arc<dyn cadence_session::playback::Catalog>)
                .settings(settings)
                .shuffle_seed(42)
                .spawn(),
        );

        let (publisher, endpoint) = endpoint();
        let supervisor = LifecycleSupervisor::start(Arc::clone(&session), publisher);

        let mut controller = SessionController::new(endpoint.clone());
        controller
            .connect(Duration::from_secs(1))
            .await
            .expect("controller should connect");

        Self {
            session,
            control,
            catalog,
            supervisor,
            endpoint,
            controller,
        }
    }

    /// Fresh controller on the same endpoint
    pub async fn second_controller(&self) -> SessionController {
        let mut controller = SessionController::new(self.endpoint.clone());
        controller
            .connect(Duration::from_secs(1))
            .await
            .expect("second controller should connect");
        controller
    }

    pub fn subscribe(&self) -> SnapshotSubscription {
        self.controller.subscribe().expect("connected")
    }

    pub fn snapshot(&self) -> Arc<PlaybackSnapshot> {
        self.controller.snapshot().expect("connected")
    }

    /// Put every fixture track into the catalog
    pub async fn register(&self, tracks: &[TrackRef]) {
        for track in tracks {
            self.catalog.insert(track.clone()).await;
        }
    }
}
