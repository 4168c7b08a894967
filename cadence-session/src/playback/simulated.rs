//! Simulated transport
//!
//! A clock-driven stand-in for a real media engine. It buffers for a
//! configurable latency after each load, advances a position clock while
//! playing, reports `ItemCompleted` at the end of each item and fails items
//! whose locator uses the `fail:` scheme.
//!
//! Used by the service binary (the real engine is an external collaborator)
//! and by the tests, which drive it through `SimulatorControl`.

use async_trait::async_trait;
use cadence_common::config::SimulatorSettings;
use cadence_common::TrackRef;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, trace};

use super::transport::{
    PositionProbe, PositionSample, Transport, TransportError, TransportErrorKind, TransportEvent,
};

/// Locator scheme that makes the simulator fail the item
pub const FAIL_SCHEME: &str = "fail:";

/// Simulator timing parameters
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub load_latency: Duration,
    pub tick: Duration,
    pub default_duration_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self::from(&SimulatorSettings::default())
    }
}

impl From<&SimulatorSettings> for SimulatorConfig {
    fn from(settings: &SimulatorSettings) -> Self {
        Self {
            load_latency: Duration::from_millis(settings.load_latency_ms),
            tick: Duration::from_millis(settings.tick_ms.max(1)),
            default_duration_ms: settings.default_duration_ms,
        }
    }
}

/// Calls received by the simulator, recorded for assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Load {
        ids: Vec<String>,
        start_index: usize,
        start_position_ms: u64,
    },
    Play,
    Pause,
    Seek(u64),
    SkipToIndex(usize),
    Stop,
    Release,
}

struct SimState {
    items: Vec<TrackRef>,
    index: Option<usize>,
    position_ms: u64,
    duration_ms: Option<u64>,
    buffering_until: Option<Instant>,
    play_when_ready: bool,
    playing: bool,
    failed: bool,
    released: bool,
    last_tick: Instant,
    calls: Vec<TransportCall>,
}

impl SimState {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            index: None,
            position_ms: 0,
            duration_ms: None,
            buffering_until: None,
            play_when_ready: false,
            playing: false,
            failed: false,
            released: false,
            last_tick: Instant::now(),
            calls: Vec::new(),
        }
    }

    fn sample(&self) -> PositionSample {
        PositionSample {
            item_index: self.index,
            position_ms: self.position_ms,
            duration_ms: self.duration_ms,
        }
    }
}

/// Shared innards; both the transport and its control handle point here
struct Shared {
    state: Mutex<SimState>,
    events: mpsc::UnboundedSender<TransportEvent>,
    probe: PositionProbe,
    config: SimulatorConfig,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, state: &SimState, event: TransportEvent) {
        if state.released {
            return;
        }
        trace!("simulator event {:?}", event);
        let _ = self.events.send(event);
    }

    fn publish(&self, state: &SimState) {
        self.probe.store(state.sample());
    }

    /// Position the engine on `index` and start buffering it
    fn start_item(&self, state: &mut SimState, index: usize, position_ms: u64) {
        state.index = Some(index);
        state.position_ms = position_ms;
        state.duration_ms = None;
        state.playing = false;
        state.failed = false;
        state.buffering_until = None;
        self.emit(state, TransportEvent::ItemTransitioned(index));

        let locator = state.items[index].locator.clone();
        if locator.starts_with(FAIL_SCHEME) {
            state.failed = true;
            self.emit(
                state,
                TransportEvent::TransportError {
                    kind: TransportErrorKind::ItemUnavailable,
                    message: format!("cannot open {}", locator),
                },
            );
        } else {
            self.emit(state, TransportEvent::BufferingChanged(true));
            if self.config.load_latency.is_zero() {
                self.finish_buffering(state);
            } else {
                state.buffering_until = Some(Instant::now() + self.config.load_latency);
            }
        }
        self.publish(state);
    }

    fn finish_buffering(&self, state: &mut SimState) {
        state.buffering_until = None;
        let duration = state
            .index
            .and_then(|i| state.items[i].duration_ms)
            .unwrap_or(self.config.default_duration_ms);
        state.duration_ms = Some(duration);
        state.position_ms = state.position_ms.min(duration);
        self.emit(state, TransportEvent::DurationResolved(duration));
        self.emit(state, TransportEvent::BufferingChanged(false));
        if state.play_when_ready {
            state.playing = true;
            state.last_tick = Instant::now();
            self.emit(state, TransportEvent::PlayingChanged(true));
        }
    }

    /// Fold elapsed wall time into the position clock
    fn advance_clock(&self, state: &mut SimState) {
        let now = Instant::now();
        if state.playing {
            let elapsed = now.saturating_duration_since(state.last_tick).as_millis() as u64;
            state.position_ms = state.position_ms.saturating_add(elapsed);
        }
        state.last_tick = now;
    }

    /// Finish the current item as if it had played to the end
    fn complete_item(&self, state: &mut SimState) {
        let Some(index) = state.index else {
            return;
        };
        if let Some(duration) = state.duration_ms {
            state.position_ms = duration;
        }
        state.playing = false;
        self.publish(state);
        self.emit(state, TransportEvent::ItemCompleted(index));
    }

    /// One clock step; returns false once released
    fn step(&self) -> bool {
        let mut state = self.lock();
        if state.released {
            return false;
        }

        if let Some(ready_at) = state.buffering_until {
            if Instant::now() >= ready_at {
                self.finish_buffering(&mut state);
            }
        }

        if state.playing {
            self.advance_clock(&mut state);
            match state.duration_ms {
                Some(duration) if state.position_ms >= duration => {
                    self.complete_item(&mut state);
                }
                _ => {
                    let position = state.position_ms;
                    self.emit(&state, TransportEvent::PositionTick(position));
                }
            }
        }
        self.publish(&state);
        true
    }

    fn guard_released(&self, state: &SimState) -> Result<(), TransportError> {
        if state.released {
            Err(TransportError::new(
                TransportErrorKind::InvalidState,
                "transport already released",
            ))
        } else {
            Ok(())
        }
    }
}

/// Clock-driven simulated transport
pub struct SimulatedTransport {
    shared: Arc<Shared>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    driver: Option<JoinHandle<()>>,
}

impl SimulatedTransport {
    /// Create the simulator and start its clock task
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: SimulatorConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(SimState::new()),
            events: events_tx,
            probe: PositionProbe::new(),
            config,
        });

        let driver_shared = Arc::clone(&shared);
        let tick = driver_shared.config.tick;
        let driver = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !driver_shared.step() {
                    break;
                }
            }
            debug!("simulator clock stopped");
        });

        Self {
            shared,
            events_rx: Some(events_rx),
            driver: Some(driver),
        }
    }

    /// Handle for tests and the binary to poke at the engine
    pub fn control(&self) -> SimulatorControl {
        SimulatorControl {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn load(
        &mut self,
        items: &[TrackRef],
        start_index: usize,
        start_position_ms: u64,
    ) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        self.shared.guard_released(&state)?;
        state.calls.push(TransportCall::Load {
            ids: items.iter().map(|t| t.id.to_string()).collect(),
            start_index,
            start_position_ms,
        });
        if start_index >= items.len() {
            return Err(TransportError::new(
                TransportErrorKind::InvalidState,
                format!("start index {} outside {} items", start_index, items.len()),
            ));
        }

        state.items = items.to_vec();
        state.play_when_ready = false;
        self.shared.start_item(&mut state, start_index, start_position_ms);
        Ok(())
    }

    async fn play(&mut self) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        self.shared.guard_released(&state)?;
        state.calls.push(TransportCall::Play);
        if state.index.is_none() {
            return Err(TransportError::new(
                TransportErrorKind::InvalidState,
                "nothing loaded",
            ));
        }

        state.play_when_ready = true;
        if state.buffering_until.is_none() && !state.failed && !state.playing {
            state.playing = true;
            state.last_tick = Instant::now();
            self.shared.emit(&state, TransportEvent::PlayingChanged(true));
        }
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        self.shared.guard_released(&state)?;
        state.calls.push(TransportCall::Pause);

        state.play_when_ready = false;
        if state.playing {
            self.shared.advance_clock(&mut state);
            state.playing = false;
            self.shared.publish(&state);
            self.shared.emit(&state, TransportEvent::PlayingChanged(false));
        }
        Ok(())
    }

    async fn seek(&mut self, position_ms: u64) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        self.shared.guard_released(&state)?;
        state.calls.push(TransportCall::Seek(position_ms));
        if state.index.is_none() {
            return Err(TransportError::new(
                TransportErrorKind::InvalidState,
                "nothing loaded",
            ));
        }

        let target = match state.duration_ms {
            Some(duration) => position_ms.min(duration),
            None => position_ms,
        };
        state.position_ms = target;
        state.last_tick = Instant::now();
        self.shared.publish(&state);
        self.shared.emit(&state, TransportEvent::PositionTick(target));
        Ok(())
    }

    async fn skip_to_index(&mut self, index: usize) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        self.shared.guard_released(&state)?;
        state.calls.push(TransportCall::SkipToIndex(index));
        if index >= state.items.len() {
            return Err(TransportError::new(
                TransportErrorKind::InvalidState,
                format!("index {} outside {} loaded items", index, state.items.len()),
            ));
        }

        self.shared.start_item(&mut state, index, 0);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        self.shared.guard_released(&state)?;
        state.calls.push(TransportCall::Stop);

        let was_playing = state.playing;
        state.items.clear();
        state.index = None;
        state.position_ms = 0;
        state.duration_ms = None;
        state.buffering_until = None;
        state.playing = false;
        state.play_when_ready = false;
        state.failed = false;
        self.shared.publish(&state);
        if was_playing {
            self.shared.emit(&state, TransportEvent::PlayingChanged(false));
        }
        Ok(())
    }

    async fn release(&mut self) {
        {
            let mut state = self.shared.lock();
            if state.released {
                return;
            }
            state.calls.push(TransportCall::Release);
            state.released = true;
            state.playing = false;
            state.items.clear();
            state.index = None;
        }
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        debug!("simulated transport released");
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.take()
    }

    fn position_probe(&self) -> PositionProbe {
        self.shared.probe.clone()
    }
}

impl Drop for SimulatedTransport {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

/// Out-of-band handle on a simulator
#[derive(Clone)]
pub struct SimulatorControl {
    shared: Arc<Shared>,
}

impl SimulatorControl {
    /// End the current item now, as if it had played to completion
    pub fn finish_current(&self) {
        let mut state = self.shared.lock();
        self.shared.complete_item(&mut state);
    }

    /// Raise a transport error event for the current item
    pub fn inject_error(&self, kind: TransportErrorKind, message: impl Into<String>) {
        let mut state = self.shared.lock();
        state.failed = true;
        state.playing = false;
        self.shared.emit(
            &state,
            TransportEvent::TransportError {
                kind,
                message: message.into(),
            },
        );
    }

    /// Every call the session made, in order
    pub fn calls(&self) -> Vec<TransportCall> {
        self.shared.lock().calls.clone()
    }

    pub fn is_released(&self) -> bool {
        self.shared.lock().released
    }

    /// Id of the item the engine is positioned on
    pub fn current_item_id(&self) -> Option<String> {
        let state = self.shared.lock();
        state.index.map(|i| state.items[i].id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant_config() -> SimulatorConfig {
        SimulatorConfig {
            load_latency: Duration::ZERO,
            tick: Duration::from_millis(100),
            default_duration_ms: 1_000,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_then_play_reports_events_in_order() {
        let mut transport = SimulatedTransport::new(instant_config());
        let mut rx = transport.take_events().unwrap();
        assert!(transport.take_events().is_none());

        let items = vec![TrackRef::new("a", "A", "file:///a").with_duration_ms(400)];
        transport.load(&items, 0, 0).await.unwrap();
        transport.play().await.unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![
                TransportEvent::ItemTransitioned(0),
                TransportEvent::BufferingChanged(true),
                TransportEvent::DurationResolved(400),
                TransportEvent::BufferingChanged(false),
                TransportEvent::PlayingChanged(true),
            ]
        );

        tokio::time::sleep(Duration::from_millis(450)).await;
        let events = drain(&mut rx);
        assert!(events.contains(&TransportEvent::ItemCompleted(0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_scheme_raises_transport_error() {
        let mut transport = SimulatedTransport::new(instant_config());
        let mut rx = transport.take_events().unwrap();

        let items = vec![TrackRef::new("bad", "Bad", "fail://missing")];
        transport.load(&items, 0, 0).await.unwrap();

        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(TransportEvent::TransportError {
                kind: TransportErrorKind::ItemUnavailable,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_is_final() {
        let mut transport = SimulatedTransport::new(instant_config());
        let mut rx = transport.take_events().unwrap();
        let control = transport.control();

        let items = vec![TrackRef::new("a", "A", "file:///a")];
        transport.load(&items, 0, 0).await.unwrap();
        transport.play().await.unwrap();
        drain(&mut rx);

        transport.release().await;
        assert!(control.is_released());
        assert!(transport.play().await.is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        control.finish_current();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_tracks_clock() {
        let mut transport = SimulatedTransport::new(instant_config());
        let probe = transport.position_probe();

        let items = vec![TrackRef::new("a", "A", "file:///a").with_duration_ms(10_000)];
        transport.load(&items, 0, 0).await.unwrap();
        transport.play().await.unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;

        let sample = probe.read();
        assert_eq!(sample.item_index, Some(0));
        assert_eq!(sample.duration_ms, Some(10_000));
        assert!(sample.position_ms >= 200, "position {}", sample.position_ms);
    }
}
