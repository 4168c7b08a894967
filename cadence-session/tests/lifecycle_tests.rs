//! Lifecycle supervisor: teardown on host signals

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use cadence_common::events::SessionEvent;
use cadence_common::TransportStatus;
use cadence_session::playback::{Command, TransportCall};
use cadence_session::Error;
use helpers::{tracks, wait_for, TestSession};

async fn start_playing(t: &TestSession) {
    let mut sub = t.subscribe();
    t.controller
        .execute(Command::Play {
            tracks: tracks(&["a", "b"]),
            start_index: 0,
        })
        .await
        .unwrap();
    wait_for(&mut sub, |s| s.status == TransportStatus::Playing).await;
}

#[tokio::test(start_paused = true)]
async fn test_detach_while_idle_tears_down() {
    let t = TestSession::start().await;

    assert!(t.supervisor.on_host_detached().await);
    assert!(t.supervisor.is_torn_down().await);
    assert!(t.session.is_shut_down());
    assert!(t.control.is_released());
    assert!(t.endpoint.current().is_none());
    assert_eq!(
        t.controller.execute(Command::SkipNext).await,
        Err(Error::NotConnected)
    );
}

#[tokio::test(start_paused = true)]
async fn test_task_removed_while_paused_tears_down() {
    let t = TestSession::start().await;
    start_playing(&t).await;
    t.controller.execute(Command::TogglePlayPause).await.unwrap();
    assert_eq!(t.snapshot().status, TransportStatus::Paused);

    assert!(t.supervisor.on_task_removed().await);
    assert!(t.control.is_released());
}

#[tokio::test(start_paused = true)]
async fn test_detach_while_playing_defers_until_paused() {
    let t = TestSession::start().await;
    start_playing(&t).await;

    assert!(!t.supervisor.on_host_detached().await);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!t.supervisor.is_torn_down().await);
    assert!(!t.control.is_released());
    assert_eq!(t.snapshot().status, TransportStatus::Playing);

    t.controller.execute(Command::TogglePlayPause).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), t.supervisor.wait_for_teardown())
        .await
        .expect("teardown after pause");
    assert!(t.control.is_released());
    assert!(t.endpoint.current().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_detach_while_loading_is_refused() {
    let t = TestSession::start().await;
    t.controller
        .execute(Command::Play {
            tracks: tracks(&["a"]),
            start_index: 0,
        })
        .await
        .unwrap();
    assert_eq!(t.snapshot().status, TransportStatus::Loading);

    assert!(!t.supervisor.on_host_detached().await);
    assert!(!t.control.is_released());
}

#[tokio::test(start_paused = true)]
async fn test_attach_cancels_deferred_teardown() {
    let t = TestSession::start().await;
    start_playing(&t).await;

    assert!(!t.supervisor.on_host_detached().await);
    t.supervisor.on_host_attached();

    t.controller.execute(Command::TogglePlayPause).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!t.supervisor.is_torn_down().await);
    assert!(!t.control.is_released());
    t.controller.execute(Command::TogglePlayPause).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_deferred_teardown_does_not_keep_supervisor_alive() {
    let t = TestSession::start().await;
    start_playing(&t).await;

    assert!(!t.supervisor.on_host_detached().await);
    tokio::task::yield_now().await;
    assert_eq!(Arc::strong_count(&t.supervisor), 1);
}

#[tokio::test(start_paused = true)]
async fn test_attach_during_teardown_lets_it_finish() {
    let t = TestSession::start().await;
    start_playing(&t).await;
    assert!(!t.supervisor.on_host_detached().await);

    t.controller.execute(Command::TogglePlayPause).await.unwrap();
    while !t.session.is_shut_down() {
        tokio::task::yield_now().await;
    }
    t.supervisor.on_host_attached();

    tokio::time::timeout(Duration::from_secs(5), t.supervisor.wait_for_teardown())
        .await
        .expect("teardown completes after attach");
    assert!(t.supervisor.is_torn_down().await);
    assert!(t.control.is_released());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_is_idempotent() {
    let t = TestSession::start().await;
    start_playing(&t).await;
    let mut events = t.session.events().subscribe();

    t.supervisor.shutdown().await;
    t.supervisor.shutdown().await;
    t.session.shutdown().await;

    let releases = t
        .control
        .calls()
        .into_iter()
        .filter(|c| *c == TransportCall::Release)
        .count();
    assert_eq!(releases, 1);

    let mut reasons = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::TeardownAuthorized { reason, .. } = event {
            reasons.push(reason);
        }
    }
    assert_eq!(reasons, vec!["shutdown".to_string()]);
}
