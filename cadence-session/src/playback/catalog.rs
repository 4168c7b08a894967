//! Catalog interface
//!
//! The catalog is the persistent store of track metadata. It lives outside
//! this crate; the session only needs to look tracks up, flip favorites and
//! bump play counts.

use async_trait::async_trait;
use cadence_common::{TrackId, TrackRef};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::{debug, info};

/// Catalog failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Track not found: {0}")]
    NotFound(TrackId),

    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

/// Metadata store consulted by the session
#[async_trait]
pub trait Catalog: Send + Sync + 'static {
    async fn get_track_by_id(&self, id: &TrackId) -> Result<Option<TrackRef>, CatalogError>;

    async fn set_favorite(&self, id: &TrackId, favorite: bool) -> Result<(), CatalogError>;

    async fn increment_play_count(&self, id: &TrackId) -> Result<(), CatalogError>;
}

/// In-memory catalog used by the binary and tests
#[derive(Default)]
pub struct MemoryCatalog {
    tracks: RwLock<HashMap<TrackId, TrackRef>>,
    play_counts: RwLock<HashMap<TrackId, u64>>,
    fail_writes: AtomicBool,
    write_delay: RwLock<Option<Duration>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracks(tracks: impl IntoIterator<Item = TrackRef>) -> Self {
        let map = tracks.into_iter().map(|t| (t.id.clone(), t)).collect();
        Self {
            tracks: RwLock::new(map),
            ..Self::default()
        }
    }

    /// Load a JSON array of track references
    pub fn from_json_file(path: &Path) -> cadence_common::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let tracks: Vec<TrackRef> = serde_json::from_str(&content)?;
        info!("Loaded {} tracks from {}", tracks.len(), path.display());
        Ok(Self::with_tracks(tracks))
    }

    pub async fn insert(&self, track: TrackRef) {
        self.tracks.write().await.insert(track.id.clone(), track);
    }

    /// All tracks, sorted by id
    pub async fn all_tracks(&self) -> Vec<TrackRef> {
        let mut tracks: Vec<TrackRef> = self.tracks.read().await.values().cloned().collect();
        tracks.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        tracks
    }

    pub async fn play_count(&self, id: &TrackId) -> u64 {
        self.play_counts.read().await.get(id).copied().unwrap_or(0)
    }

    /// Make every write (favorite, play count) fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay every write, to exercise caller timeouts
    pub async fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.write().await = delay;
    }

    async fn before_write(&self) -> Result<(), CatalogError> {
        let delay = *self.write_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn get_track_by_id(&self, id: &TrackId) -> Result<Option<TrackRef>, CatalogError> {
        Ok(self.tracks.read().await.get(id).cloned())
    }

    async fn set_favorite(&self, id: &TrackId, favorite: bool) -> Result<(), CatalogError> {
        self.before_write().await?;
        let mut tracks = self.tracks.write().await;
        let track = tracks
            .get_mut(id)
            .ok_or_else(|| CatalogError::NotFound(id.clone()))?;
        *track = track.with_favorite(favorite);
        debug!("Catalog: {} favorite={}", id, favorite);
        Ok(())
    }

    async fn increment_play_count(&self, id: &TrackId) -> Result<(), CatalogError> {
        self.before_write().await?;
        *self.play_counts.write().await.entry(id.clone()).or_insert(0) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_favorite_updates_stored_track() {
        let catalog = MemoryCatalog::with_tracks([TrackRef::new("a", "A", "file:///a")]);
        let id = TrackId::from("a");

        catalog.set_favorite(&id, true).await.unwrap();
        let track = catalog.get_track_by_id(&id).await.unwrap().unwrap();
        assert!(track.favorite);

        let missing = catalog.set_favorite(&TrackId::from("zz"), true).await;
        assert_eq!(missing, Err(CatalogError::NotFound(TrackId::from("zz"))));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let catalog = MemoryCatalog::with_tracks([TrackRef::new("a", "A", "file:///a")]);
        let id = TrackId::from("a");
        catalog.set_fail_writes(true);

        assert!(catalog.set_favorite(&id, true).await.is_err());
        assert!(catalog.increment_play_count(&id).await.is_err());
        assert_eq!(catalog.play_count(&id).await, 0);

        catalog.set_fail_writes(false);
        catalog.increment_play_count(&id).await.unwrap();
        assert_eq!(catalog.play_count(&id).await, 1);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.json");
        std::fs::write(
            &path,
            r#"[{"id":"t1","name":"One","locator":"file:///1.flac","duration_ms":1000}]"#,
        )
        .unwrap();

        let catalog = MemoryCatalog::from_json_file(&path).unwrap();
        let tracks = catalog.tracks.try_read().unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[&TrackId::from("t1")].duration_ms, Some(1000));
    }
}
