//! Device Manager
//!
//! Policy around the host's media capabilities: device enumeration,
//! stream acquisition, preference application and release.

use super::level::{AudioAnalyser, LevelMonitor};
use super::track::{DeviceInfo, DeviceSet, MediaStream, TrackKind, TrackRef};
use crate::preferences::Preferences;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Device labels are unavailable until media permission is granted")]
    LabelsUnavailable,

    #[error("Permission to use camera/microphone was denied")]
    PermissionDenied,

    #[error("No matching device available: {0}")]
    DeviceUnavailable(String),

    #[error("Device cannot satisfy constraints: {0}")]
    Constraint(String),

    #[error("Audio analysis failed: {0}")]
    Analysis(String),

    #[error("Media host error: {0}")]
    Host(String),
}

// ============================================================================
// CONSTRAINTS
// ============================================================================

/// What to capture, and optionally from which exact devices
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConstraints {
    pub camera_id: Option<String>,
    pub microphone_id: Option<String>,
    pub video: bool,
    pub audio: bool,
}

impl StreamConstraints {
    /// Audio and video from any device
    pub fn call() -> Self {
        Self {
            camera_id: None,
            microphone_id: None,
            video: true,
            audio: true,
        }
    }

    /// Audio and video from the given devices
    pub fn with_devices(camera_id: Option<String>, microphone_id: Option<String>) -> Self {
        Self {
            camera_id,
            microphone_id,
            ..Self::call()
        }
    }
}

// ============================================================================
// HOST SEAM
// ============================================================================

/// Media capabilities supplied by the host environment
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, MediaError>;

    async fn get_user_media(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<Vec<TrackRef>, MediaError>;

    /// Frequency analyser fed by the stream's audio
    fn create_analyser(&self, stream: &MediaStream) -> Result<Box<dyn AudioAnalyser>, MediaError>;
}

// ============================================================================
// DEVICE MANAGER
// ============================================================================

#[derive(Clone)]
pub struct DeviceManager {
    host: Arc<dyn MediaDevices>,
}

impl DeviceManager {
    pub fn new(host: Arc<dyn MediaDevices>) -> Self {
        Self { host }
    }

    /// Cameras and microphones currently known to the host
    pub async fn list_devices(&self) -> Result<DeviceSet, MediaError> {
        let devices = self.host.enumerate_devices().await?;

        // Hosts hide labels until a stream has been granted
        if !devices.is_empty() && devices.iter().all(|d| d.label.trim().is_empty()) {
            return Err(MediaError::LabelsUnavailable);
        }

        let set = DeviceSet::from_devices(devices);
        tracing::debug!(
            "Found {} camera(s), {} microphone(s)",
            set.cameras.len(),
            set.microphones.len()
        );
        Ok(set)
    }

    /// Opens a local stream. Preferences are not applied yet.
    pub async fn acquire_stream(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<MediaStream, MediaError> {
        if !constraints.audio && !constraints.video {
            return Err(MediaError::Constraint(
                "at least one of audio or video must be requested".to_string(),
            ));
        }

        tracing::debug!("Requesting media with constraints: {:?}", constraints);
        let tracks = self.host.get_user_media(constraints).await?;

        let stream = MediaStream::new(tracks);
        if constraints.audio && stream.audio_tracks().next().is_none() {
            stream.release();
            return Err(MediaError::DeviceUnavailable("microphone".to_string()));
        }
        if constraints.video && stream.video_tracks().next().is_none() {
            stream.release();
            return Err(MediaError::DeviceUnavailable("camera".to_string()));
        }

        tracing::info!(
            "Acquired stream {}: {}",
            stream.id(),
            stream
                .tracks()
                .iter()
                .map(|t| format!("{}: {}", t.kind(), t.label()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(stream)
    }

    /// Audio tracks follow `muted`, video tracks follow `camera_disabled`
    pub fn apply_preferences(&self, stream: &MediaStream, preferences: Preferences) {
        apply_to_tracks(stream.tracks(), preferences);
    }

    /// Stops every track; `None` or an already released stream is a no-op
    pub fn release_stream(&self, stream: Option<&MediaStream>) {
        if let Some(stream) = stream {
            stream.release();
        }
    }

    /// Lazy level sequence (0..=100) fed by the stream's microphone
    pub fn monitor_input_level(&self, stream: &MediaStream) -> Result<LevelMonitor, MediaError> {
        if stream.audio_tracks().next().is_none() {
            return Err(MediaError::DeviceUnavailable("microphone".to_string()));
        }
        let analyser = self.host.create_analyser(stream)?;
        Ok(LevelMonitor::new(analyser))
    }
}

/// Applies the preference flags to any set of tracks (local or senders)
pub fn apply_to_tracks<'a>(tracks: impl IntoIterator<Item = &'a TrackRef>, preferences: Preferences) {
    for track in tracks {
        match track.kind() {
            TrackKind::Audio => track.set_enabled(!preferences.muted),
            TrackKind::Video => track.set_enabled(!preferences.camera_disabled),
        }
    }
}

impl std::fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManager").finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{DeviceKind, MediaTrack};
    use crate::session::testing::FakeDevices;

    fn manager(devices: &Arc<FakeDevices>) -> DeviceManager {
        DeviceManager::new(Arc::clone(devices) as Arc<dyn MediaDevices>)
    }

    #[tokio::test]
    async fn test_list_devices_requires_labels() {
        let devices = FakeDevices::new();
        devices.hide_labels(true);
        let err = manager(&devices).list_devices().await.unwrap_err();
        assert_eq!(err, MediaError::LabelsUnavailable);

        devices.hide_labels(false);
        let set = manager(&devices).list_devices().await.unwrap();
        assert_eq!(set.cameras.len(), 1);
        assert_eq!(set.microphones.len(), 1);
    }

    #[tokio::test]
    async fn test_list_devices_empty_host() {
        let devices = FakeDevices::with_devices(vec![]);
        let set = manager(&devices).list_devices().await.unwrap();
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_acquire_rejects_empty_constraints() {
        let devices = FakeDevices::new();
        let err = manager(&devices)
            .acquire_stream(&StreamConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Constraint(_)));
        assert_eq!(devices.acquire_count(), 0);
    }

    #[tokio::test]
    async fn test_acquire_unknown_device() {
        let devices = FakeDevices::new();
        let constraints = StreamConstraints::with_devices(Some("no-such-cam".to_string()), None);
        let err = manager(&devices)
            .acquire_stream(&constraints)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::DeviceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_acquire_without_camera_releases_partial_stream() {
        let devices = FakeDevices::with_devices(vec![DeviceInfo {
            id: "mic-1".to_string(),
            label: "USB Mic".to_string(),
            kind: DeviceKind::AudioInput,
        }]);
        let err = manager(&devices)
            .acquire_stream(&StreamConstraints::call())
            .await
            .unwrap_err();
        assert_eq!(err, MediaError::DeviceUnavailable("camera".to_string()));
        assert!(devices.issued_tracks().iter().all(|t| t.is_stopped()));
    }

    #[tokio::test]
    async fn test_permission_denied_passes_through() {
        let devices = FakeDevices::new();
        devices.fail_next_acquire(MediaError::PermissionDenied);
        let err = manager(&devices)
            .acquire_stream(&StreamConstraints::call())
            .await
            .unwrap_err();
        assert_eq!(err, MediaError::PermissionDenied);
    }

    #[tokio::test]
    async fn test_apply_preferences_sets_track_flags() {
        let devices = FakeDevices::new();
        let dm = manager(&devices);
        let stream = dm.acquire_stream(&StreamConstraints::call()).await.unwrap();

        dm.apply_preferences(
            &stream,
            Preferences {
                muted: true,
                camera_disabled: false,
            },
        );
        assert!(stream.audio_tracks().all(|t| !t.enabled()));
        assert!(stream.video_tracks().all(|t| t.enabled()));

        dm.apply_preferences(
            &stream,
            Preferences {
                muted: false,
                camera_disabled: true,
            },
        );
        assert!(stream.audio_tracks().all(|t| t.enabled()));
        assert!(stream.video_tracks().all(|t| !t.enabled()));
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let devices = FakeDevices::new();
        let dm = manager(&devices);
        let stream = dm.acquire_stream(&StreamConstraints::call()).await.unwrap();

        dm.release_stream(Some(&stream));
        dm.release_stream(Some(&stream));
        dm.release_stream(None);

        assert!(devices.issued_tracks().iter().all(|t| t.stop_count() == 1));
    }

    #[tokio::test]
    async fn test_monitor_needs_audio() {
        let devices = FakeDevices::new();
        let dm = manager(&devices);
        let constraints = StreamConstraints {
            video: true,
            ..StreamConstraints::default()
        };
        let stream = dm.acquire_stream(&constraints).await.unwrap();
        assert!(dm.monitor_input_level(&stream).is_err());
    }
}
