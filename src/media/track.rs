//! Media Tracks and Streams
//!
//! Tracks are owned by the host (browser, desktop audio stack, test fake);
//! the engine only sees them through [`MediaTrack`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ============================================================================
// TRACK
// ============================================================================

/// Kind of a single media component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

/// Host-provided audio or video track
pub trait MediaTrack: Send + Sync + fmt::Debug {
    /// Stable id, unique per underlying track
    fn id(&self) -> String;

    fn kind(&self) -> TrackKind;

    fn label(&self) -> String;

    fn enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    /// Stops capture and frees the device
    fn stop(&self);

    fn is_stopped(&self) -> bool;
}

pub type TrackRef = Arc<dyn MediaTrack>;

// ============================================================================
// LOCAL STREAM
// ============================================================================

/// Locally captured stream, released exactly once
#[derive(Debug)]
pub struct MediaStream {
    id: String,
    tracks: Vec<TrackRef>,
    released: AtomicBool,
}

impl MediaStream {
    pub fn new(tracks: Vec<TrackRef>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracks,
            released: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[TrackRef] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &TrackRef> {
        self.tracks_of(TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &TrackRef> {
        self.tracks_of(TrackKind::Video)
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &TrackRef> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Stops every track. Returns `false` if the stream was already released.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        for track in &self.tracks {
            track.stop();
        }
        tracing::debug!("Released stream {} ({} tracks)", self.id, self.tracks.len());
        true
    }
}

// ============================================================================
// DEVICES
// ============================================================================

/// Kind of a host media device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    VideoInput,
    AudioInput,
    AudioOutput,
}

/// Raw device entry as reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
    pub kind: DeviceKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub label: String,
}

/// Cameras and microphones available for a call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSet {
    pub cameras: Vec<DeviceDescriptor>,
    pub microphones: Vec<DeviceDescriptor>,
}

impl DeviceSet {
    pub fn from_devices(devices: Vec<DeviceInfo>) -> Self {
        let mut set = Self::default();
        for device in devices {
            let descriptor = DeviceDescriptor {
                id: device.id,
                label: device.label,
            };
            match device.kind {
                DeviceKind::VideoInput => set.cameras.push(descriptor),
                DeviceKind::AudioInput => set.microphones.push(descriptor),
                DeviceKind::AudioOutput => {}
            }
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty() && self.microphones.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================
