//! Call Lifecycle State

use super::host::Direction;
use super::identity::SipUri;
use crate::media::TrackKind;
use crate::preferences::Preferences;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// CALL STATE
// ============================================================================

/// Lifecycle of the single call session of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Nothing registered yet
    Idle,
    /// Transport opening, credentials being checked
    Registering,
    /// Ready to place or receive a call
    Registered,
    /// Inbound invitation waiting for `answer()`
    Ringing,
    /// Invite sent or accepted, media being set up
    Negotiating,
    /// Media flowing
    Established,
    /// Call ended; registration still usable
    Terminated,
    /// Registration or inbound accept failed
    Failed,
}

impl CallState {
    /// A session exists and owns media
    pub fn is_active(self) -> bool {
        matches!(
            self,
            CallState::Ringing | CallState::Negotiating | CallState::Established
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Terminated | CallState::Failed)
    }

    /// `register()` is allowed from here
    pub fn can_register(self) -> bool {
        matches!(
            self,
            CallState::Idle | CallState::Terminated | CallState::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Registering => "registering",
            CallState::Registered => "registered",
            CallState::Ringing => "ringing",
            CallState::Negotiating => "negotiating",
            CallState::Established => "established",
            CallState::Terminated => "terminated",
            CallState::Failed => "failed",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Events broadcast by the controller
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    StateChanged { from: CallState, to: CallState },
    DurationTick(u64),
    RemoteTrackAdded { kind: TrackKind, total: usize },
    PreferencesChanged(Preferences),
    /// A user gesture is needed (true) or no longer needed (false)
    PlaybackUnlock(bool),
    Error(String),
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Everything a presenter needs to render the call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSnapshot {
    pub state: CallState,
    /// The user agent holds a live registration
    pub registered: bool,
    pub direction: Option<Direction>,
    pub peer: Option<SipUri>,
    /// Wall-clock time the call was established
    pub started_at: Option<DateTime<Utc>>,
    pub duration: u64,
    pub duration_label: String,
    pub muted: bool,
    pub camera_disabled: bool,
    pub has_local_stream: bool,
    pub remote_track_count: usize,
    pub error: Option<String>,
    pub needs_playback_unlock: bool,
    pub device_test_open: bool,
}
