//! View model derived from a [`CallSnapshot`]

use crate::session::{CallSnapshot, CallState, Direction, SipUri};
use serde::Serialize;
use std::fmt;

/// What the call screen shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum CallView {
    Idle,
    /// Registering, or accepting an inbound call
    Connecting,
    /// Registered and free
    Ready,
    /// Outbound invite not answered yet
    Calling { peer: Option<SipUri> },
    /// Inbound invitation waiting for answer/reject
    IncomingCall { peer: Option<SipUri> },
    InCall { duration: String },
    Error { message: String },
}

impl CallView {
    pub fn from_snapshot(snapshot: &CallSnapshot) -> Self {
        match snapshot.state {
            CallState::Idle => CallView::Idle,
            CallState::Registering => CallView::Connecting,
            CallState::Registered => CallView::Ready,
            // A hangup while registering ends without a registration
            CallState::Terminated if snapshot.registered => CallView::Ready,
            CallState::Terminated => CallView::Idle,
            CallState::Ringing => CallView::IncomingCall {
                peer: snapshot.peer.clone(),
            },
            CallState::Negotiating => match snapshot.direction {
                Some(Direction::Inbound) => CallView::Connecting,
                _ => CallView::Calling {
                    peer: snapshot.peer.clone(),
                },
            },
            CallState::Established => CallView::InCall {
                duration: snapshot.duration_label.clone(),
            },
            CallState::Failed => CallView::Error {
                message: snapshot
                    .error
                    .clone()
                    .unwrap_or_else(|| "Call failed".to_string()),
            },
        }
    }
}

impl fmt::Display for CallView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallView::Idle => f.write_str("Not connected"),
            CallView::Connecting => f.write_str("Connecting..."),
            CallView::Ready => f.write_str("Ready"),
            CallView::Calling { peer: Some(peer) } => write!(f, "Calling {}...", peer.user),
            CallView::Calling { peer: None } => f.write_str("Calling..."),
            CallView::IncomingCall { peer: Some(peer) } => write!(f, "Incoming call from {}", peer.user),
            CallView::IncomingCall { peer: None } => f.write_str("Incoming call"),
            CallView::InCall { duration } => write!(f, "In call {}", duration),
            CallView::Error { message } => write!(f, "Error: {}", message),
        }
    }
}

/// Which user actions the screen offers right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Controls {
    pub register: bool,
    pub call: bool,
    pub answer: bool,
    pub reject: bool,
    pub hangup: bool,
    pub toggle_media: bool,
    pub device_test: bool,
    pub unlock_playback: bool,
}

pub fn controls(snapshot: &CallSnapshot) -> Controls {
    let state = snapshot.state;
    Controls {
        register: state.can_register(),
        call: snapshot.registered
            && matches!(state, CallState::Registered | CallState::Terminated),
        answer: state == CallState::Ringing,
        reject: state == CallState::Ringing,
        hangup: state.is_active(),
        toggle_media: state.is_active() || snapshot.device_test_open,
        device_test: !state.is_active(),
        unlock_playback: snapshot.needs_playback_unlock,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::format_duration;

    fn snapshot(state: CallState) -> CallSnapshot {
        CallSnapshot {
            state,
            registered: !matches!(
                state,
                CallState::Idle | CallState::Registering | CallState::Failed
            ),
            direction: None,
            peer: None,
            started_at: None,
            duration: 0,
            duration_label: format_duration(0),
            muted: false,
            camera_disabled: false,
            has_local_stream: false,
            remote_track_count: 0,
            error: None,
            needs_playback_unlock: false,
            device_test_open: false,
        }
    }

    #[test]
    fn test_views_per_state() {
        assert_eq!(CallView::from_snapshot(&snapshot(CallState::Idle)), CallView::Idle);
        assert_eq!(
            CallView::from_snapshot(&snapshot(CallState::Registering)),
            CallView::Connecting
        );
        assert_eq!(
            CallView::from_snapshot(&snapshot(CallState::Terminated)),
            CallView::Ready
        );

        let mut established = snapshot(CallState::Established);
        established.duration = 3725;
        established.duration_label = format_duration(3725);
        assert_eq!(
            CallView::from_snapshot(&established),
            CallView::InCall {
                duration: "1:02:05".to_string()
            }
        );
    }

    #[test]
    fn test_terminated_without_registration() {
        let mut ended = snapshot(CallState::Terminated);
        assert_eq!(CallView::from_snapshot(&ended), CallView::Ready);
        assert!(controls(&ended).call);

        ended.registered = false;
        assert_eq!(CallView::from_snapshot(&ended), CallView::Idle);
        let offered = controls(&ended);
        assert!(!offered.call && offered.register);
    }

    #[test]
    fn test_negotiating_depends_on_direction() {
        let peer = SipUri::new("1000", "localhost");
        let mut outbound = snapshot(CallState::Negotiating);
        outbound.direction = Some(Direction::Outbound);
        outbound.peer = Some(peer);
        let view = CallView::from_snapshot(&outbound);
        assert_eq!(view.to_string(), "Calling 1000...");

        let mut inbound = outbound.clone();
        inbound.direction = Some(Direction::Inbound);
        assert_eq!(CallView::from_snapshot(&inbound), CallView::Connecting);
    }

    #[test]
    fn test_failed_shows_error() {
        let mut failed = snapshot(CallState::Failed);
        failed.error = Some("Registration failed: 401".to_string());
        assert_eq!(
            CallView::from_snapshot(&failed).to_string(),
            "Error: Registration failed: 401"
        );
    }

    #[test]
    fn test_controls() {
        let ready = controls(&snapshot(CallState::Registered));
        assert!(ready.call && !ready.hangup && ready.device_test);

        let ringing = controls(&snapshot(CallState::Ringing));
        assert!(ringing.answer && ringing.reject && ringing.hangup);
        assert!(!ringing.device_test);

        let mut blocked = snapshot(CallState::Established);
        blocked.needs_playback_unlock = true;
        let in_call = controls(&blocked);
        assert!(in_call.unlock_playback && in_call.toggle_media && !in_call.call);
    }
}
