//! Host Seams
//!
//! The SIP user-agent library, the peer connection and the rendering
//! surface are supplied from outside. The controller only talks to them
//! through these traits, which keeps it headless.

use super::identity::SipUri;
use super::remote::RemoteStream;
use crate::config::{IceServer, SipAccountConfig};
use crate::media::{MediaStream, TrackRef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("Transport connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication rejected: {0}")]
    AuthenticationFailed(String),

    #[error("Request rejected: {code} {reason}")]
    Rejected { code: u16, reason: String },

    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    #[error("Signaling transport closed")]
    Closed,
}

// ============================================================================
// SESSION TYPES
// ============================================================================

/// Who originated the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Session state as reported by the SIP library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    Initial,
    Establishing,
    Established,
    Terminating,
    Terminated,
}

/// Media requested in the invite/accept offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaOffer {
    pub audio: bool,
    pub video: bool,
}

impl MediaOffer {
    pub const AUDIO_VIDEO: MediaOffer = MediaOffer {
        audio: true,
        video: true,
    };
}

/// Notifications flowing from the user agent into the controller
#[derive(Clone)]
pub enum UserAgentEvent {
    /// A remote party is inviting us
    IncomingInvite(Arc<dyn SipSession>),

    SessionState {
        session_id: String,
        state: TransportState,
    },

    /// Peer connection delivered a remote track
    RemoteTrack {
        session_id: String,
        track: TrackRef,
    },

    /// WebSocket to the registrar went away
    TransportClosed,
}

impl fmt::Debug for UserAgentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserAgentEvent::IncomingInvite(session) => f
                .debug_tuple("IncomingInvite")
                .field(&session.id())
                .finish(),
            UserAgentEvent::SessionState { session_id, state } => f
                .debug_struct("SessionState")
                .field("session_id", session_id)
                .field("state", state)
                .finish(),
            UserAgentEvent::RemoteTrack { session_id, track } => f
                .debug_struct("RemoteTrack")
                .field("session_id", session_id)
                .field("kind", &track.kind())
                .field("track_id", &track.id())
                .finish(),
            UserAgentEvent::TransportClosed => f.write_str("TransportClosed"),
        }
    }
}

// ============================================================================
// USER AGENT
// ============================================================================

/// SIP user agent (registration + session factory)
#[async_trait]
pub trait SipUserAgent: Send + Sync {
    /// Opens the transport and registers with the given credentials
    async fn register(
        &self,
        account: &SipAccountConfig,
        ice_servers: &[IceServer],
    ) -> Result<(), SignalingError>;

    async fn unregister(&self) -> Result<(), SignalingError>;

    /// Creates an outbound session. Nothing is sent until `invite()`.
    fn create_inviter(
        &self,
        target: &SipUri,
        offer: MediaOffer,
    ) -> Result<Arc<dyn SipSession>, SignalingError>;

    /// Closes the transport
    async fn stop(&self);
}

/// One invite dialog with its peer connection
#[async_trait]
pub trait SipSession: Send + Sync {
    fn id(&self) -> String;

    fn direction(&self) -> Direction;

    fn remote_identity(&self) -> SipUri;

    fn peer_connection(&self) -> Option<Arc<dyn PeerConnection>>;

    /// Sends the INVITE; resolves once it has been sent
    async fn invite(&self) -> Result<(), SignalingError>;

    async fn accept(&self, offer: MediaOffer) -> Result<(), SignalingError>;

    async fn reject(&self) -> Result<(), SignalingError>;

    /// Withdraws an unanswered outbound invite
    async fn cancel(&self) -> Result<(), SignalingError>;

    async fn bye(&self) -> Result<(), SignalingError>;
}

/// Peer connection as far as track wiring is concerned
pub trait PeerConnection: Send + Sync {
    fn add_track(&self, track: TrackRef, stream_id: &str) -> Result<(), SignalingError>;

    /// Tracks currently attached to outbound senders
    fn senders(&self) -> Vec<TrackRef>;

    /// Tracks currently attached to inbound receivers
    fn receivers(&self) -> Vec<TrackRef>;
}

// ============================================================================
// RENDER SINKS
// ============================================================================

/// Rendering surfaces the UI exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SinkId {
    LocalPreview,
    LocalInCall,
    Remote,
    DeviceTest,
}

/// What gets bound to a sink
#[derive(Debug, Clone)]
pub enum SinkSource {
    Local(Arc<MediaStream>),
    Remote(Arc<RemoteStream>),
}

impl SinkSource {
    pub fn stream_id(&self) -> &str {
        match self {
            SinkSource::Local(stream) => stream.id(),
            SinkSource::Remote(stream) => stream.id(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Sink not mounted yet
    #[error("Sink {0:?} is not ready")]
    NotReady(SinkId),

    /// Autoplay refused without a user gesture
    #[error("Playback on {0:?} was blocked")]
    PlaybackBlocked(SinkId),
}

/// UI-supplied rendering surfaces
pub trait MediaSink: Send + Sync {
    fn attach(&self, sink: SinkId, source: SinkSource) -> Result<(), SinkError>;

    fn play(&self, sink: SinkId) -> Result<(), SinkError>;

    fn detach(&self, sink: SinkId);
}
