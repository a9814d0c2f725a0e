//! Session Module - SIP Call Lifecycle
//!
//! Handles:
//! - Registration with the SIP registrar
//! - Outbound invites and inbound invitations
//! - Local track wiring and remote track accumulation
//! - Duration timer, sink binding and teardown

mod controller;
mod host;
mod identity;
mod remote;
mod sink;
mod state;
mod timer;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{SessionController, SessionError};
pub use host::{
    Direction, MediaOffer, MediaSink, PeerConnection, SignalingError, SinkError, SinkId,
    SinkSource, SipSession, SipUserAgent, TransportState, UserAgentEvent,
};
pub use identity::{PartyId, SipUri};
pub use remote::RemoteStream;
pub use sink::SinkBinder;
pub use state::{CallEvent, CallSnapshot, CallState};
pub use timer::{format_duration, DurationTimer};
