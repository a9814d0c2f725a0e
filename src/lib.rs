//! Teleconsult - Call Session Engine
//!
//! Headless engine behind a doctor/patient video consultation:
//! - SIP registration, outbound invites and inbound invitations
//! - Local media acquisition with persisted mute/camera preferences
//! - Remote track accumulation and UI sink binding
//! - Device test with microphone level monitoring
//! - Party roster and patient join links
//!
//! The SIP user agent, peer connection, media host and render surfaces are
//! supplied by the embedding application through the traits in [`session`]
//! and [`media`].

pub mod config;
pub mod media;
pub mod preferences;
pub mod presenter;
pub mod roster;
pub mod session;

pub use config::CallConfig;
pub use presenter::{CallView, UserAction};
pub use session::{CallEvent, CallSnapshot, CallState, SessionController, SessionError};

use tracing_subscriber::EnvFilter;

/// Installs the fmt subscriber (`RUST_LOG` plus `teleconsult=debug`).
/// Later calls are no-ops.
pub fn init_logging() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "teleconsult=debug".parse() {
        filter = filter.add_directive(directive);
    }
    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_ok() {
        tracing::debug!("Logging initialized");
    }
}
