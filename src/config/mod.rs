//! Configuration Module
//!
//! Runtime settings for the call engine:
//! - SIP account and registrar endpoint
//! - ICE server list handed to the peer connection
//! - Auto-answer and sink retry policy
//! - Origin and path for patient join links

mod settings;

pub use settings::{
    default_ice_servers, CallConfig, ConfigError, IceServer, JoinLinkConfig, RetryPolicy,
    SipAccountConfig,
};
