//! Call Engine Settings
//!
//! Settings are plain serde structs with defaults, so a partial JSON file
//! or a handful of environment variables is enough to bring a client up.

use crate::session::SipUri;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid SIP server URL '{url}': {reason}")]
    InvalidServer { url: String, reason: String },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid retry policy: {0}")]
    InvalidRetryPolicy(String),
}

// ============================================================================
// ENVIRONMENT KEYS
// ============================================================================

const ENV_SIP_SERVER: &str = "TELECONSULT_SIP_SERVER";
const ENV_SIP_REALM: &str = "TELECONSULT_SIP_REALM";
const ENV_SIP_USER: &str = "TELECONSULT_SIP_USER";
const ENV_SIP_PASSWORD: &str = "TELECONSULT_SIP_PASSWORD";
const ENV_JOIN_ORIGIN: &str = "TELECONSULT_JOIN_ORIGIN";

// ============================================================================
// ICE SERVER CONFIGURATION
// ============================================================================

/// A STUN or TURN server handed to the peer connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

/// Standard STUN/TURN configuration: one public STUN server
/// plus a TURN relay with static credentials
pub fn default_ice_servers() -> Vec<IceServer> {
    vec![
        IceServer::stun("stun:stun.l.google.com:19302"),
        IceServer::turn("turn:global.relay.metered.ca:80", "openai", "openai"),
    ]
}

// ============================================================================
// SIP ACCOUNT
// ============================================================================

/// Registrar endpoint and credentials for this user agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SipAccountConfig {
    /// Secure WebSocket endpoint of the registrar/proxy
    pub server: String,
    pub realm: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl SipAccountConfig {
    /// Own identity as `<username>@<realm>`
    pub fn identity(&self) -> SipUri {
        SipUri::new(self.username.clone(), self.realm.clone())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.server).map_err(|e| ConfigError::InvalidServer {
            url: self.server.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidServer {
                url: self.server.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        if self.realm.trim().is_empty() {
            return Err(ConfigError::Missing("sip.realm"));
        }
        if self.username.trim().is_empty() {
            return Err(ConfigError::Missing("sip.username"));
        }
        Ok(())
    }
}

impl Default for SipAccountConfig {
    fn default() -> Self {
        Self {
            server: "wss://localhost:7443".to_string(),
            realm: "localhost".to_string(),
            username: "doctor1".to_string(),
            password: String::new(),
        }
    }
}

// ============================================================================
// RETRY POLICY
// ============================================================================

/// Bounded exponential backoff for attaching streams to UI sinks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
        }
    }
}

// ============================================================================
// JOIN LINK
// ============================================================================

/// Where patients land when they open a shared join link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinLinkConfig {
    pub origin: String,
    pub path: String,
}

impl Default for JoinLinkConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000".to_string(),
            path: "profile".to_string(),
        }
    }
}

// ============================================================================
// CALL CONFIG
// ============================================================================

/// Complete configuration of one call controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallConfig {
    #[serde(default)]
    pub sip: SipAccountConfig,
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServer>,
    /// Accept inbound invitations without waiting for `answer()`
    #[serde(default = "default_auto_answer")]
    pub auto_answer: bool,
    #[serde(default)]
    pub sink_retry: RetryPolicy,
    #[serde(default)]
    pub join_link: JoinLinkConfig,
}

fn default_auto_answer() -> bool {
    true
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            sip: SipAccountConfig::default(),
            ice_servers: default_ice_servers(),
            auto_answer: true,
            sink_retry: RetryPolicy::default(),
            join_link: JoinLinkConfig::default(),
        }
    }
}

impl CallConfig {
    /// Defaults overridden by `TELECONSULT_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parses a JSON document; missing sections fall back to defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::info!("Loading call config from {:?}", path);
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sip.validate()?;
        if self.sink_retry.max_attempts == 0 {
            return Err(ConfigError::InvalidRetryPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.sink_retry.max_backoff_ms < self.sink_retry.initial_backoff_ms {
            return Err(ConfigError::InvalidRetryPolicy(
                "max_backoff_ms is smaller than initial_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(server) = lookup(ENV_SIP_SERVER) {
            config.sip.server = server;
        }
        if let Some(realm) = lookup(ENV_SIP_REALM) {
            config.sip.realm = realm;
        }
        if let Some(user) = lookup(ENV_SIP_USER) {
            config.sip.username = user;
        }
        if let Some(password) = lookup(ENV_SIP_PASSWORD) {
            config.sip.password = password;
        }
        if let Some(origin) = lookup(ENV_JOIN_ORIGIN) {
            config.join_link.origin = origin;
        }

        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// TESTS
// ============================================================================
