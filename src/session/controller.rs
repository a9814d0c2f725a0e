//! Session Controller
//!
//! Owns the one call session of a user agent: registration, outbound
//! invite, inbound invitation, local/remote media wiring and teardown.
//! All host interaction goes through the traits in [`super::host`], so the
//! controller runs headless.

use super::host::{
    Direction, MediaOffer, MediaSink, PeerConnection, SignalingError, SinkError, SinkId, SinkSource,
    SipSession, SipUserAgent, TransportState, UserAgentEvent,
};
use super::identity::SipUri;
use super::remote::RemoteStream;
use super::sink::SinkBinder;
use super::state::{CallEvent, CallSnapshot, CallState};
use super::timer::{format_duration, DurationTimer};
use crate::config::{CallConfig, ConfigError};
use crate::media::{
    apply_to_tracks, DeviceManager, DeviceSet, LevelMonitor, MediaDevices, MediaError, MediaStream,
    MonitorHandle, StreamConstraints, TrackRef,
};
use crate::preferences::{PreferenceError, PreferenceStore, Preferences};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Registration failed: {0}")]
    Registration(SignalingError),

    #[error("Invalid call target: '{0}'")]
    InvalidTarget(String),

    #[error("Cannot call own identity {0}")]
    SelfCall(SipUri),

    #[error("Call negotiation failed: {0}")]
    Negotiation(String),

    #[error("Playback blocked: {0}")]
    PlaybackBlocked(SinkError),

    #[error("Already in a call")]
    AlreadyInCall,

    #[error("Not registered")]
    NotRegistered,

    #[error("No active call")]
    NoActiveCall,

    #[error("Cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: CallState,
    },

    #[error("Device test is not open")]
    DeviceTestClosed,

    #[error("Call setup was cancelled")]
    Cancelled,

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Preferences(#[from] PreferenceError),
}

// ============================================================================
// INTERNAL STATE
// ============================================================================

struct ActiveSession {
    handle: Arc<dyn SipSession>,
    id: String,
    direction: Direction,
    peer: SipUri,
    pc: Option<Arc<dyn PeerConnection>>,
}

impl ActiveSession {
    fn new(handle: Arc<dyn SipSession>) -> Self {
        Self {
            id: handle.id(),
            direction: handle.direction(),
            peer: handle.remote_identity(),
            pc: handle.peer_connection(),
            handle,
        }
    }
}

/// Devices picked in the test dialog, used by later calls
#[derive(Debug, Clone, Default)]
struct DeviceSelection {
    camera_id: Option<String>,
    microphone_id: Option<String>,
}

#[derive(Default)]
struct DeviceTest {
    selection: DeviceSelection,
    stream: Option<Arc<MediaStream>>,
    monitor: Option<MonitorHandle>,
}

impl DeviceTest {
    fn stop(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }
        if let Some(stream) = self.stream.take() {
            stream.release();
        }
    }
}

struct Core {
    state: CallState,
    registered: bool,
    /// Set by `shutdown()`; every notification is ignored until `register()`
    closed: bool,
    registration_epoch: u64,
    /// Bumped on every session teardown; stale async work compares against it
    epoch: u64,
    /// Outbound media acquisition in flight, no session yet
    setup_in_progress: bool,
    preferences: Preferences,
    session: Option<ActiveSession>,
    local_stream: Option<Arc<MediaStream>>,
    remote: Arc<RemoteStream>,
    timer: DurationTimer,
    started_at: Option<DateTime<Utc>>,
    error: Option<String>,
    needs_playback_unlock: bool,
    selection: DeviceSelection,
    device_test: Option<DeviceTest>,
    device_test_generation: u64,
}

impl Core {
    fn new(preferences: Preferences) -> Self {
        Self {
            state: CallState::Idle,
            registered: false,
            closed: false,
            registration_epoch: 0,
            epoch: 0,
            setup_in_progress: false,
            preferences,
            session: None,
            local_stream: None,
            remote: Arc::new(RemoteStream::new()),
            timer: DurationTimer::new(),
            started_at: None,
            error: None,
            needs_playback_unlock: false,
            selection: DeviceSelection::default(),
            device_test: None,
            device_test_generation: 0,
        }
    }

    fn current(&self, session_id: &str) -> Option<&ActiveSession> {
        self.session.as_ref().filter(|s| s.id == session_id)
    }

    fn busy(&self) -> bool {
        self.session.is_some() || self.setup_in_progress
    }

    fn call_constraints(&self) -> StreamConstraints {
        StreamConstraints::with_devices(
            self.selection.camera_id.clone(),
            self.selection.microphone_id.clone(),
        )
    }
}

struct Inner {
    config: CallConfig,
    identity: SipUri,
    devices: DeviceManager,
    agent: Arc<dyn SipUserAgent>,
    sinks: SinkBinder,
    store: Arc<dyn PreferenceStore>,
    event_tx: broadcast::Sender<CallEvent>,
    core: Mutex<Core>,
}

// ============================================================================
// SESSION CONTROLLER
// ============================================================================

/// Call session controller; clones share the same session
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    /// Validates the config and loads the persisted preferences
    pub fn new(
        config: CallConfig,
        devices: Arc<dyn MediaDevices>,
        agent: Arc<dyn SipUserAgent>,
        sink: Arc<dyn MediaSink>,
        store: Arc<dyn PreferenceStore>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let preferences = store.load()?;
        tracing::debug!("Loaded preferences: {:?}", preferences);

        let (event_tx, _) = broadcast::channel(100);
        Ok(Self {
            inner: Arc::new(Inner {
                identity: config.sip.identity(),
                sinks: SinkBinder::new(sink, config.sink_retry),
                config,
                devices: DeviceManager::new(devices),
                agent,
                store,
                event_tx,
                core: Mutex::new(Core::new(preferences)),
            }),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn config(&self) -> &CallConfig {
        &self.inner.config
    }

    pub fn identity(&self) -> &SipUri {
        &self.inner.identity
    }

    pub fn state(&self) -> CallState {
        self.inner.core.lock().state
    }

    pub fn preferences(&self) -> Preferences {
        self.inner.core.lock().preferences
    }

    pub fn duration(&self) -> u64 {
        self.inner.core.lock().timer.seconds()
    }

    pub fn local_stream(&self) -> Option<Arc<MediaStream>> {
        self.inner.core.lock().local_stream.clone()
    }

    pub fn remote_stream(&self) -> Arc<RemoteStream> {
        Arc::clone(&self.inner.core.lock().remote)
    }

    pub fn snapshot(&self) -> CallSnapshot {
        let core = self.inner.core.lock();
        let duration = core.timer.seconds();
        CallSnapshot {
            state: core.state,
            registered: core.registered,
            direction: core.session.as_ref().map(|s| s.direction),
            peer: core.session.as_ref().map(|s| s.peer.clone()),
            started_at: core.started_at,
            duration,
            duration_label: format_duration(duration),
            muted: core.preferences.muted,
            camera_disabled: core.preferences.camera_disabled,
            has_local_stream: core
                .local_stream
                .as_ref()
                .map_or(false, |s| !s.is_released()),
            remote_track_count: core.remote.track_count(),
            error: core.error.clone(),
            needs_playback_unlock: core.needs_playback_unlock,
            device_test_open: core.device_test.is_some(),
        }
    }

    pub fn clear_error(&self) {
        self.inner.core.lock().error = None;
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    /// Opens the transport and registers the configured account
    pub async fn register(&self) -> Result<(), SessionError> {
        let epoch = {
            let mut core = self.inner.core.lock();
            if !core.state.can_register() {
                return Err(SessionError::InvalidState {
                    action: "register",
                    state: core.state,
                });
            }
            core.closed = false;
            core.registered = false;
            core.error = None;
            core.registration_epoch += 1;
            self.transition(&mut core, CallState::Registering);
            core.registration_epoch
        };

        let account = &self.inner.config.sip;
        tracing::info!("Registering {} via {}", self.inner.identity, account.server);
        let result = self
            .inner
            .agent
            .register(account, &self.inner.config.ice_servers)
            .await;

        let mut core = self.inner.core.lock();
        if core.registration_epoch != epoch || core.state != CallState::Registering {
            tracing::debug!("Ignoring stale registration result");
            return Ok(());
        }
        match result {
            Ok(()) => {
                core.registered = true;
                self.transition(&mut core, CallState::Registered);
                Ok(())
            }
            Err(e) => {
                let error = SessionError::Registration(e);
                self.transition(&mut core, CallState::Failed);
                self.surface_error(&mut core, error.to_string());
                Err(error)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    /// Parses a call target and refuses our own identity. Touches nothing.
    pub fn validate_target(&self, target: &str) -> Result<SipUri, SessionError> {
        let uri = SipUri::parse(target, &self.inner.config.sip.realm)
            .ok_or_else(|| SessionError::InvalidTarget(target.to_string()))?;
        if uri.same_identity(&self.inner.identity) {
            return Err(SessionError::SelfCall(uri));
        }
        Ok(uri)
    }

    /// Places an outbound call: acquire media, add tracks, send the invite
    pub async fn call(&self, target: &str) -> Result<(), SessionError> {
        let target = self.validate_target(target)?;

        let (epoch, constraints) = {
            let mut core = self.inner.core.lock();
            if core.busy() {
                return Err(SessionError::AlreadyInCall);
            }
            if !core.registered {
                return Err(SessionError::NotRegistered);
            }
            core.setup_in_progress = true;
            core.error = None;
            self.close_device_test_locked(&mut core);
            if let Some(stale) = core.local_stream.take() {
                stale.release();
            }
            self.reset_call_audio(&mut core);
            (core.epoch, core.call_constraints())
        };

        tracing::info!("Calling {}", target);
        let stream = match self.inner.devices.acquire_stream(&constraints).await {
            Ok(stream) => Arc::new(stream),
            Err(e) => {
                self.abort_outbound_setup(epoch, e.to_string());
                return Err(e.into());
            }
        };

        {
            let core = self.inner.core.lock();
            if core.epoch != epoch {
                stream.release();
                tracing::info!("Call to {} cancelled during media setup", target);
                return Err(SessionError::Cancelled);
            }
            apply_to_tracks(stream.tracks(), core.preferences);
        }

        let session = match self.prepare_outbound(&target, &stream) {
            Ok(session) => session,
            Err(e) => {
                stream.release();
                self.abort_outbound_setup(epoch, e.to_string());
                return Err(e);
            }
        };

        let session_id = session.id.clone();
        let handle = Arc::clone(&session.handle);
        {
            let mut core = self.inner.core.lock();
            if core.epoch != epoch {
                stream.release();
                tracing::info!("Call to {} cancelled during setup", target);
                return Err(SessionError::Cancelled);
            }
            core.setup_in_progress = false;
            core.local_stream = Some(Arc::clone(&stream));
            core.session = Some(session);
            self.transition(&mut core, CallState::Negotiating);
        }
        self.bind_sink(SinkId::LocalPreview, SinkSource::Local(stream), false, epoch);

        if let Err(e) = handle.invite().await {
            tracing::warn!("Invite to {} failed: {}", target, e);
            let mut core = self.inner.core.lock();
            if core.current(&session_id).is_none() {
                return Ok(());
            }
            let error = SessionError::Negotiation(e.to_string());
            self.teardown(&mut core);
            self.transition(&mut core, CallState::Registered);
            self.surface_error(&mut core, error.to_string());
            return Err(error);
        }
        Ok(())
    }

    fn prepare_outbound(
        &self,
        target: &SipUri,
        stream: &MediaStream,
    ) -> Result<ActiveSession, SessionError> {
        let handle = self
            .inner
            .agent
            .create_inviter(target, MediaOffer::AUDIO_VIDEO)
            .map_err(|e| SessionError::Negotiation(e.to_string()))?;
        let session = ActiveSession::new(handle);
        Self::wire_local_tracks(&session, stream)?;
        Ok(session)
    }

    fn abort_outbound_setup(&self, epoch: u64, message: String) {
        let mut core = self.inner.core.lock();
        if core.epoch == epoch {
            core.setup_in_progress = false;
            self.surface_error(&mut core, message);
        }
    }

    /// Local tracks must be on the peer connection before invite/accept
    fn wire_local_tracks(session: &ActiveSession, stream: &MediaStream) -> Result<(), SessionError> {
        let pc = session
            .pc
            .as_ref()
            .ok_or_else(|| SessionError::Negotiation("session has no peer connection".to_string()))?;
        for track in stream.tracks() {
            pc.add_track(Arc::clone(track), stream.id())
                .map_err(|e| SessionError::Negotiation(e.to_string()))?;
        }
        tracing::debug!("Added {} local track(s) to session {}", stream.track_count(), session.id);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    /// Accepts the ringing invitation
    pub async fn answer(&self) -> Result<(), SessionError> {
        let session_id = {
            let mut core = self.inner.core.lock();
            let id = match (&core.session, core.state) {
                (Some(session), CallState::Ringing) => session.id.clone(),
                _ => return Err(SessionError::NoActiveCall),
            };
            self.transition(&mut core, CallState::Negotiating);
            id
        };
        self.accept_inbound(&session_id).await
    }

    /// Refuses the ringing invitation
    pub async fn reject(&self) -> Result<(), SessionError> {
        let session = {
            let mut core = self.inner.core.lock();
            if core.state != CallState::Ringing {
                return Err(SessionError::NoActiveCall);
            }
            let session = self.teardown(&mut core);
            let fallback = if core.registered {
                CallState::Registered
            } else {
                CallState::Idle
            };
            self.transition(&mut core, fallback);
            session
        };
        if let Some(session) = session {
            tracing::info!("Rejecting call from {}", session.peer);
            if let Err(e) = session.handle.reject().await {
                tracing::warn!("Failed to reject invitation: {}", e);
            }
        }
        Ok(())
    }

    async fn on_incoming(&self, handle: Arc<dyn SipSession>) -> Result<(), SessionError> {
        let auto_answer = self.inner.config.auto_answer;
        let accepted = {
            let mut core = self.inner.core.lock();
            let ready = matches!(
                core.state,
                CallState::Idle | CallState::Registered | CallState::Terminated
            );
            if core.busy() || !ready {
                false
            } else {
                core.error = None;
                self.close_device_test_locked(&mut core);
                let session = ActiveSession::new(Arc::clone(&handle));
                tracing::info!("Incoming call from {}", session.peer);
                core.session = Some(session);
                let next = if auto_answer {
                    CallState::Negotiating
                } else {
                    CallState::Ringing
                };
                self.transition(&mut core, next);
                true
            }
        };

        if !accepted {
            tracing::warn!("Busy, rejecting invitation from {}", handle.remote_identity());
            if let Err(e) = handle.reject().await {
                tracing::warn!("Failed to reject invitation: {}", e);
            }
            return Ok(());
        }
        if auto_answer {
            self.accept_inbound(&handle.id()).await
        } else {
            Ok(())
        }
    }

    async fn accept_inbound(&self, session_id: &str) -> Result<(), SessionError> {
        let (epoch, constraints, handle) = {
            let mut core = self.inner.core.lock();
            let handle = match core.current(session_id) {
                Some(session) => Arc::clone(&session.handle),
                None => return Err(SessionError::NoActiveCall),
            };
            if let Some(stale) = core.local_stream.take() {
                stale.release();
            }
            self.reset_call_audio(&mut core);
            (core.epoch, core.call_constraints(), handle)
        };

        let stream = match self.inner.devices.acquire_stream(&constraints).await {
            Ok(stream) => Arc::new(stream),
            Err(e) => {
                self.abort_inbound(session_id, epoch, e.to_string()).await;
                return Err(e.into());
            }
        };

        let wired = {
            let mut core = self.inner.core.lock();
            if core.epoch != epoch {
                stream.release();
                return Err(SessionError::Cancelled);
            }
            apply_to_tracks(stream.tracks(), core.preferences);
            core.local_stream = Some(Arc::clone(&stream));
            match core.current(session_id) {
                Some(session) => Self::wire_local_tracks(session, &stream),
                None => Err(SessionError::NoActiveCall),
            }
        };
        if let Err(e) = wired {
            self.abort_inbound(session_id, epoch, e.to_string()).await;
            return Err(e);
        }
        self.bind_sink(
            SinkId::LocalPreview,
            SinkSource::Local(Arc::clone(&stream)),
            false,
            epoch,
        );

        if let Err(e) = handle.accept(MediaOffer::AUDIO_VIDEO).await {
            tracing::warn!("Accepting invitation failed: {}", e);
            let error = SessionError::Negotiation(e.to_string());
            self.abort_inbound(session_id, epoch, error.to_string()).await;
            return Err(error);
        }
        tracing::info!("Accepted invitation {}", session_id);
        Ok(())
    }

    async fn abort_inbound(&self, session_id: &str, epoch: u64, message: String) {
        let session = {
            let mut core = self.inner.core.lock();
            if core.epoch != epoch || core.current(session_id).is_none() {
                return;
            }
            let session = self.teardown(&mut core);
            self.transition(&mut core, CallState::Failed);
            self.surface_error(&mut core, message);
            session
        };
        if let Some(session) = session {
            if let Err(e) = session.handle.reject().await {
                tracing::debug!("Reject after failed accept: {}", e);
            }
        }
    }

    // ------------------------------------------------------------------------
    // User agent notifications
    // ------------------------------------------------------------------------

    /// Feeds one user agent notification into the state machine
    pub async fn handle_event(&self, event: UserAgentEvent) -> Result<(), SessionError> {
        if self.inner.core.lock().closed {
            tracing::debug!("Controller shut down, ignoring {:?}", event);
            return Ok(());
        }
        match event {
            UserAgentEvent::IncomingInvite(session) => self.on_incoming(session).await,
            UserAgentEvent::SessionState { session_id, state } => {
                match state {
                    TransportState::Established => self.on_established(&session_id),
                    TransportState::Terminated => self.on_terminated(&session_id),
                    other => tracing::debug!("Session {} is {:?}", session_id, other),
                }
                Ok(())
            }
            UserAgentEvent::RemoteTrack { session_id, track } => {
                self.on_remote_track(&session_id, track);
                Ok(())
            }
            UserAgentEvent::TransportClosed => {
                self.on_transport_closed();
                Ok(())
            }
        }
    }

    /// Drives `handle_event` from a channel until the sender goes away
    pub fn spawn_event_pump(&self, mut events: mpsc::UnboundedReceiver<UserAgentEvent>) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Err(e) = controller.handle_event(event).await {
                    tracing::warn!("User agent event failed: {}", e);
                }
            }
            tracing::debug!("User agent event channel closed");
        })
    }

    fn on_established(&self, session_id: &str) {
        let (pc, local, remote, epoch) = {
            let mut core = self.inner.core.lock();
            let pc = match core.current(session_id) {
                Some(session) => session.pc.clone(),
                None => {
                    tracing::debug!("Ignoring established for unknown session {}", session_id);
                    return;
                }
            };
            if core.state != CallState::Negotiating {
                tracing::debug!("Ignoring established while {}", core.state);
                return;
            }
            self.transition(&mut core, CallState::Established);
            core.started_at = Some(Utc::now());
            let tx = self.inner.event_tx.clone();
            core.timer.start(move |seconds| {
                let _ = tx.send(CallEvent::DurationTick(seconds));
            });
            (
                pc,
                core.local_stream.clone(),
                Arc::clone(&core.remote),
                core.epoch,
            )
        };

        if let Some(local) = local {
            self.bind_sink(SinkId::LocalInCall, SinkSource::Local(local), true, epoch);
        }

        // Receivers whose track events were missed
        if let Some(pc) = pc {
            for track in pc.receivers() {
                self.add_remote_track(&remote, track);
            }
        }
        if !remote.is_empty() {
            self.bind_sink(SinkId::Remote, SinkSource::Remote(remote), true, epoch);
        }
    }

    fn on_remote_track(&self, session_id: &str, track: TrackRef) {
        let (remote, epoch) = {
            let core = self.inner.core.lock();
            if core.current(session_id).is_none() {
                tracing::debug!("Ignoring track for unknown session {}", session_id);
                return;
            }
            (Arc::clone(&core.remote), core.epoch)
        };
        if self.add_remote_track(&remote, track) {
            self.bind_sink(SinkId::Remote, SinkSource::Remote(remote), true, epoch);
        }
    }

    fn add_remote_track(&self, remote: &RemoteStream, track: TrackRef) -> bool {
        let kind = track.kind();
        if !remote.add_track(track) {
            return false;
        }
        self.emit(CallEvent::RemoteTrackAdded {
            kind,
            total: remote.track_count(),
        });
        true
    }

    fn on_terminated(&self, session_id: &str) {
        let mut core = self.inner.core.lock();
        let direction = match core.current(session_id) {
            Some(session) => session.direction,
            None => {
                tracing::debug!("Ignoring termination of unknown session {}", session_id);
                return;
            }
        };
        let was = core.state;
        self.teardown(&mut core);

        if was == CallState::Negotiating && direction == Direction::Outbound {
            let error = SessionError::Negotiation("call ended before it was answered".to_string());
            self.transition(&mut core, CallState::Registered);
            self.surface_error(&mut core, error.to_string());
        } else {
            tracing::info!("Remote party ended the call");
            self.transition(&mut core, CallState::Terminated);
        }
    }

    fn on_transport_closed(&self) {
        let mut core = self.inner.core.lock();
        if core.state == CallState::Idle {
            return;
        }
        tracing::warn!("Signaling transport closed");
        core.registration_epoch += 1;
        core.registered = false;
        self.teardown(&mut core);
        self.transition(&mut core, CallState::Failed);
        let error = SessionError::Registration(SignalingError::Closed);
        self.surface_error(&mut core, error.to_string());
    }

    // ------------------------------------------------------------------------
    // Hangup / shutdown
    // ------------------------------------------------------------------------

    /// Ends whatever is in progress; terminal states are left alone
    pub async fn hangup(&self) -> Result<(), SessionError> {
        let (session, was) = {
            let mut core = self.inner.core.lock();
            if core.state.is_terminal() && !core.busy() {
                return Ok(());
            }
            let was = core.state;
            if was == CallState::Registering {
                core.registration_epoch += 1;
            }
            let session = self.teardown(&mut core);
            self.transition(&mut core, CallState::Terminated);
            (session, was)
        };
        if let Some(session) = session {
            tracing::info!("Hanging up call with {}", session.peer);
            Self::end_remote(&session, was).await;
        }
        Ok(())
    }

    /// Modal closed or page left: hang up, unregister, stop the agent
    pub async fn shutdown(&self) {
        let (session, was, registered) = {
            let mut core = self.inner.core.lock();
            core.closed = true;
            core.registration_epoch += 1;
            let was = core.state;
            let session = self.teardown(&mut core);
            self.close_device_test_locked(&mut core);
            // The render surfaces go away with the controller
            self.inner.sinks.detach_all();
            let registered = std::mem::replace(&mut core.registered, false);
            self.transition(&mut core, CallState::Idle);
            (session, was, registered)
        };
        if let Some(session) = session {
            Self::end_remote(&session, was).await;
        }
        if registered {
            if let Err(e) = self.inner.agent.unregister().await {
                tracing::warn!("Unregister failed: {}", e);
            }
        }
        self.inner.agent.stop().await;
        tracing::info!("Session controller shut down");
    }

    async fn end_remote(session: &ActiveSession, was: CallState) {
        let result = match (was, session.direction) {
            (CallState::Ringing, _) => session.handle.reject().await,
            (CallState::Negotiating, Direction::Outbound) => session.handle.cancel().await,
            _ => session.handle.bye().await,
        };
        if let Err(e) = result {
            tracing::warn!("Ending session {} failed: {}", session.id, e);
        }
    }

    /// Releases everything the current session owns. Safe to repeat.
    fn teardown(&self, core: &mut Core) -> Option<ActiveSession> {
        core.epoch += 1;
        core.setup_in_progress = false;
        core.timer.stop();
        core.started_at = None;
        if let Some(stream) = core.local_stream.take() {
            stream.release();
        }
        core.remote.clear();
        core.remote = Arc::new(RemoteStream::new());
        for sink in [SinkId::LocalPreview, SinkId::LocalInCall, SinkId::Remote] {
            self.inner.sinks.detach(sink);
        }
        if std::mem::replace(&mut core.needs_playback_unlock, false) {
            self.emit(CallEvent::PlaybackUnlock(false));
        }
        core.session.take()
    }

    // ------------------------------------------------------------------------
    // Preferences
    // ------------------------------------------------------------------------

    /// Flips `muted`, persists it and applies it to local tracks and senders
    pub fn toggle_mute(&self) -> Result<bool, SessionError> {
        let next = self.update_preferences(|p| p.muted = !p.muted)?;
        tracing::info!("Microphone {}", if next.muted { "muted" } else { "unmuted" });
        Ok(next.muted)
    }

    /// Flips `camera_disabled`, persists it and applies it like `toggle_mute`
    pub fn toggle_camera(&self) -> Result<bool, SessionError> {
        let next = self.update_preferences(|p| p.camera_disabled = !p.camera_disabled)?;
        tracing::info!("Camera {}", if next.camera_disabled { "off" } else { "on" });
        Ok(next.camera_disabled)
    }

    fn update_preferences(&self, change: impl FnOnce(&mut Preferences)) -> Result<Preferences, SessionError> {
        let mut core = self.inner.core.lock();
        let mut next = core.preferences;
        change(&mut next);
        self.inner.store.save(&next)?;
        core.preferences = next;
        Self::apply_preferences_locked(&core);
        self.emit(CallEvent::PreferencesChanged(next));
        Ok(next)
    }

    fn apply_preferences_locked(core: &Core) {
        if let Some(stream) = &core.local_stream {
            apply_to_tracks(stream.tracks(), core.preferences);
        }
        if let Some(pc) = core.session.as_ref().and_then(|s| s.pc.as_ref()) {
            apply_to_tracks(&pc.senders(), core.preferences);
        }
        if let Some(stream) = core.device_test.as_ref().and_then(|t| t.stream.as_ref()) {
            apply_to_tracks(stream.tracks(), core.preferences);
        }
    }

    /// Call audio never starts muted because of an earlier session
    fn reset_call_audio(&self, core: &mut Core) {
        if !core.preferences.muted {
            return;
        }
        let next = Preferences {
            muted: false,
            ..core.preferences
        };
        core.preferences = next;
        self.emit(CallEvent::PreferencesChanged(next));
        if let Err(e) = self.inner.store.save(&next) {
            tracing::warn!("Failed to persist unmute at call start: {}", e);
            self.surface_error(core, SessionError::from(e).to_string());
        }
    }

    // ------------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------------

    /// User gesture: retry playback and resume suspended level analysis
    pub fn unlock_playback(&self) -> Result<(), SessionError> {
        let (remote, local, monitor) = {
            let core = self.inner.core.lock();
            let local = match core.state {
                CallState::Established => core.local_stream.clone(),
                _ => None,
            };
            let monitor = core.device_test.as_ref().and_then(|t| t.monitor.clone());
            (Arc::clone(&core.remote), local, monitor)
        };

        let mut blocked = None;
        let mut targets = Vec::new();
        if !remote.is_empty() {
            targets.push((SinkId::Remote, SinkSource::Remote(remote)));
        }
        if let Some(local) = local {
            targets.push((SinkId::LocalInCall, SinkSource::Local(local)));
        }
        for (sink, source) in targets {
            let played = self
                .inner
                .sinks
                .try_bind(sink, &source)
                .and_then(|_| self.inner.sinks.play(sink));
            if let Err(e) = played {
                blocked = Some(e);
            }
        }
        if let Some(monitor) = monitor {
            monitor.resume()?;
        }

        let mut core = self.inner.core.lock();
        match blocked {
            Some(e) => {
                tracing::warn!("Playback still blocked: {}", e);
                core.needs_playback_unlock = true;
                Err(SessionError::PlaybackBlocked(e))
            }
            None => {
                if std::mem::replace(&mut core.needs_playback_unlock, false) {
                    tracing::info!("Playback unlocked");
                    self.emit(CallEvent::PlaybackUnlock(false));
                }
                Ok(())
            }
        }
    }

    /// Attaches now, or retries in the background while the sink mounts
    fn bind_sink(&self, sink: SinkId, source: SinkSource, play: bool, epoch: u64) {
        match self.inner.sinks.try_bind(sink, &source) {
            Ok(_) => {
                if play {
                    self.play_sink(sink, epoch);
                }
            }
            Err(SinkError::NotReady(_)) => {
                let controller = self.clone();
                tokio::spawn(async move {
                    let still_wanted = || controller.inner.core.lock().epoch == epoch;
                    let bound = controller
                        .inner
                        .sinks
                        .bind_with_retry(sink, source, still_wanted)
                        .await;
                    match bound {
                        Ok(true) if play => controller.play_sink(sink, epoch),
                        Ok(_) => {}
                        Err(e) => controller.playback_blocked(e, epoch),
                    }
                });
            }
            Err(e) => self.playback_blocked(e, epoch),
        }
    }

    fn play_sink(&self, sink: SinkId, epoch: u64) {
        if let Err(e) = self.inner.sinks.play(sink) {
            self.playback_blocked(e, epoch);
        }
    }

    fn playback_blocked(&self, error: SinkError, epoch: u64) {
        let mut core = self.inner.core.lock();
        if core.epoch != epoch {
            return;
        }
        tracing::warn!("Playback blocked: {}", error);
        let first = !std::mem::replace(&mut core.needs_playback_unlock, true);
        self.surface_error(&mut core, SessionError::PlaybackBlocked(error).to_string());
        if first {
            self.emit(CallEvent::PlaybackUnlock(true));
        }
    }

    // ------------------------------------------------------------------------
    // Device test
    // ------------------------------------------------------------------------

    /// Opens the test dialog and lists devices, probing for labels if needed
    pub async fn open_device_test(&self) -> Result<DeviceSet, SessionError> {
        {
            let mut core = self.inner.core.lock();
            if core.busy() {
                return Err(SessionError::AlreadyInCall);
            }
            if core.device_test.is_none() {
                core.device_test_generation += 1;
                core.device_test = Some(DeviceTest {
                    selection: core.selection.clone(),
                    ..DeviceTest::default()
                });
            }
        }

        let devices = match self.inner.devices.list_devices().await {
            Err(MediaError::LabelsUnavailable) => {
                tracing::debug!("Device labels hidden, probing with a short-lived stream");
                let probe = self
                    .inner
                    .devices
                    .acquire_stream(&StreamConstraints::call())
                    .await?;
                probe.release();
                self.inner.devices.list_devices().await?
            }
            other => other?,
        };

        let mut core = self.inner.core.lock();
        if let Some(test) = core.device_test.as_mut() {
            let selection = &mut test.selection;
            if selection.camera_id.is_none() {
                selection.camera_id = devices.cameras.first().map(|d| d.id.clone());
            }
            if selection.microphone_id.is_none() {
                selection.microphone_id = devices.microphones.first().map(|d| d.id.clone());
            }
        }
        Ok(devices)
    }

    /// Switches the test preview to the given devices and monitors the mic
    pub async fn select_test_devices(
        &self,
        camera_id: Option<String>,
        microphone_id: Option<String>,
    ) -> Result<LevelMonitor, SessionError> {
        let generation = {
            let mut core = self.inner.core.lock();
            if core.busy() {
                return Err(SessionError::AlreadyInCall);
            }
            let test = core
                .device_test
                .as_mut()
                .ok_or(SessionError::DeviceTestClosed)?;
            test.stop();
            test.selection = DeviceSelection {
                camera_id: camera_id.clone(),
                microphone_id: microphone_id.clone(),
            };
            core.device_test_generation += 1;
            core.device_test_generation
        };

        let constraints = StreamConstraints::with_devices(camera_id, microphone_id);
        let stream = Arc::new(self.inner.devices.acquire_stream(&constraints).await?);

        let (monitor, epoch) = {
            let mut core = self.inner.core.lock();
            if core.device_test_generation != generation || core.busy() {
                stream.release();
                return Err(SessionError::DeviceTestClosed);
            }
            // Test streams follow the stored preference, including `muted`
            self.inner.devices.apply_preferences(&stream, core.preferences);
            let monitor = match self.inner.devices.monitor_input_level(&stream) {
                Ok(monitor) => monitor,
                Err(e) => {
                    stream.release();
                    return Err(e.into());
                }
            };
            let epoch = core.epoch;
            if let Some(test) = core.device_test.as_mut() {
                test.stream = Some(Arc::clone(&stream));
                test.monitor = Some(monitor.handle());
            }
            (monitor, epoch)
        };
        self.bind_sink(SinkId::DeviceTest, SinkSource::Local(stream), true, epoch);
        Ok(monitor)
    }

    /// Keeps the tested devices for later calls and closes the dialog
    pub fn apply_device_test(&self) -> Result<(), SessionError> {
        let mut core = self.inner.core.lock();
        let selection = core
            .device_test
            .as_ref()
            .map(|t| t.selection.clone())
            .ok_or(SessionError::DeviceTestClosed)?;
        tracing::info!(
            "Using camera {:?} and microphone {:?} for calls",
            selection.camera_id,
            selection.microphone_id
        );
        core.selection = selection;
        self.close_device_test_locked(&mut core);
        Ok(())
    }

    pub fn close_device_test(&self) {
        let mut core = self.inner.core.lock();
        self.close_device_test_locked(&mut core);
    }

    fn close_device_test_locked(&self, core: &mut Core) {
        if let Some(mut test) = core.device_test.take() {
            test.stop();
            core.device_test_generation += 1;
            self.inner.sinks.detach(SinkId::DeviceTest);
            tracing::debug!("Device test closed");
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn emit(&self, event: CallEvent) {
        let _ = self.inner.event_tx.send(event);
    }

    fn transition(&self, core: &mut Core, to: CallState) {
        let from = core.state;
        if from == to {
            return;
        }
        core.state = to;
        tracing::info!("Call state: {} -> {}", from, to);
        self.emit(CallEvent::StateChanged { from, to });
    }

    fn surface_error(&self, core: &mut Core, message: String) {
        tracing::error!("{}", message);
        core.error = Some(message.clone());
        self.emit(CallEvent::Error(message));
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("SessionController")
            .field("identity", &self.inner.identity)
            .field("state", &core.state)
            .field("session", &core.session.as_ref().map(|s| s.id.clone()))
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
