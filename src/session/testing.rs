//! In-memory hosts for tests
//!
//! Every host seam has a fake here that records what the controller asked
//! of it and can be told to fail.

use super::host::{
    Direction, MediaOffer, MediaSink, PeerConnection, SignalingError, SinkError, SinkId, SinkSource,
    SipSession, SipUserAgent,
};
use super::identity::SipUri;
use crate::config::{IceServer, SipAccountConfig};
use crate::media::{
    AudioAnalyser, DeviceInfo, DeviceKind, MediaDevices, MediaError, MediaStream, MediaTrack,
    StreamConstraints, TrackKind, TrackRef,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

// ============================================================================
// TRACKS
// ============================================================================

#[derive(Debug)]
pub struct FakeTrack {
    id: String,
    kind: TrackKind,
    label: String,
    enabled: AtomicBool,
    stops: AtomicUsize,
}

impl FakeTrack {
    pub fn new(kind: TrackKind, label: &str) -> Arc<Self> {
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            label: label.to_string(),
            enabled: AtomicBool::new(true),
            stops: AtomicUsize::new(0),
        })
    }

    pub fn audio(label: &str) -> Arc<Self> {
        Self::new(TrackKind::Audio, label)
    }

    pub fn video(label: &str) -> Arc<Self> {
        Self::new(TrackKind::Video, label)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stop_count() > 0
    }
}

// ============================================================================
// MEDIA DEVICES
// ============================================================================

pub struct FakeAnalyser {
    bins: Vec<u8>,
    closed: Arc<AtomicUsize>,
    resumed: Arc<AtomicUsize>,
}

impl FakeAnalyser {
    pub fn new(bins: Vec<u8>) -> Self {
        Self {
            bins,
            closed: Arc::new(AtomicUsize::new(0)),
            resumed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of `close()` calls
    pub fn closed_flag(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closed)
    }

    pub fn resumed_flag(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.resumed)
    }
}

impl AudioAnalyser for FakeAnalyser {
    fn frequency_bin_count(&self) -> usize {
        self.bins.len()
    }

    fn byte_frequency_data(&mut self, bins: &mut [u8]) {
        for (dst, src) in bins.iter_mut().zip(&self.bins) {
            *dst = *src;
        }
    }

    fn resume(&mut self) -> Result<(), MediaError> {
        self.resumed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeDevices {
    devices: Mutex<Vec<DeviceInfo>>,
    hide_labels: AtomicBool,
    acquires: AtomicUsize,
    fail_next: Mutex<Option<MediaError>>,
    issued: Mutex<Vec<Arc<FakeTrack>>>,
    requests: Mutex<Vec<StreamConstraints>>,
    analyser_resumes: Mutex<Vec<Arc<AtomicUsize>>>,
    acquire_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeDevices {
    /// One labelled camera and one labelled microphone
    pub fn new() -> Arc<Self> {
        Self::with_devices(vec![
            DeviceInfo {
                id: "cam-1".to_string(),
                label: "Integrated Camera".to_string(),
                kind: DeviceKind::VideoInput,
            },
            DeviceInfo {
                id: "mic-1".to_string(),
                label: "USB Microphone".to_string(),
                kind: DeviceKind::AudioInput,
            },
        ])
    }

    pub fn with_devices(devices: Vec<DeviceInfo>) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(devices),
            hide_labels: AtomicBool::new(false),
            acquires: AtomicUsize::new(0),
            fail_next: Mutex::new(None),
            issued: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            analyser_resumes: Mutex::new(Vec::new()),
            acquire_gate: Mutex::new(None),
        })
    }

    pub fn add_device(&self, device: DeviceInfo) {
        self.devices.lock().push(device);
    }

    /// Blank labels until the next successful acquisition
    pub fn hide_labels(&self, hide: bool) {
        self.hide_labels.store(hide, Ordering::SeqCst);
    }

    pub fn acquire_count(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    /// Holds the next `get_user_media()` until the returned gate is notified
    pub fn hold_acquire(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.acquire_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub fn fail_next_acquire(&self, error: MediaError) {
        *self.fail_next.lock() = Some(error);
    }

    /// Every track handed out so far, oldest first
    pub fn issued_tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.issued.lock().clone()
    }

    pub fn last_request(&self) -> Option<StreamConstraints> {
        self.requests.lock().last().cloned()
    }

    pub fn analyser_resume_count(&self) -> usize {
        self.analyser_resumes
            .lock()
            .iter()
            .map(|r| r.load(Ordering::SeqCst))
            .sum()
    }

    fn pick(&self, kind: DeviceKind, wanted: Option<&str>) -> Result<Option<DeviceInfo>, MediaError> {
        let devices = self.devices.lock();
        let mut candidates = devices.iter().filter(|d| d.kind == kind);
        match wanted {
            Some(id) => candidates
                .find(|d| d.id == id)
                .cloned()
                .map(Some)
                .ok_or_else(|| MediaError::DeviceUnavailable(id.to_string())),
            None => Ok(candidates.next().cloned()),
        }
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, MediaError> {
        let hide = self.hide_labels.load(Ordering::SeqCst);
        Ok(self
            .devices
            .lock()
            .iter()
            .cloned()
            .map(|mut d| {
                if hide {
                    d.label.clear();
                }
                d
            })
            .collect())
    }

    async fn get_user_media(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<Vec<TrackRef>, MediaError> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(constraints.clone());
        let gate = self.acquire_gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(error) = self.fail_next.lock().take() {
            return Err(error);
        }

        let mut tracks = Vec::new();
        if constraints.audio {
            if let Some(mic) = self.pick(DeviceKind::AudioInput, constraints.microphone_id.as_deref())? {
                tracks.push(FakeTrack::audio(&mic.label));
            }
        }
        if constraints.video {
            if let Some(cam) = self.pick(DeviceKind::VideoInput, constraints.camera_id.as_deref())? {
                tracks.push(FakeTrack::video(&cam.label));
            }
        }

        self.hide_labels.store(false, Ordering::SeqCst);
        self.issued.lock().extend(tracks.iter().cloned());
        Ok(tracks.into_iter().map(|t| t as TrackRef).collect())
    }

    fn create_analyser(&self, _stream: &MediaStream) -> Result<Box<dyn AudioAnalyser>, MediaError> {
        let analyser = FakeAnalyser::new(vec![64; 128]);
        self.analyser_resumes.lock().push(analyser.resumed_flag());
        Ok(Box::new(analyser))
    }
}

// ============================================================================
// SIGNALING
// ============================================================================

#[derive(Default)]
pub struct FakePeerConnection {
    senders: Mutex<Vec<TrackRef>>,
    receivers: Mutex<Vec<TrackRef>>,
}

impl FakePeerConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_receiver(&self, track: TrackRef) {
        self.receivers.lock().push(track);
    }

    pub fn sender_tracks(&self) -> Vec<TrackRef> {
        self.senders.lock().clone()
    }
}

impl PeerConnection for FakePeerConnection {
    fn add_track(&self, track: TrackRef, _stream_id: &str) -> Result<(), SignalingError> {
        self.senders.lock().push(track);
        Ok(())
    }

    fn senders(&self) -> Vec<TrackRef> {
        self.senders.lock().clone()
    }

    fn receivers(&self) -> Vec<TrackRef> {
        self.receivers.lock().clone()
    }
}

pub struct FakeSession {
    id: String,
    direction: Direction,
    remote: SipUri,
    pc: Arc<FakePeerConnection>,
    invites: AtomicUsize,
    senders_at_invite: AtomicUsize,
    accepted: Mutex<Vec<MediaOffer>>,
    rejects: AtomicUsize,
    cancels: AtomicUsize,
    byes: AtomicUsize,
    fail_invite: Mutex<Option<SignalingError>>,
    fail_accept: Mutex<Option<SignalingError>>,
}

impl FakeSession {
    fn new(direction: Direction, remote: SipUri) -> Arc<Self> {
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            direction,
            remote,
            pc: FakePeerConnection::new(),
            invites: AtomicUsize::new(0),
            senders_at_invite: AtomicUsize::new(0),
            accepted: Mutex::new(Vec::new()),
            rejects: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            byes: AtomicUsize::new(0),
            fail_invite: Mutex::new(None),
            fail_accept: Mutex::new(None),
        })
    }

    pub fn outbound(remote: SipUri) -> Arc<Self> {
        Self::new(Direction::Outbound, remote)
    }

    pub fn inbound(remote: SipUri) -> Arc<Self> {
        Self::new(Direction::Inbound, remote)
    }

    pub fn session_id(&self) -> String {
        self.id.clone()
    }

    pub fn pc(&self) -> Arc<FakePeerConnection> {
        Arc::clone(&self.pc)
    }

    pub fn invite_count(&self) -> usize {
        self.invites.load(Ordering::SeqCst)
    }

    /// Number of local tracks already added when the invite went out
    pub fn senders_at_invite(&self) -> usize {
        self.senders_at_invite.load(Ordering::SeqCst)
    }

    pub fn accepted_offers(&self) -> Vec<MediaOffer> {
        self.accepted.lock().clone()
    }

    pub fn reject_count(&self) -> usize {
        self.rejects.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn bye_count(&self) -> usize {
        self.byes.load(Ordering::SeqCst)
    }

    pub fn fail_invite(&self, error: SignalingError) {
        *self.fail_invite.lock() = Some(error);
    }

    pub fn fail_accept(&self, error: SignalingError) {
        *self.fail_accept.lock() = Some(error);
    }
}

#[async_trait]
impl SipSession for FakeSession {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn remote_identity(&self) -> SipUri {
        self.remote.clone()
    }

    fn peer_connection(&self) -> Option<Arc<dyn PeerConnection>> {
        Some(Arc::clone(&self.pc) as Arc<dyn PeerConnection>)
    }

    async fn invite(&self) -> Result<(), SignalingError> {
        self.invites.fetch_add(1, Ordering::SeqCst);
        self.senders_at_invite
            .store(self.pc.senders.lock().len(), Ordering::SeqCst);
        match self.fail_invite.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn accept(&self, offer: MediaOffer) -> Result<(), SignalingError> {
        self.accepted.lock().push(offer);
        self.senders_at_invite
            .store(self.pc.senders.lock().len(), Ordering::SeqCst);
        match self.fail_accept.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn reject(&self) -> Result<(), SignalingError> {
        self.rejects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cancel(&self) -> Result<(), SignalingError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn bye(&self) -> Result<(), SignalingError> {
        self.byes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeUserAgent {
    registers: AtomicUsize,
    unregisters: AtomicUsize,
    stops: AtomicUsize,
    fail_register: Mutex<Option<SignalingError>>,
    registration_gate: Mutex<Option<Arc<Notify>>>,
    fail_invite: Mutex<Option<SignalingError>>,
    inviters: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeUserAgent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_register(&self, error: SignalingError) {
        *self.fail_register.lock() = Some(error);
    }

    /// Holds `register()` until the returned gate is notified
    pub fn hold_registration(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.registration_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// The next created session fails its `invite()`
    pub fn fail_next_invite(&self, error: SignalingError) {
        *self.fail_invite.lock() = Some(error);
    }

    pub fn register_count(&self) -> usize {
        self.registers.load(Ordering::SeqCst)
    }

    pub fn unregister_count(&self) -> usize {
        self.unregisters.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn inviter_count(&self) -> usize {
        self.inviters.lock().len()
    }

    pub fn last_inviter(&self) -> Option<Arc<FakeSession>> {
        self.inviters.lock().last().cloned()
    }
}

#[async_trait]
impl SipUserAgent for FakeUserAgent {
    async fn register(
        &self,
        _account: &SipAccountConfig,
        _ice_servers: &[IceServer],
    ) -> Result<(), SignalingError> {
        self.registers.fetch_add(1, Ordering::SeqCst);
        let gate = self.registration_gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.fail_register.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn unregister(&self) -> Result<(), SignalingError> {
        self.unregisters.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_inviter(
        &self,
        target: &SipUri,
        _offer: MediaOffer,
    ) -> Result<Arc<dyn SipSession>, SignalingError> {
        let session = FakeSession::outbound(target.clone());
        if let Some(error) = self.fail_invite.lock().take() {
            session.fail_invite(error);
        }
        self.inviters.lock().push(Arc::clone(&session));
        Ok(session as Arc<dyn SipSession>)
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// SINKS
// ============================================================================

#[derive(Default)]
pub struct FakeSink {
    not_ready: Mutex<HashMap<SinkId, u32>>,
    blocked: Mutex<HashSet<SinkId>>,
    attempts: Mutex<HashMap<SinkId, usize>>,
    attaches: Mutex<HashMap<SinkId, usize>>,
    detaches: Mutex<HashMap<SinkId, usize>>,
    plays: Mutex<HashMap<SinkId, usize>>,
    attached: Mutex<HashMap<SinkId, String>>,
}

impl FakeSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Next `times` attach attempts on `sink` fail with `NotReady`
    pub fn set_not_ready(&self, sink: SinkId, times: u32) {
        self.not_ready.lock().insert(sink, times);
    }

    pub fn block_playback(&self, sink: SinkId, blocked: bool) {
        let mut set = self.blocked.lock();
        if blocked {
            set.insert(sink);
        } else {
            set.remove(&sink);
        }
    }

    pub fn attach_attempts(&self, sink: SinkId) -> usize {
        self.attempts.lock().get(&sink).copied().unwrap_or(0)
    }

    pub fn attach_count(&self, sink: SinkId) -> usize {
        self.attaches.lock().get(&sink).copied().unwrap_or(0)
    }

    pub fn detach_count(&self, sink: SinkId) -> usize {
        self.detaches.lock().get(&sink).copied().unwrap_or(0)
    }

    pub fn play_count(&self, sink: SinkId) -> usize {
        self.plays.lock().get(&sink).copied().unwrap_or(0)
    }

    pub fn attached_stream(&self, sink: SinkId) -> Option<String> {
        self.attached.lock().get(&sink).cloned()
    }
}

impl MediaSink for FakeSink {
    fn attach(&self, sink: SinkId, source: SinkSource) -> Result<(), SinkError> {
        *self.attempts.lock().entry(sink).or_default() += 1;
        if let Some(remaining) = self.not_ready.lock().get_mut(&sink) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SinkError::NotReady(sink));
            }
        }
        *self.attaches.lock().entry(sink).or_default() += 1;
        self.attached
            .lock()
            .insert(sink, source.stream_id().to_string());
        Ok(())
    }

    fn play(&self, sink: SinkId) -> Result<(), SinkError> {
        *self.plays.lock().entry(sink).or_default() += 1;
        if self.blocked.lock().contains(&sink) {
            return Err(SinkError::PlaybackBlocked(sink));
        }
        Ok(())
    }

    fn detach(&self, sink: SinkId) {
        *self.detaches.lock().entry(sink).or_default() += 1;
        self.attached.lock().remove(&sink);
    }
}
