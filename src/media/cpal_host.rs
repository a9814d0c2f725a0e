//! Desktop Microphone Host
//!
//! Uses cpal for cross-platform audio input. Audio only: camera requests
//! produce no video track, so the device manager reports the camera as
//! unavailable.
//!
//! cpal streams are not `Send`, so each capture lives on its own thread and
//! is dropped there when the track is stopped.

use super::devices::{MediaDevices, MediaError, StreamConstraints};
use super::level::AudioAnalyser;
use super::track::{DeviceInfo, DeviceKind, MediaStream, MediaTrack, TrackKind, TrackRef};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig, SupportedStreamConfigRange};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use tokio::sync::oneshot;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Preferred capture rate
pub const SAMPLE_RATE: u32 = 48000;

/// Analysis window, matching an analyser with fftSize 256
pub const FFT_SIZE: usize = 256;

/// Number of frequency bins produced per window
pub const BIN_COUNT: usize = FFT_SIZE / 2;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;
const SMOOTHING: f32 = 0.8;

/// Capture ring buffer: a few windows of headroom
const RING_BUFFER_SIZE: usize = FFT_SIZE * 16;

type CaptureBuffer = Arc<Mutex<HeapRb<f32>>>;

/// Ring buffers of running captures, keyed by track id
#[derive(Clone, Default)]
struct CaptureRegistry(Arc<Mutex<HashMap<String, CaptureBuffer>>>);

impl CaptureRegistry {
    fn insert(&self, track_id: String, buffer: CaptureBuffer) {
        self.0.lock().insert(track_id, buffer);
    }

    fn remove(&self, track_id: &str) {
        self.0.lock().remove(track_id);
    }

    fn find(&self, track_ids: impl IntoIterator<Item = String>) -> Option<CaptureBuffer> {
        let captures = self.0.lock();
        track_ids.into_iter().find_map(|id| captures.get(&id).cloned())
    }

    fn len(&self) -> usize {
        self.0.lock().len()
    }
}

// ============================================================================
// TRACK
// ============================================================================

/// A live cpal input stream exposed as an audio track
#[derive(Debug)]
struct CpalMicTrack {
    id: String,
    label: String,
    enabled: Arc<AtomicBool>,
    stopped: AtomicBool,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
    captures: CaptureRegistry,
}

impl std::fmt::Debug for CaptureRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureRegistry")
            .field("captures", &self.len())
            .finish()
    }
}

impl MediaTrack for CpalMicTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        tracing::debug!("Microphone {} enabled: {}", self.label, enabled);
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the sender ends the capture thread
        self.stop_tx.lock().take();
        self.captures.remove(&self.id);
        tracing::info!("Microphone capture stopped: {}", self.label);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

// ============================================================================
// HOST
// ============================================================================

/// Microphones of the default cpal host
#[derive(Default)]
pub struct CpalMicrophones {
    captures: CaptureRegistry,
}

impl CpalMicrophones {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_input_device(id: Option<&str>) -> Result<Device, MediaError> {
        let host = cpal::default_host();
        match id {
            None => host
                .default_input_device()
                .ok_or_else(|| MediaError::DeviceUnavailable("microphone".to_string())),
            Some(id) => host
                .input_devices()
                .map_err(|e| MediaError::Host(e.to_string()))?
                .find(|d| d.name().map(|name| name == id).unwrap_or(false))
                .ok_or_else(|| MediaError::DeviceUnavailable(id.to_string())),
        }
    }

    /// Opens the capture stream on a dedicated thread
    async fn open_capture(&self, device: Device) -> Result<TrackRef, MediaError> {
        let label = device.name().unwrap_or_else(|_| "Microphone".to_string());
        let config = find_best_input_config(&device)?;

        tracing::info!(
            "Starting audio capture on '{}': {} Hz, {} channels",
            label,
            config.sample_rate.0,
            config.channels
        );

        let buffer: CaptureBuffer = Arc::new(Mutex::new(HeapRb::new(RING_BUFFER_SIZE)));
        let enabled = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), MediaError>>();

        let thread_buffer = Arc::clone(&buffer);
        let thread_enabled = Arc::clone(&enabled);
        std::thread::spawn(move || {
            let channels = usize::from(config.channels).max(1);
            let stream = device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let live = thread_enabled.load(Ordering::Relaxed);
                    let mut buffer = thread_buffer.lock();
                    // Downmix to mono; a disabled track captures silence
                    for frame in data.chunks(channels) {
                        let sample = if live {
                            frame.iter().sum::<f32>() / frame.len() as f32
                        } else {
                            0.0
                        };
                        buffer.push_overwrite(sample);
                    }
                },
                |err| {
                    tracing::error!("Audio capture error: {}", err);
                },
                None,
            );

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(map_build_error(e)));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(MediaError::Host(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            // Blocks until the track is stopped (sender dropped)
            let _ = stop_rx.recv();
            drop(stream);
        });

        ready_rx
            .await
            .map_err(|_| MediaError::Host("capture thread exited".to_string()))??;

        let track = CpalMicTrack {
            id: uuid::Uuid::new_v4().to_string(),
            label,
            enabled,
            stopped: AtomicBool::new(false),
            stop_tx: Mutex::new(Some(stop_tx)),
            captures: self.captures.clone(),
        };
        self.captures.insert(track.id.clone(), buffer);
        Ok(Arc::new(track))
    }
}

#[async_trait]
impl MediaDevices for CpalMicrophones {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, MediaError> {
        let host = cpal::default_host();
        let inputs = host
            .input_devices()
            .map_err(|e| MediaError::Host(e.to_string()))?;

        // cpal reports no stable ids; the device name doubles as id
        Ok(inputs
            .filter_map(|d| d.name().ok())
            .map(|name| DeviceInfo {
                id: name.clone(),
                label: name,
                kind: DeviceKind::AudioInput,
            })
            .collect())
    }

    async fn get_user_media(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<Vec<TrackRef>, MediaError> {
        if let Some(camera) = &constraints.camera_id {
            return Err(MediaError::DeviceUnavailable(camera.clone()));
        }
        if !constraints.audio {
            return Ok(Vec::new());
        }

        let device = Self::find_input_device(constraints.microphone_id.as_deref())?;
        let track = self.open_capture(device).await?;
        Ok(vec![track])
    }

    fn create_analyser(&self, stream: &MediaStream) -> Result<Box<dyn AudioAnalyser>, MediaError> {
        let buffer = self
            .captures
            .find(stream.audio_tracks().map(|t| t.id()))
            .ok_or_else(|| MediaError::Analysis("stream has no cpal capture".to_string()))?;
        Ok(Box::new(CpalAnalyser::new(buffer)))
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> MediaError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            MediaError::DeviceUnavailable("microphone".to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported => {
            MediaError::Constraint("unsupported stream configuration".to_string())
        }
        other => MediaError::Host(other.to_string()),
    }
}

/// Finds the best f32 input configuration, preferring 48 kHz
fn find_best_input_config(device: &Device) -> Result<StreamConfig, MediaError> {
    let configs: Vec<SupportedStreamConfigRange> = device
        .supported_input_configs()
        .map_err(|e| MediaError::Constraint(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    let target_rate = cpal::SampleRate(SAMPLE_RATE);
    if let Some(config) = configs
        .iter()
        .find(|c| c.min_sample_rate() <= target_rate && c.max_sample_rate() >= target_rate)
    {
        return Ok(config.clone().with_sample_rate(target_rate).into());
    }

    configs
        .into_iter()
        .next()
        .map(|c| c.with_max_sample_rate().into())
        .ok_or_else(|| MediaError::Constraint("no f32 input configuration".to_string()))
}

// ============================================================================
// ANALYSER
// ============================================================================

/// Byte frequency data over the most recent capture window
pub struct CpalAnalyser {
    buffer: CaptureBuffer,
    window: VecDeque<f32>,
    spectrum: Spectrum,
    smoothed: Vec<f32>,
    closed: bool,
}

impl CpalAnalyser {
    fn new(buffer: CaptureBuffer) -> Self {
        Self {
            buffer,
            window: VecDeque::from(vec![0.0; FFT_SIZE]),
            spectrum: Spectrum::new(FFT_SIZE),
            smoothed: vec![0.0; BIN_COUNT],
            closed: false,
        }
    }

    /// Moves newly captured samples into the sliding window
    fn drain(&mut self) {
        let mut buffer = self.buffer.lock();
        while let Some(sample) = buffer.try_pop() {
            self.window.pop_front();
            self.window.push_back(sample);
        }
    }
}

impl AudioAnalyser for CpalAnalyser {
    fn frequency_bin_count(&self) -> usize {
        BIN_COUNT
    }

    fn byte_frequency_data(&mut self, bins: &mut [u8]) {
        if self.closed {
            bins.fill(0);
            return;
        }
        self.drain();
        let magnitudes = self.spectrum.magnitudes(self.window.make_contiguous());
        for (smoothed, magnitude) in self.smoothed.iter_mut().zip(magnitudes) {
            *smoothed = SMOOTHING * *smoothed + (1.0 - SMOOTHING) * magnitude;
        }
        for (bin, magnitude) in bins.iter_mut().zip(&self.smoothed) {
            *bin = magnitude_to_byte(*magnitude);
        }
    }

    fn resume(&mut self) -> Result<(), MediaError> {
        // cpal capture is never suspended by an autoplay policy
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        self.buffer.lock().clear();
    }
}

/// Hann-windowed FFT over a fixed window size, planned once
pub struct Spectrum {
    fft: Arc<dyn Fft<f32>>,
    hann: Vec<f32>,
    buffer: Vec<Complex32>,
    scratch: Vec<Complex32>,
    magnitudes: Vec<f32>,
}

impl Spectrum {
    pub fn new(size: usize) -> Self {
        let fft = FftPlanner::<f32>::new().plan_fft_forward(size);
        let hann = (0..size)
            .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos())
            .collect();
        let scratch = vec![Complex32::default(); fft.get_inplace_scratch_len()];
        Self {
            fft,
            hann,
            buffer: vec![Complex32::default(); size],
            scratch,
            magnitudes: vec![0.0; size / 2],
        }
    }

    /// Magnitudes of the first half of the spectrum. Missing samples count as silence.
    pub fn magnitudes(&mut self, samples: &[f32]) -> &[f32] {
        let size = self.buffer.len();
        if size == 0 {
            return &self.magnitudes;
        }
        let padded = samples.iter().copied().chain(std::iter::repeat(0.0));
        for ((slot, sample), w) in self.buffer.iter_mut().zip(padded).zip(&self.hann) {
            *slot = Complex32::new(sample * w, 0.0);
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);
        for (magnitude, bin) in self.magnitudes.iter_mut().zip(&self.buffer) {
            *magnitude = bin.norm() / size as f32;
        }
        &self.magnitudes
    }
}

/// Maps a linear magnitude onto 0..=255 across the analyser's dB range
pub fn magnitude_to_byte(magnitude: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
    scaled.clamp(0.0, 255.0) as u8
}

// ============================================================================
// TESTS
// ============================================================================
