//! Microphone Input Level
//!
//! Levels are pulled, not pushed: the consumer (usually the render loop)
//! decides how often to sample.

use super::devices::MediaError;
use futures::Stream;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Byte value that maps to a full-scale level
const FULL_SCALE_BIN: f32 = 128.0;

/// Frequency-domain view of a microphone, as produced by the host
pub trait AudioAnalyser: Send {
    fn frequency_bin_count(&self) -> usize;

    /// Fills `bins` with the current byte frequency data (0..=255 per bin)
    fn byte_frequency_data(&mut self, bins: &mut [u8]);

    /// Resumes a context the host suspended (autoplay policy)
    fn resume(&mut self) -> Result<(), MediaError>;

    fn close(&mut self);
}

/// Mean bin energy normalized to 0..=100
pub fn level_from_bins(bins: &[u8]) -> u8 {
    if bins.is_empty() {
        return 0;
    }
    let sum: u32 = bins.iter().map(|&b| u32::from(b)).sum();
    let average = sum as f32 / bins.len() as f32;
    (average / FULL_SCALE_BIN * 100.0).min(100.0) as u8
}

struct Shared {
    analyser: Mutex<Box<dyn AudioAnalyser>>,
    stopped: AtomicBool,
}

impl Shared {
    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.analyser.lock().close();
            tracing::debug!("Input level monitoring stopped");
        }
    }
}

// ============================================================================
// MONITOR
// ============================================================================

/// Infinite level sequence; ends once stopped
pub struct LevelMonitor {
    shared: Arc<Shared>,
    bins: Vec<u8>,
}

impl LevelMonitor {
    pub fn new(analyser: Box<dyn AudioAnalyser>) -> Self {
        let bins = vec![0; analyser.frequency_bin_count()];
        Self {
            shared: Arc::new(Shared {
                analyser: Mutex::new(analyser),
                stopped: AtomicBool::new(false),
            }),
            bins,
        }
    }

    /// Handle for stopping or resuming from elsewhere (UI, controller)
    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Samples on a fixed cadence instead of on demand
    pub fn into_stream(self, cadence: Duration) -> impl Stream<Item = u8> + Send {
        let interval = tokio::time::interval(cadence);
        futures::stream::unfold((self, interval), |(mut monitor, mut interval)| async move {
            interval.tick().await;
            let level = monitor.next()?;
            Some((level, (monitor, interval)))
        })
    }
}

impl Iterator for LevelMonitor {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if self.is_stopped() {
            return None;
        }
        self.shared.analyser.lock().byte_frequency_data(&mut self.bins);
        Some(level_from_bins(&self.bins))
    }
}

impl std::fmt::Debug for LevelMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelMonitor")
            .field("bins", &self.bins.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Cancels or resumes a [`LevelMonitor`] without owning it
#[derive(Clone)]
pub struct MonitorHandle {
    shared: Arc<Shared>,
}

impl MonitorHandle {
    /// Ends the sequence; repeated calls are no-ops
    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    pub fn resume(&self) -> Result<(), MediaError> {
        if self.is_stopped() {
            return Ok(());
        }
        self.shared.analyser.lock().resume()
    }
}

impl std::fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
