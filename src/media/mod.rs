//! Media Module - Devices, Streams and Levels
//!
//! Handles:
//! - Camera/microphone enumeration
//! - Local stream acquisition and release
//! - Mute/camera preferences applied to tracks
//! - Microphone input level for the device test

mod cpal_host;
mod devices;
mod level;
mod track;

pub use cpal_host::{CpalAnalyser, CpalMicrophones, BIN_COUNT, FFT_SIZE, SAMPLE_RATE};
pub use devices::{apply_to_tracks, DeviceManager, MediaDevices, MediaError, StreamConstraints};
pub use level::{level_from_bins, AudioAnalyser, LevelMonitor, MonitorHandle};
pub use track::{
    DeviceDescriptor, DeviceInfo, DeviceKind, DeviceSet, MediaStream, MediaTrack, TrackKind,
    TrackRef,
};
