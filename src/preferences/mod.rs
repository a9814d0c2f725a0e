//! Preferences Module
//!
//! Persisted call preferences (mute, camera off) that survive a restart.
//! Read once when the controller starts, written on every toggle.

mod store;

pub use store::{
    MemoryPreferenceStore, PreferenceError, PreferenceStore, Preferences, SqlitePreferenceStore,
};
