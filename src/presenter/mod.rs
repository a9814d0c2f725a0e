//! Presenter Module
//!
//! Read model and action routing for a call screen. Rendering itself is
//! left to the UI; this only decides what it should show and offer.

mod actions;
mod view;

pub use actions::UserAction;
pub use view::{controls, CallView, Controls};
