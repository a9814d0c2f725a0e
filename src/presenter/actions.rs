//! User actions routed into the controller

use crate::session::{SessionController, SessionError};
use serde::{Deserialize, Serialize};

/// Everything the call screen can ask for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "target", rename_all = "snake_case")]
pub enum UserAction {
    Register,
    Call(String),
    Answer,
    Reject,
    Hangup,
    ToggleMute,
    ToggleCamera,
    UnlockPlayback,
    OpenDeviceTest,
    CloseDeviceTest,
}

impl SessionController {
    /// Runs one user action; results are observed through `snapshot()`
    pub async fn dispatch(&self, action: UserAction) -> Result<(), SessionError> {
        tracing::debug!("User action: {:?}", action);
        match action {
            UserAction::Register => self.register().await,
            UserAction::Call(target) => self.call(&target).await,
            UserAction::Answer => self.answer().await,
            UserAction::Reject => self.reject().await,
            UserAction::Hangup => self.hangup().await,
            UserAction::ToggleMute => self.toggle_mute().map(|_| ()),
            UserAction::ToggleCamera => self.toggle_camera().map(|_| ()),
            UserAction::UnlockPlayback => self.unlock_playback(),
            UserAction::OpenDeviceTest => self.open_device_test().await.map(|_| ()),
            UserAction::CloseDeviceTest => {
                self.close_device_test();
                Ok(())
            }
        }
    }
}
