//! Facade for the remote `audio` module

use crate::dispatch::DispatchClient;
use crate::error::CommandOutcome;
use serde_json::json;
use std::time::Duration;

pub const MODULE: &str = "audio";

/// Device selection brings up hardware on the remote side
pub const SELECT_DEVICE_TIMEOUT: Duration = Duration::from_secs(30);

/// Recording self-test runs for a bounded time
pub const TEST_RECORDING_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AudioModule {
    client: DispatchClient,
}

impl AudioModule {
    pub fn new(client: DispatchClient) -> Self {
        Self { client }
    }

    /// Set playback and capture volumes (percent)
    pub async fn set_volumes(&self, playback: u8, capture: u8) -> CommandOutcome {
        let params = json!({ "playback": playback, "capture": capture });
        self.client
            .send_command("set_volumes", MODULE, Some(params), None)
            .await
    }

    /// Switch the active device to the driver named `label`
    pub async fn select_device(&self, label: &str) -> CommandOutcome {
        let params = json!({ "driver_name": label });
        self.client
            .send_command("select_device", MODULE, Some(params), Some(SELECT_DEVICE_TIMEOUT))
            .await
    }

    pub async fn test_playing(&self) -> CommandOutcome {
        self.client
            .send_command("test_playing", MODULE, None, None)
            .await
    }

    pub async fn test_recording(&self) -> CommandOutcome {
        self.client
            .send_command("test_recording", MODULE, None, Some(TEST_RECORDING_TIMEOUT))
            .await
    }
}
