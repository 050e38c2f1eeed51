//! Simulated audio module
//!
//! Keeps a list of sound drivers, the selected one and its volumes. Device
//! selection and the playback/recording self-tests take simulated time.

use crate::command::{CommandError, RemoteModule};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone)]
pub struct AudioDriver {
    pub name: String,
    pub label: String,
    pub installed: bool,
}

impl AudioDriver {
    pub fn new(name: &str, label: &str, installed: bool) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            installed,
        }
    }
}

/// Simulated hardware latencies
#[derive(Debug, Clone, Copy)]
pub struct AudioTiming {
    /// Time spent bringing up hardware when switching device
    pub switch_delay: Duration,
    /// Duration of the playing/recording self-tests
    pub test_duration: Duration,
}

impl Default for AudioTiming {
    fn default() -> Self {
        Self {
            switch_delay: Duration::from_secs(2),
            test_duration: Duration::from_secs(3),
        }
    }
}

#[derive(Debug)]
struct AudioState {
    selected: Option<String>,
    playback: u8,
    capture: u8,
}

pub struct AudioModule {
    drivers: Vec<AudioDriver>,
    timing: AudioTiming,
    state: Mutex<AudioState>,
}

impl AudioModule {
    pub fn new(drivers: Vec<AudioDriver>, selected: Option<&str>, timing: AudioTiming) -> Self {
        Self {
            drivers,
            timing,
            state: Mutex::new(AudioState {
                selected: selected.map(str::to_string),
                playback: 50,
                capture: 50,
            }),
        }
    }

    /// Onboard soundcard selected, HDMI available, USB driver not installed
    pub fn with_defaults(timing: AudioTiming) -> Self {
        Self::new(
            vec![
                AudioDriver::new("bcm2835", "Raspberry pi soundcard", true),
                AudioDriver::new("hdmi0", "HDMI output", true),
                AudioDriver::new("usb0", "USB soundcard", false),
            ],
            Some("bcm2835"),
            timing,
        )
    }

    async fn set_volumes(&self, params: &Map<String, Value>) -> Result<Value, CommandError> {
        let playback = volume_param(params, "playback")?;
        let capture = volume_param(params, "capture")?;

        let mut state = self.state.lock().await;
        if state.selected.is_none() {
            return Ok(json!({ "playback": null, "capture": null }));
        }

        state.playback = playback;
        state.capture = capture;
        info!("Volumes set: playback={} capture={}", playback, capture);
        Ok(json!({ "playback": playback, "capture": capture }))
    }

    async fn get_volumes(&self) -> Result<Value, CommandError> {
        let state = self.state.lock().await;
        if state.selected.is_none() {
            return Ok(json!({ "playback": null, "capture": null }));
        }
        Ok(json!({ "playback": state.playback, "capture": state.capture }))
    }

    async fn select_device(&self, params: &Map<String, Value>) -> Result<Value, CommandError> {
        let driver_name = match params.get("driver_name") {
            None | Some(Value::Null) => {
                return Err(CommandError::MissingParameter("driver_name".into()))
            }
            Some(Value::String(name)) => name.as_str(),
            Some(_) => {
                return Err(CommandError::InvalidParameter(
                    "Parameter \"driver_name\" must be of type \"str\"".into(),
                ))
            }
        };
        if driver_name.is_empty() {
            return Err(CommandError::InvalidParameter(
                "Parameter \"driver_name\" is invalid (specified=\"\")".into(),
            ));
        }

        let driver = self
            .drivers
            .iter()
            .find(|d| d.name == driver_name)
            .ok_or_else(|| CommandError::Failed("Specified driver does not exist".into()))?;
        if !driver.installed {
            return Err(CommandError::Failed(
                "Can't select device because its driver seems not to be installed".into(),
            ));
        }

        tokio::time::sleep(self.timing.switch_delay).await;

        self.state.lock().await.selected = Some(driver.name.clone());
        info!("Selected audio device {} ({})", driver.name, driver.label);
        Ok(Value::Null)
    }

    async fn run_self_test(&self, what: &str) -> Result<Value, CommandError> {
        let selected = self.state.lock().await.selected.clone();
        let Some(device) = selected else {
            return Err(CommandError::Failed("No audio device selected".into()));
        };

        info!("Running {} test on {}", what, device);
        tokio::time::sleep(self.timing.test_duration).await;
        Ok(Value::Bool(true))
    }
}

fn volume_param(params: &Map<String, Value>, name: &str) -> Result<u8, CommandError> {
    let value = match params.get(name) {
        None | Some(Value::Null) => return Err(CommandError::MissingParameter(name.into())),
        Some(value) => value,
    };

    let volume = value.as_i64().ok_or_else(|| {
        CommandError::InvalidParameter(format!("Parameter \"{}\" must be of type \"int\"", name))
    })?;

    u8::try_from(volume)
        .ok()
        .filter(|v| *v <= 100)
        .ok_or_else(|| {
            CommandError::InvalidParameter(format!(
                "Parameter \"{0}\" must be 0<={0}<=100",
                name
            ))
        })
}

#[async_trait]
impl RemoteModule for AudioModule {
    fn name(&self) -> &'static str {
        "audio"
    }

    async fn handle(&self, command: &str, params: Map<String, Value>) -> Result<Value, CommandError> {
        match command {
            "set_volumes" => self.set_volumes(&params).await,
            "get_volumes" => self.get_volumes().await,
            "select_device" => self.select_device(&params).await,
            "test_playing" => self.run_self_test("playing").await,
            "test_recording" => self.run_self_test("recording").await,
            _ => Err(CommandError::UnknownCommand {
                module: self.name().into(),
                command: command.into(),
            }),
        }
    }
}
