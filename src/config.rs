use crate::parameters::ParameterOverrides;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FocusLockConfig {
    pub session: SessionConfig,
    pub sensor: SensorConfig,
    pub camera: CameraConfig,
    pub stage: StageConfig,

    /// Overrides for the lock parameter tree, keyed by section name
    #[serde(default)]
    pub parameters: ParameterOverrides,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// Display name of the lock mode selected at startup
    #[serde(default = "default_initial_mode")]
    pub initial_mode: String,

    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Capacity of the serialized command queue feeding the lock logic
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SensorConfig {
    /// QPD polling interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Stage position (um) where the sample is in focus
    #[serde(default = "default_focus_z")]
    pub focus_z: f64,

    /// Offset units per um of defocus
    #[serde(default = "default_offset_gain")]
    pub offset_gain: f64,

    /// Sum signal at best focus
    #[serde(default = "default_peak_sum")]
    pub peak_sum: f64,

    /// Width (um) of the sum signal around focus
    #[serde(default = "default_sum_width")]
    pub sum_width: f64,

    /// Peak-to-peak amplitude of uniform offset noise
    #[serde(default = "default_offset_noise")]
    pub noise: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Frame source tag
    #[serde(default = "default_camera_source")]
    pub source: String,

    #[serde(default = "default_camera_pixels")]
    pub x_pixels: u32,

    #[serde(default = "default_camera_pixels")]
    pub y_pixels: u32,

    #[serde(default = "default_camera_bin")]
    pub x_bin: u32,

    #[serde(default = "default_camera_bin")]
    pub y_bin: u32,

    /// Frames per second
    #[serde(default = "default_camera_fps")]
    pub fps: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StageConfig {
    /// Lower travel limit in um
    #[serde(default = "default_stage_minimum")]
    pub minimum: f64,

    /// Upper travel limit in um
    #[serde(default = "default_stage_maximum")]
    pub maximum: f64,

    /// Home position used by recenter
    #[serde(default = "default_stage_center")]
    pub center: f64,
}

impl FocusLockConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("focuslock.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default("session.initial_mode", default_initial_mode())?
            .set_default(
                "session.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default(
                "session.command_queue_capacity",
                default_command_queue_capacity() as i64,
            )?
            .set_default(
                "sensor.poll_interval_ms",
                default_poll_interval_ms() as i64,
            )?
            .set_default("sensor.focus_z", default_focus_z())?
            .set_default("sensor.offset_gain", default_offset_gain())?
            .set_default("sensor.peak_sum", default_peak_sum())?
            .set_default("sensor.sum_width", default_sum_width())?
            .set_default("sensor.noise", default_offset_noise())?
            .set_default("camera.source", default_camera_source())?
            .set_default("camera.x_pixels", default_camera_pixels())?
            .set_default("camera.y_pixels", default_camera_pixels())?
            .set_default("camera.x_bin", default_camera_bin())?
            .set_default("camera.y_bin", default_camera_bin())?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("stage.minimum", default_stage_minimum())?
            .set_default("stage.maximum", default_stage_maximum())?
            .set_default("stage.center", default_stage_center())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with FOCUSLOCK_ prefix
            .add_source(
                Environment::with_prefix("FOCUSLOCK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: FocusLockConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        if self.session.command_queue_capacity == 0 {
            return Err(ConfigError::Message(
                "Command queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.sensor.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Sensor poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.sensor.sum_width <= 0.0 {
            return Err(ConfigError::Message(
                "Sensor sum_width must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if self.stage.minimum >= self.stage.maximum {
            return Err(ConfigError::Message(format!(
                "Stage minimum ({}) must be below maximum ({})",
                self.stage.minimum, self.stage.maximum
            )));
        }

        if self.stage.center < self.stage.minimum || self.stage.center > self.stage.maximum {
            return Err(ConfigError::Message(format!(
                "Stage center ({}) must lie within [{}, {}]",
                self.stage.center, self.stage.minimum, self.stage.maximum
            )));
        }

        Ok(())
    }
}

impl Default for FocusLockConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig {
                initial_mode: default_initial_mode(),
                event_bus_capacity: default_event_bus_capacity(),
                command_queue_capacity: default_command_queue_capacity(),
            },
            sensor: SensorConfig {
                poll_interval_ms: default_poll_interval_ms(),
                focus_z: default_focus_z(),
                offset_gain: default_offset_gain(),
                peak_sum: default_peak_sum(),
                sum_width: default_sum_width(),
                noise: default_offset_noise(),
            },
            camera: CameraConfig {
                source: default_camera_source(),
                x_pixels: default_camera_pixels(),
                y_pixels: default_camera_pixels(),
                x_bin: default_camera_bin(),
                y_bin: default_camera_bin(),
                fps: default_camera_fps(),
            },
            stage: StageConfig {
                minimum: default_stage_minimum(),
                maximum: default_stage_maximum(),
                center: default_stage_center(),
            },
            parameters: ParameterOverrides::new(),
        }
    }
}

// Default value functions
fn default_initial_mode() -> String {
    "No lock".to_string()
}
fn default_event_bus_capacity() -> usize {
    256
}
fn default_command_queue_capacity() -> usize {
    1024
}

fn default_poll_interval_ms() -> u64 {
    10
}
fn default_focus_z() -> f64 {
    52.0
}
fn default_offset_gain() -> f64 {
    1.0
}
fn default_peak_sum() -> f64 {
    1000.0
}
fn default_sum_width() -> f64 {
    2.0
}
fn default_offset_noise() -> f64 {
    0.0
}

fn default_camera_source() -> String {
    "camera1".to_string()
}
fn default_camera_pixels() -> u32 {
    64
}
fn default_camera_bin() -> u32 {
    1
}
fn default_camera_fps() -> u32 {
    50
}

fn default_stage_minimum() -> f64 {
    0.0
}
fn default_stage_maximum() -> f64 {
    100.0
}
fn default_stage_center() -> f64 {
    50.0
}
