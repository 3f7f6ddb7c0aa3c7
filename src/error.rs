use thiserror::Error;

#[derive(Error, Debug)]
pub enum FocusLockError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Parameter error in '{section}.{name}': {details}")]
    Parameter {
        section: String,
        name: String,
        details: String,
    },

    #[error("Unknown lock behavior '{behavior}' for mode '{mode}'")]
    UnknownBehavior { mode: String, behavior: String },

    #[error("Unknown lock mode '{name}'")]
    UnknownMode { name: String },

    #[error("Behavior '{behavior}' requires parameter '{parameter}'")]
    MissingBehaviorParameter {
        behavior: String,
        parameter: String,
    },

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

/// Camera configuration failures. These are raised synchronously by the
/// settings validation and leave the camera in a "not ready" state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("Unequal binning is not supported ({x_bin}x{y_bin})")]
    UnequalBinning { x_bin: u32, y_bin: u32 },

    #[error("Unsupported bin size {bin}")]
    UnsupportedBinning { bin: u32 },

    #[error("Invalid camera configuration: {details}")]
    Configuration { details: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

impl FocusLockError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn parameter<S: Into<String>>(section: S, name: S, details: S) -> Self {
        Self::Parameter {
            section: section.into(),
            name: name.into(),
            details: details.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FocusLockError>;
