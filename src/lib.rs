pub mod app;
pub mod behavior;
pub mod camera;
pub mod config;
pub mod error;
pub mod events;
pub mod fitting;
pub mod frame;
pub mod keyboard_input;
pub mod mode;
pub mod parameters;
pub mod quality;
pub mod sensor;
pub mod session;
pub mod stage;

pub use app::{ComponentState, FocusLockOrchestrator, ShutdownReason};
pub use behavior::{BehaviorParams, LockBehavior, LockContext};
pub use camera::{CameraSettings, CameraSource, SimulatedCamera};
pub use config::FocusLockConfig;
pub use error::{CameraError, FocusLockError, Result};
pub use events::{EventBus, EventFilter, EventReceiver, FocusLockEvent};
pub use fitting::{fit_gaussian, GaussianFit};
pub use frame::{Frame, FrameImage};
pub use keyboard_input::{KeyAction, KeyboardController, KeyboardInputHandler};
pub use mode::{
    AlwaysOnLockMode, AutoLockMode, CalibrationLockMode, LockMode, NoLockMode, OptimalLockMode,
};
pub use parameters::{LockParameters, ParameterOverrides, ParameterValue};
pub use quality::{FocusQuality, GradientQuality};
pub use sensor::{QpdState, SensorSource, SimulatedSensor};
pub use session::{LockSession, LockStatus, SessionHandle, SessionWorker};
pub use stage::{QueuedStage, SimulatedStage, StageActuator};
