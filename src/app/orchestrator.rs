use super::types::{ComponentState, ShutdownReason};
use crate::config::FocusLockConfig;
use crate::error::{FocusLockError, Result};
use crate::events::EventBus;
use crate::keyboard_input::KeyboardInputHandler;
use crate::session::{LockSession, LockStatus, SessionHandle};
use crate::stage::SimulatedStage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Wires the simulated hardware, the input feeds and the serialized lock
/// session together and manages their lifecycle
pub struct FocusLockOrchestrator {
    pub(super) config: FocusLockConfig,
    pub(super) event_bus: EventBus,
    pub(super) stage: Arc<SimulatedStage>,

    // Components
    pub(super) session: Option<SessionHandle>,
    pub(super) session_task: Option<JoinHandle<LockSession>>,
    pub(super) stage_task: Option<JoinHandle<()>>,
    pub(super) feed_tasks: Vec<(&'static str, JoinHandle<u64>)>,
    pub(super) keyboard_handler: Option<KeyboardInputHandler>,
    pub(super) keyboard_enabled: bool,
    pub(super) film_on_start: bool,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
    pub(super) final_status: Option<LockStatus>,
}

impl FocusLockOrchestrator {
    /// Create a new orchestrator with the given configuration
    pub async fn new(config: FocusLockConfig) -> Result<Self> {
        config.validate()?;

        let event_bus = EventBus::new(config.session.event_bus_capacity);
        let stage = Arc::new(SimulatedStage::from_config(&config.stage));
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Ok(Self {
            config,
            event_bus,
            stage,
            session: None,
            session_task: None,
            stage_task: None,
            feed_tasks: Vec::new(),
            keyboard_handler: None,
            keyboard_enabled: false,
            film_on_start: false,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
            final_status: None,
        })
    }

    /// Enable or disable the interactive keyboard controls
    pub fn set_keyboard_enabled(&mut self, enabled: bool) {
        self.keyboard_enabled = enabled;
    }

    /// Start a film as soon as the feeds are running
    pub fn set_film_on_start(&mut self, enabled: bool) {
        self.film_on_start = enabled;
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// The physical stage behind the command queue
    pub fn stage(&self) -> Arc<SimulatedStage> {
        Arc::clone(&self.stage)
    }

    /// Handle to the running session, available after `initialize`
    pub fn session(&self) -> Result<SessionHandle> {
        self.session.clone().ok_or_else(|| FocusLockError::System {
            message: "Lock session has not been initialized".to_string(),
        })
    }

    /// Lock status captured during shutdown
    pub fn final_status(&self) -> Option<&LockStatus> {
        self.final_status.as_ref()
    }
}
