use crate::behavior::{self, BehaviorParams};
use crate::error::{FocusLockError, Result};
use crate::events::{EventBus, FocusLockEvent};
use crate::frame::Frame;
use crate::mode::{
    self, AlwaysOnLockMode, AutoLockMode, CalibrationLockMode, LockMode, NoLockMode,
    OptimalLockMode,
};
use crate::parameters::{LockParameters, ParameterOverrides};
use crate::quality::FocusQuality;
use crate::sensor::QpdState;
use crate::stage::StageActuator;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Snapshot of the session for status reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockStatus {
    pub mode: String,
    pub behavior: String,
    pub locked: bool,
    pub good_lock: bool,
    pub lock_target: f64,
    pub lock_button_enabled: bool,
    pub film_id: Option<Uuid>,
    pub stage_position: f64,
}

/// Owns every lock mode and routes inputs to the selected one.
///
/// Not thread safe. Run it behind a [`super::SessionWorker`] so that all
/// inputs are handled one at a time.
pub struct LockSession {
    modes: Vec<Box<dyn LockMode>>,
    active: usize,
    parameters: LockParameters,
    stage: Arc<dyn StageActuator>,
    events: EventBus,
    film_id: Option<Uuid>,
}

impl LockSession {
    /// Build the standard set of modes with default parameters. The first
    /// mode, "No lock", starts selected.
    pub fn new(
        stage: Arc<dyn StageActuator>,
        events: EventBus,
        quality: Arc<dyn FocusQuality>,
    ) -> Result<Self> {
        let modes: Vec<Box<dyn LockMode>> = vec![
            Box::new(NoLockMode::new(stage.clone(), events.clone())),
            Box::new(AutoLockMode::new(stage.clone(), events.clone())),
            Box::new(AlwaysOnLockMode::new(stage.clone(), events.clone())),
            Box::new(OptimalLockMode::new(stage.clone(), events.clone(), quality)),
            Box::new(CalibrationLockMode::new(stage.clone(), events.clone())),
        ];
        Self::with_modes(modes, stage, events)
    }

    /// Build a session over an explicit list of modes
    pub fn with_modes(
        modes: Vec<Box<dyn LockMode>>,
        stage: Arc<dyn StageActuator>,
        events: EventBus,
    ) -> Result<Self> {
        if modes.is_empty() {
            return Err(FocusLockError::system("a lock session needs at least one mode"));
        }
        for (i, mode) in modes.iter().enumerate() {
            if modes[..i].iter().any(|other| other.name() == mode.name()) {
                return Err(FocusLockError::system(format!(
                    "lock mode '{}' registered twice",
                    mode.name()
                )));
            }
        }

        let mut session = Self {
            modes,
            active: 0,
            parameters: Self::register_parameters()?,
            stage,
            events,
            film_id: None,
        };
        let parameters = session.parameters.clone();
        session.broadcast_parameters(&parameters)?;
        session.modes[0].initialize();
        info!(
            "Lock session ready with modes {:?}, '{}' selected",
            session.mode_names(),
            session.modes[0].name()
        );
        Ok(session)
    }

    /// Parameter tree with every behavior and mode section at its defaults
    pub fn register_parameters() -> Result<LockParameters> {
        let mut parameters = LockParameters::new();
        behavior::add_parameters(&mut parameters)?;
        mode::add_parameters(&mut parameters)?;
        Ok(parameters)
    }

    pub fn parameters(&self) -> &LockParameters {
        &self.parameters
    }

    pub fn mode_names(&self) -> Vec<&'static str> {
        self.modes.iter().map(|mode| mode.name()).collect()
    }

    pub fn active_mode(&self) -> &dyn LockMode {
        self.modes[self.active].as_ref()
    }

    fn mode_mut(&mut self) -> &mut dyn LockMode {
        self.modes[self.active].as_mut()
    }

    /// Switch the active mode, tearing down a lock held by the old one first
    pub fn select_mode(&mut self, name: &str) -> Result<()> {
        let index = self
            .modes
            .iter()
            .position(|mode| mode.name() == name)
            .ok_or_else(|| FocusLockError::UnknownMode {
                name: name.to_string(),
            })?;

        if index == self.active {
            debug!("Lock mode '{}' already selected", name);
            return Ok(());
        }

        let outgoing = self.mode_mut();
        if outgoing.is_engaged() {
            debug!("Stopping lock held by '{}'", outgoing.name());
            outgoing.stop_lock();
        }

        self.active = index;
        self.mode_mut().initialize();
        self.events.emit(FocusLockEvent::ModeChanged {
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn handle_qpd_update(&mut self, qpd_state: &QpdState) {
        self.mode_mut().handle_qpd_update(qpd_state);
    }

    pub fn handle_new_frame(&mut self, frame: &Frame) {
        self.mode_mut().handle_new_frame(frame);
    }

    pub fn handle_jump(&mut self, delta: f64) {
        self.mode_mut().handle_jump(delta);
    }

    /// User lock request. Ignored unless the mode enables its lock button.
    pub fn start_lock(&mut self, target: Option<f64>) -> bool {
        if !self.should_enable_lock_button() {
            warn!(
                "Lock requested but '{}' does not allow manual locking",
                self.active_mode().name()
            );
            return false;
        }
        self.mode_mut().start_lock(target);
        true
    }

    pub fn stop_lock(&mut self) {
        self.mode_mut().stop_lock();
    }

    pub fn start_lock_behavior(&mut self, name: &str, params: &BehaviorParams) -> Result<()> {
        self.mode_mut().start_lock_behavior(name, params)
    }

    pub fn start_film(&mut self) -> Uuid {
        let film_id = Uuid::new_v4();
        self.film_id = Some(film_id);
        self.events.emit(FocusLockEvent::FilmStarted { film_id });
        self.mode_mut().start_film();
        film_id
    }

    pub fn stop_film(&mut self) {
        self.mode_mut().stop_film();
        if let Some(film_id) = self.film_id.take() {
            self.events.emit(FocusLockEvent::FilmStopped { film_id });
        }
    }

    pub fn film_id(&self) -> Option<Uuid> {
        self.film_id
    }

    /// Replace the parameter tree and have every mode re-derive its
    /// tunables. The snapshot is validated against the registered tree
    /// first, so either every mode takes the new values or none does.
    pub fn new_parameters(&mut self, parameters: LockParameters) -> Result<()> {
        self.parameters.validate_snapshot(&parameters)?;
        if let Err(e) = self.broadcast_parameters(&parameters) {
            let current = std::mem::take(&mut self.parameters);
            if let Err(restore) = self.broadcast_parameters(&current) {
                warn!("Failed to restore lock parameters: {}", restore);
            }
            self.parameters = current;
            return Err(e);
        }
        self.parameters = parameters;
        info!("Lock parameters updated");
        Ok(())
    }

    /// Apply configured overrides on top of the current tree
    pub fn apply_overrides(&mut self, overrides: &ParameterOverrides) -> Result<()> {
        let mut parameters = self.parameters.clone();
        parameters.apply_overrides(overrides)?;
        self.new_parameters(parameters)
    }

    fn broadcast_parameters(&mut self, parameters: &LockParameters) -> Result<()> {
        for mode in self.modes.iter_mut() {
            mode.new_parameters(parameters)?;
        }
        Ok(())
    }

    pub fn relock_deadline(&self) -> Option<Instant> {
        self.active_mode().relock_deadline()
    }

    pub fn handle_relock_timer(&mut self) {
        self.mode_mut().handle_relock_timer();
    }

    pub fn is_good_lock(&self) -> bool {
        self.active_mode().is_good_lock()
    }

    pub fn lock_target(&self) -> f64 {
        self.active_mode().lock_target()
    }

    pub fn should_enable_lock_button(&self) -> bool {
        self.active_mode().should_enable_lock_button()
    }

    pub fn status(&self) -> LockStatus {
        let mode = self.active_mode();
        LockStatus {
            mode: mode.name().to_string(),
            behavior: mode.behavior().to_string(),
            locked: mode.am_locked(),
            good_lock: mode.is_good_lock(),
            lock_target: mode.lock_target(),
            lock_button_enabled: mode.should_enable_lock_button(),
            film_id: self.film_id,
            stage_position: self.stage.current_position(),
        }
    }
}
