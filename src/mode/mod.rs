//! Lock modes.
//!
//! A mode decides *when* to lock (on film start, on a button, never) and
//! delegates *how* to the behaviors it is composed of. All modes share a
//! [`LockCore`] holding the behavior context and the relock timer.

mod auto;
mod calibration;
mod no_lock;
mod optimal;
#[cfg(test)]
mod tests;

pub use auto::{AlwaysOnLockMode, AutoLockMode};
pub use calibration::{calibration_trajectory, CalibrationLockMode, CALIBRATE};
pub use no_lock::NoLockMode;
pub use optimal::{OptimalLockMode, ScanPhase, OPTIMAL_MODE};

use crate::behavior::{BehaviorParams, LockBehavior, LockContext, LOCKED, NO_BEHAVIOR};
use crate::error::{FocusLockError, Result};
use crate::events::EventBus;
use crate::frame::Frame;
use crate::parameters::LockParameters;
use crate::sensor::QpdState;
use crate::stage::StageActuator;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Register the parameter sections owned by modes
pub fn add_parameters(parameters: &mut LockParameters) -> Result<()> {
    OptimalLockMode::add_parameters(parameters)?;
    CalibrationLockMode::add_parameters(parameters)?;
    Ok(())
}

/// Delay after a focus jump before locking resumes
pub const RELOCK_DELAY: Duration = Duration::from_millis(200);

/// State and plumbing shared by every lock mode
pub struct LockCore {
    ctx: LockContext,
    behaviors: Vec<Box<dyn LockBehavior>>,
    relock_deadline: Option<Instant>,
}

impl LockCore {
    pub fn new(
        name: &'static str,
        stage: Arc<dyn StageActuator>,
        events: EventBus,
        behaviors: Vec<Box<dyn LockBehavior>>,
    ) -> Self {
        Self {
            ctx: LockContext::new(name, stage, events),
            behaviors,
            relock_deadline: None,
        }
    }

    pub fn context(&self) -> &LockContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut LockContext {
        &mut self.ctx
    }

    /// Every behavior key this mode accepts, including [`NO_BEHAVIOR`]
    pub fn behavior_names(&self) -> Vec<&'static str> {
        std::iter::once(NO_BEHAVIOR)
            .chain(self.behaviors.iter().map(|b| b.name()))
            .collect()
    }

    pub fn has_behavior(&self, name: &str) -> bool {
        self.behaviors.iter().any(|b| b.name() == name)
    }

    pub fn handle_qpd_update(&mut self, qpd_state: &QpdState) {
        self.ctx.set_qpd_state(*qpd_state);
        for behavior in self.behaviors.iter_mut() {
            behavior.handle_qpd_update(&mut self.ctx, qpd_state);
        }
    }

    pub fn handle_new_frame(&mut self, frame: &Frame) {
        for behavior in self.behaviors.iter_mut() {
            behavior.handle_new_frame(&mut self.ctx, frame);
        }
    }

    pub fn new_parameters(&mut self, parameters: &LockParameters) -> Result<()> {
        for behavior in self.behaviors.iter_mut() {
            behavior.new_parameters(parameters)?;
        }
        Ok(())
    }

    /// Engage the locked behavior, holding `target` or else the current
    /// offset
    pub fn start_lock(&mut self, target: Option<f64>) {
        self.relock_deadline = None;
        self.ctx.set_lock_status(false);
        for behavior in self.behaviors.iter_mut() {
            behavior.on_lock_start();
        }
        self.ctx.set_behavior(LOCKED);

        match target.or_else(|| self.ctx.qpd_state().map(|qpd| qpd.offset)) {
            Some(target) => self.ctx.set_lock_target(target),
            None => debug!(
                "[{}] no QPD reading yet, keeping lock target {}",
                self.ctx.mode_name(),
                self.ctx.lock_target()
            ),
        }
        info!("[{}] lock started", self.ctx.mode_name());
    }

    /// Disengage, recenter the stage and mark the lock bad
    pub fn stop_lock(&mut self) {
        self.relock_deadline = None;
        self.ctx.set_behavior(NO_BEHAVIOR);
        self.ctx.stage().recenter();
        self.ctx.set_lock_status(false);
        info!("[{}] lock stopped", self.ctx.mode_name());
    }

    /// Run a named behavior. Unknown names fail before any state changes.
    pub fn start_behavior(&mut self, name: &str, params: &BehaviorParams) -> Result<()> {
        if name != NO_BEHAVIOR && !self.has_behavior(name) {
            return Err(FocusLockError::UnknownBehavior {
                mode: self.ctx.mode_name().to_string(),
                behavior: name.to_string(),
            });
        }

        self.relock_deadline = None;
        self.ctx.set_lock_status(false);

        if name == NO_BEHAVIOR {
            self.ctx.set_behavior(NO_BEHAVIOR);
            return Ok(());
        }

        for behavior in self.behaviors.iter_mut() {
            if behavior.name() == name {
                behavior.start_behavior(&mut self.ctx, params)?;
                self.ctx.set_behavior(behavior.name());
            }
        }
        Ok(())
    }

    /// Apply a focus jump. If locking is engaged it pauses and resumes
    /// [`RELOCK_DELAY`] after the last jump.
    pub fn handle_jump(&mut self, delta: f64) {
        if self.ctx.is_active(LOCKED) || self.relock_deadline.is_some() {
            self.ctx.set_behavior(NO_BEHAVIOR);
            self.relock_deadline = Some(Instant::now() + RELOCK_DELAY);
            debug!(
                "[{}] jump of {}, relocking in {:?}",
                self.ctx.mode_name(),
                delta,
                RELOCK_DELAY
            );
        }
        self.ctx.stage().go_relative(delta);
    }

    pub fn relock_deadline(&self) -> Option<Instant> {
        self.relock_deadline
    }

    /// Clear a pending relock, reporting whether one was pending
    pub fn take_relock(&mut self) -> bool {
        self.relock_deadline.take().is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.ctx.is_active(LOCKED)
    }
}

/// A lock mode as seen by the session
pub trait LockMode: Send {
    /// Display name, unique across registered modes
    fn name(&self) -> &'static str;

    fn core(&self) -> &LockCore;

    fn core_mut(&mut self) -> &mut LockCore;

    /// Called when the mode becomes the active one
    fn initialize(&mut self) {}

    fn handle_qpd_update(&mut self, qpd_state: &QpdState) {
        self.core_mut().handle_qpd_update(qpd_state);
    }

    fn handle_new_frame(&mut self, frame: &Frame) {
        self.core_mut().handle_new_frame(frame);
    }

    fn handle_jump(&mut self, delta: f64) {
        self.core_mut().handle_jump(delta);
    }

    /// The relock deadline passed
    fn handle_relock_timer(&mut self) {
        if self.core_mut().take_relock() {
            self.start_lock(None);
        }
    }

    fn new_parameters(&mut self, parameters: &LockParameters) -> Result<()> {
        self.core_mut().new_parameters(parameters)
    }

    /// Whether the user may start and stop locking directly
    fn should_enable_lock_button(&self) -> bool {
        false
    }

    fn start_film(&mut self) {}

    fn stop_film(&mut self) {}

    fn start_lock(&mut self, target: Option<f64>) {
        self.core_mut().start_lock(target);
    }

    fn stop_lock(&mut self) {
        self.core_mut().stop_lock();
    }

    fn start_lock_behavior(&mut self, name: &str, params: &BehaviorParams) -> Result<()> {
        self.core_mut().start_behavior(name, params)
    }

    fn am_locked(&self) -> bool {
        self.core().is_locked()
    }

    /// Locked, waiting to relock, or otherwise holding the stage
    fn is_engaged(&self) -> bool {
        self.am_locked() || self.core().relock_deadline().is_some()
    }

    fn behavior(&self) -> &'static str {
        self.core().context().behavior()
    }

    fn is_good_lock(&self) -> bool {
        self.core().context().good_lock()
    }

    fn lock_target(&self) -> f64 {
        self.core().context().lock_target()
    }

    fn relock_deadline(&self) -> Option<Instant> {
        self.core().relock_deadline()
    }
}
