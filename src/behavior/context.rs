use crate::events::{EventBus, FocusLockEvent};
use crate::sensor::QpdState;
use crate::stage::StageActuator;
use std::sync::Arc;
use tracing::{debug, info};

/// Active-behavior key meaning "not running any behavior"
pub const NO_BEHAVIOR: &str = "none";

/// State shared by a lock mode and the behaviors composed into it.
///
/// Behaviors receive this on every call and self-gate on
/// [`LockContext::is_active`].
pub struct LockContext {
    mode_name: &'static str,
    behavior: &'static str,
    good_lock: bool,
    lock_target: f64,
    qpd_state: Option<QpdState>,
    stage: Arc<dyn StageActuator>,
    events: EventBus,
}

impl LockContext {
    pub fn new(mode_name: &'static str, stage: Arc<dyn StageActuator>, events: EventBus) -> Self {
        Self {
            mode_name,
            behavior: NO_BEHAVIOR,
            good_lock: false,
            lock_target: 0.0,
            qpd_state: None,
            stage,
            events,
        }
    }

    pub fn mode_name(&self) -> &'static str {
        self.mode_name
    }

    /// Key of the running behavior, or [`NO_BEHAVIOR`]
    pub fn behavior(&self) -> &'static str {
        self.behavior
    }

    pub fn is_active(&self, behavior: &str) -> bool {
        self.behavior == behavior
    }

    pub fn set_behavior(&mut self, behavior: &'static str) {
        if self.behavior != behavior {
            debug!(
                "[{}] behavior {} -> {}",
                self.mode_name, self.behavior, behavior
            );
            self.behavior = behavior;
        }
    }

    pub fn good_lock(&self) -> bool {
        self.good_lock
    }

    /// Update lock quality, notifying only when the value changes
    pub fn set_lock_status(&mut self, good_lock: bool) {
        if self.good_lock != good_lock {
            self.good_lock = good_lock;
            info!(
                "[{}] lock is {}",
                self.mode_name,
                if good_lock { "good" } else { "bad" }
            );
            self.events
                .emit(FocusLockEvent::GoodLockChanged { good_lock });
        }
    }

    pub fn lock_target(&self) -> f64 {
        self.lock_target
    }

    /// Update the lock target. Always notifies.
    pub fn set_lock_target(&mut self, target: f64) {
        self.lock_target = target;
        debug!("[{}] lock target {:.4}", self.mode_name, target);
        self.events
            .emit(FocusLockEvent::LockTargetChanged { target });
    }

    /// Most recent QPD reading seen by this mode
    pub fn qpd_state(&self) -> Option<QpdState> {
        self.qpd_state
    }

    pub fn set_qpd_state(&mut self, qpd_state: QpdState) {
        self.qpd_state = Some(qpd_state);
    }

    pub fn stage(&self) -> &dyn StageActuator {
        self.stage.as_ref()
    }

    /// Deactivate the running behavior and report its outcome
    pub fn finish(&mut self, success: bool) {
        self.set_behavior(NO_BEHAVIOR);
        self.events.emit(FocusLockEvent::LockFinished { success });
    }

    pub fn emit(&self, event: FocusLockEvent) {
        self.events.emit(event);
    }
}
