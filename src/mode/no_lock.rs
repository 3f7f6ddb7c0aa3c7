use super::{LockCore, LockMode};
use crate::events::EventBus;
use crate::stage::StageActuator;
use std::sync::Arc;
use tracing::warn;

/// Manual focus only. Jumps move the stage straight away and the lock
/// never engages.
pub struct NoLockMode {
    core: LockCore,
}

impl NoLockMode {
    pub const NAME: &'static str = "No lock";

    pub fn new(stage: Arc<dyn StageActuator>, events: EventBus) -> Self {
        Self {
            core: LockCore::new(Self::NAME, stage, events, Vec::new()),
        }
    }
}

impl LockMode for NoLockMode {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn core(&self) -> &LockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut LockCore {
        &mut self.core
    }

    fn handle_jump(&mut self, delta: f64) {
        self.core.context().stage().go_relative(delta);
    }

    fn start_lock(&mut self, _target: Option<f64>) {
        warn!("'{}' mode cannot lock", Self::NAME);
    }

    fn lock_target(&self) -> f64 {
        0.0
    }
}
