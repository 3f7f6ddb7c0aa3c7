use super::{LockCore, LockMode};
use crate::behavior::jump_lock_behaviors;
use crate::events::EventBus;
use crate::stage::StageActuator;
use std::sync::Arc;
use tracing::debug;

/// Locks for exactly the duration of each film
pub struct AutoLockMode {
    core: LockCore,
}

impl AutoLockMode {
    pub const NAME: &'static str = "Auto Lock";

    pub fn new(stage: Arc<dyn StageActuator>, events: EventBus) -> Self {
        Self {
            core: LockCore::new(Self::NAME, stage, events, jump_lock_behaviors()),
        }
    }
}

impl LockMode for AutoLockMode {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn core(&self) -> &LockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut LockCore {
        &mut self.core
    }

    fn start_film(&mut self) {
        self.start_lock(None);
    }

    fn stop_film(&mut self) {
        self.stop_lock();
    }
}

/// User controlled lock. A film started while unlocked engages the lock for
/// that film only.
pub struct AlwaysOnLockMode {
    core: LockCore,
    name: &'static str,
    film_on: bool,
}

impl AlwaysOnLockMode {
    pub const NAME: &'static str = "Always On";

    pub fn new(stage: Arc<dyn StageActuator>, events: EventBus) -> Self {
        Self::named(Self::NAME, stage, events)
    }

    /// Build the same control logic under another mode name
    pub(super) fn named(
        name: &'static str,
        stage: Arc<dyn StageActuator>,
        events: EventBus,
    ) -> Self {
        Self {
            core: LockCore::new(name, stage, events, jump_lock_behaviors()),
            name,
            film_on: false,
        }
    }

    /// Whether the lock was engaged by the current film
    pub fn film_on(&self) -> bool {
        self.film_on
    }
}

impl LockMode for AlwaysOnLockMode {
    fn name(&self) -> &'static str {
        self.name
    }

    fn core(&self) -> &LockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut LockCore {
        &mut self.core
    }

    fn initialize(&mut self) {
        self.film_on = false;
    }

    fn should_enable_lock_button(&self) -> bool {
        true
    }

    fn start_film(&mut self) {
        if !self.am_locked() {
            debug!("[{}] locking for the film", self.name);
            self.film_on = true;
            self.start_lock(None);
        }
    }

    fn stop_film(&mut self) {
        if self.film_on {
            self.film_on = false;
            self.stop_lock();
        }
    }
}
