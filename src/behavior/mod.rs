//! Self-contained lock behaviors.
//!
//! A lock mode composes an ordered list of behaviors and hands every QPD
//! update and frame to all of them. Each behavior acts only while the
//! mode's active-behavior key equals its own name, so switching the key is
//! all it takes to switch behavior.

mod context;
mod find_sum;
mod locked;

pub use context::{LockContext, NO_BEHAVIOR};
pub use find_sum::{FindSumBehavior, FIND_SUM};
pub use locked::{LockedBehavior, LockedSettings, LOCKED};

use crate::error::Result;
use crate::frame::Frame;
use crate::parameters::LockParameters;
use crate::sensor::QpdState;

/// Per-start overrides for a behavior. Anything left `None` falls back to
/// the behavior's configured tunables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BehaviorParams {
    /// `find_sum`: sum level that counts as found (required)
    pub requested_sum: Option<f64>,
    /// `find_sum`: stage step per update
    pub step_size: Option<f64>,
    /// `locked`: samples that must all be in range for a good lock
    pub buffer_length: Option<usize>,
    /// `locked`: sum below which updates count as misses
    pub minimum_sum: Option<f64>,
    /// `locked`: largest offset error still considered in lock, in nanometers
    pub offset_threshold: Option<f64>,
    /// `locked`: offset to hold, defaults to the current offset
    pub target: Option<f64>,
    /// `locked`: absolute stage position to move to before locking
    pub z_start: Option<f64>,
}

/// One named lock behavior.
pub trait LockBehavior: Send {
    /// Unique key, also the name of its parameter section
    fn name(&self) -> &'static str;

    /// React to a sensor reading. No-op unless this behavior is active.
    fn handle_qpd_update(&mut self, ctx: &mut LockContext, qpd_state: &QpdState);

    /// Prepare to run. Called just before the mode makes this behavior
    /// active.
    fn start_behavior(&mut self, ctx: &mut LockContext, params: &BehaviorParams) -> Result<()>;

    fn handle_new_frame(&mut self, _ctx: &mut LockContext, _frame: &Frame) {}

    /// Re-derive cached tunables from a parameter snapshot
    fn new_parameters(&mut self, _parameters: &LockParameters) -> Result<()> {
        Ok(())
    }

    /// Locking is (re)starting
    fn on_lock_start(&mut self) {}
}

/// Register the parameter sections of every behavior
pub fn add_parameters(parameters: &mut LockParameters) -> Result<()> {
    FindSumBehavior::add_parameters(parameters)?;
    LockedBehavior::add_parameters(parameters)?;
    Ok(())
}

/// The behaviors every locking mode carries, in dispatch order
pub fn jump_lock_behaviors() -> Vec<Box<dyn LockBehavior>> {
    vec![
        Box::new(FindSumBehavior::new()),
        Box::new(LockedBehavior::new()),
    ]
}
