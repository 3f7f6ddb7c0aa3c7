use super::{BehaviorParams, LockBehavior, LockContext};
use crate::error::{FocusLockError, Result};
use crate::parameters::{LockParameters, Parameter};
use crate::sensor::QpdState;
use tracing::{info, warn};

pub const FIND_SUM: &str = "find_sum";

/// The sum must reach this fraction of the requested level for a failed
/// search to still park at its best position
const MINIMUM_SUM_FRACTION: f64 = 0.1;

/// Once past a peak, a drop below this fraction of it ends the search
const PEAK_DROP_FRACTION: f64 = 0.5;

const DEFAULT_STEP_SIZE: f64 = 1.0;

/// Sweep the stage from its lower limit upwards looking for a usable QPD
/// sum, then park at the position of the strongest reading.
pub struct FindSumBehavior {
    configured_step: f64,
    step_size: f64,
    requested_sum: f64,
    min_sum: f64,
    max_pos: f64,
    max_sum: f64,
    max_z: f64,
}

impl FindSumBehavior {
    pub fn new() -> Self {
        Self {
            configured_step: DEFAULT_STEP_SIZE,
            step_size: DEFAULT_STEP_SIZE,
            requested_sum: 0.0,
            min_sum: 0.0,
            max_pos: 0.0,
            max_sum: 0.0,
            max_z: 0.0,
        }
    }

    pub fn add_parameters(parameters: &mut LockParameters) -> Result<()> {
        parameters.add_subsection(FIND_SUM)?.add(Parameter::range_float(
            "step_size",
            "Step size for find sum search",
            DEFAULT_STEP_SIZE,
            0.1,
            10.0,
        ))?;
        Ok(())
    }

    /// Step the search is currently using
    pub fn step_size(&self) -> f64 {
        self.step_size
    }
}

impl Default for FindSumBehavior {
    fn default() -> Self {
        Self::new()
    }
}

impl LockBehavior for FindSumBehavior {
    fn name(&self) -> &'static str {
        FIND_SUM
    }

    fn handle_qpd_update(&mut self, ctx: &mut LockContext, qpd_state: &QpdState) {
        if !ctx.is_active(FIND_SUM) {
            return;
        }

        let power = qpd_state.sum;
        let z_pos = ctx.stage().current_position();

        if power > self.max_sum {
            self.max_sum = power;
            self.max_pos = z_pos;
        }

        if self.max_sum > self.requested_sum && power < PEAK_DROP_FRACTION * self.max_sum {
            info!(
                "Found sum {:.2} at z {:.3}",
                self.max_sum, self.max_pos
            );
            ctx.stage().go_absolute(self.max_pos);
            ctx.finish(true);
        } else if z_pos >= self.max_z {
            if self.max_sum > self.min_sum {
                warn!(
                    "Sum search reached the stage limit, best sum {:.2} at z {:.3}",
                    self.max_sum, self.max_pos
                );
                ctx.stage().go_absolute(self.max_pos);
            } else {
                warn!("Sum search found no signal, recentering");
                ctx.stage().recenter();
            }
            ctx.finish(false);
        } else {
            ctx.stage().go_relative(self.step_size);
        }
    }

    fn start_behavior(&mut self, ctx: &mut LockContext, params: &BehaviorParams) -> Result<()> {
        let requested_sum =
            params
                .requested_sum
                .ok_or_else(|| FocusLockError::MissingBehaviorParameter {
                    behavior: FIND_SUM.to_string(),
                    parameter: "requested_sum".to_string(),
                })?;

        self.requested_sum = requested_sum;
        self.min_sum = MINIMUM_SUM_FRACTION * requested_sum;
        self.step_size = params.step_size.unwrap_or(self.configured_step);
        self.max_pos = 0.0;
        self.max_sum = 0.0;
        self.max_z = ctx.stage().maximum();

        let min_z = ctx.stage().minimum();
        info!(
            "Searching for sum {:.2} from z {:.3} in steps of {:.3}",
            requested_sum, min_z, self.step_size
        );
        ctx.stage().go_absolute(min_z);
        Ok(())
    }

    fn new_parameters(&mut self, parameters: &LockParameters) -> Result<()> {
        self.configured_step = parameters.section(FIND_SUM)?.get_f64("step_size")?;
        Ok(())
    }
}
