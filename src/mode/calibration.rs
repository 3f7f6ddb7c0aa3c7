use super::{LockCore, LockMode};
use crate::behavior::jump_lock_behaviors;
use crate::error::Result;
use crate::events::EventBus;
use crate::frame::Frame;
use crate::parameters::{LockParameters, Parameter};
use crate::stage::StageActuator;
use std::sync::Arc;
use tracing::{debug, info};

pub const CALIBRATE: &str = "calibrate";

/// Relative stage moves, one per frame, for a calibration sweep.
///
/// The sweep holds for `deadtime` frames, drops to `-range`, climbs back in
/// `step_size` increments pausing `frames_to_pause` frames per step, drops
/// to the start again and holds. `range` and `step_size` are nanometers,
/// the returned moves are micrometers. The moves sum to zero.
pub fn calibration_trajectory(
    z_center: f64,
    deadtime: usize,
    range: f64,
    step_size: f64,
    frames_to_pause: usize,
) -> Vec<f64> {
    let range = 0.001 * range;
    let step_size = 0.001 * step_size;
    let hold = deadtime.saturating_sub(1);
    let pause = frames_to_pause.saturating_sub(1);

    // Steps taken while z = -range + k * step stays below range - step / 2.
    let steps = if step_size > 0.0 {
        ((2.0 * range / step_size) - 0.5).ceil().max(0.0) as usize
    } else {
        0
    };

    let mut trajectory = Vec::with_capacity(2 * hold + 2 + steps * frames_to_pause.max(1));
    trajectory.extend(std::iter::repeat(z_center).take(hold));
    trajectory.push(-range);
    for _ in 0..steps {
        trajectory.extend(std::iter::repeat(0.0).take(pause));
        trajectory.push(step_size);
    }
    trajectory.push(-range);
    trajectory.extend(std::iter::repeat(z_center).take(hold));
    trajectory
}

/// Never locks. Each film drives the stage through a fixed calibration
/// sweep, one move per camera frame.
pub struct CalibrationLockMode {
    core: LockCore,
    trajectory: Vec<f64>,
    counter: usize,
    running: bool,
}

impl CalibrationLockMode {
    pub const NAME: &'static str = "Calibrate";

    pub fn new(stage: Arc<dyn StageActuator>, events: EventBus) -> Self {
        Self {
            core: LockCore::new(Self::NAME, stage, events, jump_lock_behaviors()),
            trajectory: Vec::new(),
            counter: 0,
            running: false,
        }
    }

    pub fn add_parameters(parameters: &mut LockParameters) -> Result<()> {
        parameters
            .add_subsection(CALIBRATE)?
            .add(Parameter::range_int(
                "frames_to_pause",
                "Frames to pause between steps",
                2,
                1,
                100,
            ))?
            .add(Parameter::range_int(
                "deadtime",
                "Frames to pause at the start and end",
                20,
                1,
                100,
            ))?
            .add(Parameter::range_float(
                "range",
                "Distance +- z to move in nanometers",
                600.0,
                100.0,
                5000.0,
            ))?
            .add(Parameter::range_float(
                "step_size",
                "Step size in z in nanometers",
                10.0,
                1.0,
                100.0,
            ))?;
        Ok(())
    }

    pub fn trajectory(&self) -> &[f64] {
        &self.trajectory
    }

    /// Moves still to be replayed in the current sweep
    pub fn remaining(&self) -> usize {
        if self.running {
            self.trajectory.len().saturating_sub(self.counter)
        } else {
            0
        }
    }
}

impl LockMode for CalibrationLockMode {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn core(&self) -> &LockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut LockCore {
        &mut self.core
    }

    fn initialize(&mut self) {
        if self.running {
            info!("Calibration sweep abandoned after {} frames", self.counter);
        }
        self.running = false;
        self.counter = 0;
    }

    fn handle_new_frame(&mut self, frame: &Frame) {
        self.core.handle_new_frame(frame);
        if !self.running {
            return;
        }

        match self.trajectory.get(self.counter) {
            Some(&delta) => {
                self.core.context().stage().go_relative(delta);
                self.counter += 1;
            }
            None => {
                info!("Calibration sweep complete after {} frames", self.counter);
                self.running = false;
            }
        }
    }

    fn new_parameters(&mut self, parameters: &LockParameters) -> Result<()> {
        let section = parameters.section(CALIBRATE)?;
        let trajectory = calibration_trajectory(
            0.0,
            section.get_usize("deadtime")?,
            section.get_f64("range")?,
            section.get_f64("step_size")?,
            section.get_usize("frames_to_pause")?,
        );
        self.core.new_parameters(parameters)?;
        debug!("Calibration sweep of {} frames", trajectory.len());
        self.trajectory = trajectory;
        Ok(())
    }

    fn start_film(&mut self) {
        self.counter = 0;
        self.running = true;
    }
}
