use super::{BehaviorParams, LockBehavior, LockContext};
use crate::error::Result;
use crate::parameters::{LockParameters, Parameter};
use crate::sensor::QpdState;
use tracing::{debug, warn};

pub const LOCKED: &str = "locked";

/// Fraction of the offset error corrected on each update
const PROPORTIONAL_GAIN: f64 = 0.9;

/// Configured offset thresholds are in nanometers
const NM_TO_UM: f64 = 0.001;

const DEFAULT_OFFSET_THRESHOLD_NM: f64 = 20.0;

/// Tunables of the locked behavior, `offset_threshold` in micrometers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockedSettings {
    pub buffer_length: usize,
    pub minimum_sum: f64,
    pub offset_threshold: f64,
}

impl Default for LockedSettings {
    fn default() -> Self {
        Self {
            buffer_length: 5,
            minimum_sum: -1.0,
            offset_threshold: DEFAULT_OFFSET_THRESHOLD_NM * NM_TO_UM,
        }
    }
}

/// Proportional feedback that holds the QPD offset at the lock target.
///
/// A lock is good once the last `buffer_length` updates all had enough sum
/// and an offset error below `offset_threshold`.
pub struct LockedBehavior {
    /// Values from the last parameter snapshot
    configured: LockedSettings,
    /// Configured values with per-start overrides applied
    active: LockedSettings,
    buffer: Vec<bool>,
    counter: usize,
}

impl LockedBehavior {
    pub fn new() -> Self {
        let settings = LockedSettings::default();
        Self {
            configured: settings,
            active: settings,
            buffer: vec![false; settings.buffer_length],
            counter: 0,
        }
    }

    pub fn add_parameters(parameters: &mut LockParameters) -> Result<()> {
        let defaults = LockedSettings::default();
        parameters
            .add_subsection(LOCKED)?
            .add(
                Parameter::int(
                    "buffer_length",
                    "Number of repeats for the lock to be considered good",
                    defaults.buffer_length as i64,
                )
                .with_min(1.0),
            )?
            .add(Parameter::float(
                "minimum_sum",
                "Minimum sum for the lock to count as good, -1 for none",
                defaults.minimum_sum,
            ))?
            .add(Parameter::float(
                "offset_threshold",
                "Maximum offset from the target that is still in lock in nanometers",
                DEFAULT_OFFSET_THRESHOLD_NM,
            ))?;
        Ok(())
    }

    pub fn settings(&self) -> LockedSettings {
        self.active
    }

    fn reset_buffer(&mut self) {
        self.buffer.clear();
        self.buffer.resize(self.active.buffer_length, false);
        self.counter = 0;
    }
}

impl Default for LockedBehavior {
    fn default() -> Self {
        Self::new()
    }
}

impl LockBehavior for LockedBehavior {
    fn name(&self) -> &'static str {
        LOCKED
    }

    fn handle_qpd_update(&mut self, ctx: &mut LockContext, qpd_state: &QpdState) {
        if !ctx.is_active(LOCKED) {
            return;
        }

        let in_range = if qpd_state.sum > self.active.minimum_sum {
            let diff = qpd_state.offset - ctx.lock_target();
            ctx.stage().go_relative(PROPORTIONAL_GAIN * diff);
            diff.abs() < self.active.offset_threshold
        } else {
            false
        };

        if self.buffer.is_empty() {
            self.reset_buffer();
        }
        self.buffer[self.counter] = in_range;
        self.counter = (self.counter + 1) % self.buffer.len();

        let good_lock = self.buffer.iter().all(|&sample| sample);
        ctx.set_lock_status(good_lock);
    }

    fn start_behavior(&mut self, ctx: &mut LockContext, params: &BehaviorParams) -> Result<()> {
        self.active = LockedSettings {
            buffer_length: params
                .buffer_length
                .unwrap_or(self.configured.buffer_length)
                .max(1),
            minimum_sum: params.minimum_sum.unwrap_or(self.configured.minimum_sum),
            offset_threshold: params
                .offset_threshold
                .map_or(self.configured.offset_threshold, |nm| nm * NM_TO_UM),
        };

        let target = match params.target {
            Some(target) => target,
            None => match ctx.qpd_state() {
                Some(qpd_state) => qpd_state.offset,
                None => {
                    warn!("No QPD reading yet, keeping lock target {}", ctx.lock_target());
                    ctx.lock_target()
                }
            },
        };
        ctx.set_lock_target(target);

        if let Some(z_start) = params.z_start {
            ctx.stage().go_absolute(z_start);
        }

        debug!("Locked behavior starting with {:?}", self.active);
        self.reset_buffer();
        Ok(())
    }

    fn new_parameters(&mut self, parameters: &LockParameters) -> Result<()> {
        let section = parameters.section(LOCKED)?;
        let settings = LockedSettings {
            buffer_length: section.get_usize("buffer_length")?,
            minimum_sum: section.get_f64("minimum_sum")?,
            offset_threshold: NM_TO_UM * section.get_f64("offset_threshold")?,
        };

        let resized = settings.buffer_length != self.active.buffer_length;
        self.configured = settings;
        self.active = settings;
        if resized {
            self.reset_buffer();
        }
        Ok(())
    }

    fn on_lock_start(&mut self) {
        self.reset_buffer();
    }
}
