use super::{AlwaysOnLockMode, LockCore, LockMode};
use crate::behavior::{BehaviorParams, NO_BEHAVIOR};
use crate::error::Result;
use crate::events::{EventBus, FocusLockEvent};
use crate::fitting::fit_gaussian;
use crate::frame::Frame;
use crate::parameters::{LockParameters, Parameter};
use crate::quality::FocusQuality;
use crate::stage::StageActuator;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const OPTIMAL_MODE: &str = "optimal_mode";

/// Starting guess for the inverse width squared of the quality peak
const INITIAL_INVERSE_WIDTH: f64 = 9.0;

/// Position of the optimal-lock scan within its triangle wave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    ScanUp,
    ScanDown,
    Zero,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct OptimalSettings {
    /// Half-height of the scan, micrometers
    bracket_step: f64,
    quality_threshold: f64,
    /// Stage step, micrometers
    scan_step: f64,
    scan_hold: usize,
}

impl Default for OptimalSettings {
    fn default() -> Self {
        Self {
            bracket_step: 1.0,
            quality_threshold: 0.0,
            scan_step: 0.1,
            scan_hold: 10,
        }
    }
}

impl OptimalSettings {
    /// Scan steps needed to cover the bracket
    fn bracket_steps(&self) -> i64 {
        ((self.bracket_step / self.scan_step) - 1e-9).ceil().max(0.0) as i64
    }

    fn sample_estimate(&self) -> usize {
        (6.0 * self.scan_hold as f64 * (self.bracket_step / self.scan_step)).round() as usize
    }
}

struct OptimalScan {
    phase: ScanPhase,
    /// Scan position in units of `scan_step`
    relative_steps: i64,
    bracket_steps: i64,
    offsets: Vec<f64>,
    qualities: Vec<f64>,
    estimate: usize,
    overflow_reported: bool,
}

impl OptimalScan {
    fn new(settings: &OptimalSettings) -> Self {
        let estimate = settings.sample_estimate();
        Self {
            phase: ScanPhase::ScanUp,
            relative_steps: 0,
            bracket_steps: settings.bracket_steps(),
            offsets: Vec::with_capacity(estimate),
            qualities: Vec::with_capacity(estimate),
            estimate,
            overflow_reported: false,
        }
    }

    fn record(&mut self, offset: f64, quality: f64) {
        if self.offsets.len() == self.estimate && !self.overflow_reported {
            warn!(
                "Optimal lock scan exceeded its estimated {} samples",
                self.estimate
            );
            self.overflow_reported = true;
        }
        self.offsets.push(offset);
        self.qualities.push(quality);
    }

    /// Offset of the best fit center, or of the best sample if the fit fails
    fn optimum(&self) -> (f64, bool) {
        let (best, min_q, max_q) = self.qualities.iter().enumerate().fold(
            (0, f64::INFINITY, f64::NEG_INFINITY),
            |(best, min_q, max_q), (i, &q)| {
                if q > max_q {
                    (i, min_q.min(q), q)
                } else {
                    (best, min_q.min(q), max_q)
                }
            },
        );
        let best_offset = self.offsets.get(best).copied().unwrap_or(0.0);

        let initial = [min_q, max_q - min_q, best_offset, INITIAL_INVERSE_WIDTH];
        let fit = fit_gaussian(&self.offsets, &self.qualities, initial);
        if fit.success && fit.center().is_finite() {
            debug!(
                "Optimal lock fit {:?} after {} iterations",
                fit.params, fit.iterations
            );
            (fit.center(), true)
        } else {
            warn!("Fit for optimal lock failed, using the best sample");
            (best_offset, false)
        }
    }
}

/// Always-on locking that, at the start of each film, scans the stage
/// through a triangle wave, fits image quality against QPD offset and locks
/// on the offset of best focus.
pub struct OptimalLockMode {
    base: AlwaysOnLockMode,
    quality: Arc<dyn FocusQuality>,
    settings: OptimalSettings,
    scan: Option<OptimalScan>,
}

impl OptimalLockMode {
    pub const NAME: &'static str = "Optimal";

    pub fn new(
        stage: Arc<dyn StageActuator>,
        events: EventBus,
        quality: Arc<dyn FocusQuality>,
    ) -> Self {
        Self {
            base: AlwaysOnLockMode::named(Self::NAME, stage, events),
            quality,
            settings: OptimalSettings::default(),
            scan: None,
        }
    }

    pub fn add_parameters(parameters: &mut LockParameters) -> Result<()> {
        parameters
            .add_subsection(OPTIMAL_MODE)?
            .add(Parameter::range_float(
                "bracket_step",
                "Distance +- z in nanometers",
                1000.0,
                10.0,
                10000.0,
            ))?
            .add(Parameter::range_float(
                "quality_threshold",
                "Minimum 'quality' signal",
                0.0,
                0.0,
                1000.0,
            ))?
            .add(Parameter::range_float(
                "scan_step",
                "Step size in z in nanometers",
                100.0,
                10.0,
                1000.0,
            ))?
            .add(Parameter::range_int(
                "scan_hold",
                "Frames to pause between steps",
                10,
                1,
                100,
            ))?;
        Ok(())
    }

    pub fn is_optimizing(&self) -> bool {
        self.scan.is_some()
    }

    pub fn scan_phase(&self) -> Option<ScanPhase> {
        self.scan.as_ref().map(|scan| scan.phase)
    }

    /// Samples recorded by the running scan
    pub fn sample_count(&self) -> usize {
        self.scan.as_ref().map_or(0, |scan| scan.offsets.len())
    }

    fn initialize_scan(&mut self) {
        info!(
            "Starting optimal lock scan, bracket {} um in steps of {} um",
            self.settings.bracket_step, self.settings.scan_step
        );
        self.scan = Some(OptimalScan::new(&self.settings));
    }

    fn advance_scan(&mut self, frame: &Frame) {
        let Some(scan) = self.scan.as_mut() else {
            return;
        };

        let quality = self.quality.quality(frame);
        if quality <= self.settings.quality_threshold {
            return;
        }
        let Some(qpd_state) = self.base.core().context().qpd_state() else {
            debug!("No QPD reading for frame {}, skipping", frame.number);
            return;
        };

        scan.record(qpd_state.offset, quality);
        if scan.offsets.len() % self.settings.scan_hold != 0 {
            return;
        }

        let step = self.settings.scan_step;
        let stage = self.base.core().context().stage();
        let finished = match scan.phase {
            ScanPhase::ScanUp => {
                if scan.relative_steps >= scan.bracket_steps {
                    scan.phase = ScanPhase::ScanDown;
                } else {
                    scan.relative_steps += 1;
                    stage.go_relative(step);
                }
                false
            }
            ScanPhase::ScanDown => {
                if scan.relative_steps <= -scan.bracket_steps {
                    scan.phase = ScanPhase::Zero;
                } else {
                    scan.relative_steps -= 1;
                    stage.go_relative(-step);
                }
                false
            }
            ScanPhase::Zero => {
                if scan.relative_steps >= 0 {
                    true
                } else {
                    scan.relative_steps += 1;
                    stage.go_relative(step);
                    false
                }
            }
        };

        if finished {
            self.finish_scan();
        }
    }

    fn finish_scan(&mut self) {
        let Some(scan) = self.scan.take() else {
            return;
        };
        let (target, fitted) = scan.optimum();
        info!(
            "Optimal target {:.4} from {} samples",
            target,
            scan.offsets.len()
        );
        self.base
            .core()
            .context()
            .emit(FocusLockEvent::OptimalTargetFound { target, fitted });
        self.start_lock(Some(target));
    }
}

impl LockMode for OptimalLockMode {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn core(&self) -> &LockCore {
        self.base.core()
    }

    fn core_mut(&mut self) -> &mut LockCore {
        self.base.core_mut()
    }

    fn initialize(&mut self) {
        self.base.initialize();
        self.scan = None;
    }

    fn handle_new_frame(&mut self, frame: &Frame) {
        self.base.handle_new_frame(frame);
        self.advance_scan(frame);
    }

    fn new_parameters(&mut self, parameters: &LockParameters) -> Result<()> {
        let section = parameters.section(OPTIMAL_MODE)?;
        let settings = OptimalSettings {
            bracket_step: 0.001 * section.get_f64("bracket_step")?,
            quality_threshold: section.get_f64("quality_threshold")?,
            scan_step: 0.001 * section.get_f64("scan_step")?,
            scan_hold: section.get_usize("scan_hold")?.max(1),
        };
        self.base.new_parameters(parameters)?;
        self.settings = settings;
        Ok(())
    }

    fn should_enable_lock_button(&self) -> bool {
        true
    }

    fn start_film(&mut self) {
        if self.am_locked() {
            self.core_mut().context_mut().set_behavior(NO_BEHAVIOR);
            self.initialize_scan();
        }
    }

    fn stop_film(&mut self) {
        self.base.stop_film();
    }

    fn start_lock(&mut self, target: Option<f64>) {
        if self.scan.take().is_some() {
            info!("Optimal lock scan abandoned for a direct lock");
        }
        self.base.start_lock(target);
    }

    fn stop_lock(&mut self) {
        if self.scan.take().is_some() {
            info!("Optimal lock scan abandoned");
        }
        self.base.stop_lock();
    }

    fn start_lock_behavior(&mut self, name: &str, params: &BehaviorParams) -> Result<()> {
        if self.scan.is_some() && self.base.core().has_behavior(name) {
            self.scan = None;
            info!("Optimal lock scan abandoned for behavior {}", name);
        }
        self.base.start_lock_behavior(name, params)
    }

    fn is_engaged(&self) -> bool {
        self.scan.is_some() || self.base.is_engaged()
    }
}
