//! Z stage actuator interface and implementations.
//!
//! Motion commands are fire-and-forget: the lock logic never waits for a
//! move to complete and hardware faults are the actuator's own business.

use crate::config::StageConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// A motion request sent to the stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StageCommand {
    GoAbsolute(f64),
    GoRelative(f64),
    Recenter,
}

/// The z stage as seen by the lock logic. Positions are in micrometers.
pub trait StageActuator: Send + Sync {
    fn go_absolute(&self, position: f64);

    fn go_relative(&self, delta: f64);

    fn current_position(&self) -> f64;

    fn minimum(&self) -> f64;

    fn maximum(&self) -> f64;

    /// Return to the home position
    fn recenter(&self);

    fn execute(&self, command: StageCommand) {
        match command {
            StageCommand::GoAbsolute(position) => self.go_absolute(position),
            StageCommand::GoRelative(delta) => self.go_relative(delta),
            StageCommand::Recenter => self.recenter(),
        }
    }
}

#[derive(Debug)]
struct SimulatedStageState {
    position: f64,
    commands: Vec<StageCommand>,
}

/// In-memory stage that clamps to its travel limits and keeps a log of
/// every command it received
#[derive(Debug)]
pub struct SimulatedStage {
    minimum: f64,
    maximum: f64,
    center: f64,
    state: Mutex<SimulatedStageState>,
}

impl SimulatedStage {
    pub fn new(minimum: f64, maximum: f64, center: f64) -> Self {
        Self {
            minimum,
            maximum,
            center,
            state: Mutex::new(SimulatedStageState {
                position: center,
                commands: Vec::new(),
            }),
        }
    }

    pub fn from_config(config: &StageConfig) -> Self {
        Self::new(config.minimum, config.maximum, config.center)
    }

    pub fn center(&self) -> f64 {
        self.center
    }

    /// Every command received so far, oldest first
    pub fn commands(&self) -> Vec<StageCommand> {
        self.state.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    fn apply(&self, command: StageCommand) {
        let mut state = self.state.lock();
        let target = match command {
            StageCommand::GoAbsolute(position) => position,
            StageCommand::GoRelative(delta) => state.position + delta,
            StageCommand::Recenter => self.center,
        };
        state.position = target.clamp(self.minimum, self.maximum);
        state.commands.push(command);
        trace!("Stage {:?} -> {:.4}", command, state.position);
    }
}

impl StageActuator for SimulatedStage {
    fn go_absolute(&self, position: f64) {
        self.apply(StageCommand::GoAbsolute(position));
    }

    fn go_relative(&self, delta: f64) {
        self.apply(StageCommand::GoRelative(delta));
    }

    fn current_position(&self) -> f64 {
        self.state.lock().position
    }

    fn minimum(&self) -> f64 {
        self.minimum
    }

    fn maximum(&self) -> f64 {
        self.maximum
    }

    fn recenter(&self) {
        self.apply(StageCommand::Recenter);
    }
}

/// Forwards motion commands through an unbounded queue to a task that
/// drives the wrapped actuator. The queue is never drained synchronously, so
/// a slow actuator lets it grow without limit.
///
/// `current_position` reports the target of the last queued command, which
/// is what the lock logic needs for relative bookkeeping.
pub struct QueuedStage {
    sender: mpsc::UnboundedSender<StageCommand>,
    commanded: Mutex<f64>,
    minimum: f64,
    maximum: f64,
    center: f64,
}

impl QueuedStage {
    /// Wrap `inner`, spawning the task that applies queued commands
    pub fn spawn<S>(inner: Arc<S>, center: f64) -> (Self, JoinHandle<()>)
    where
        S: StageActuator + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<StageCommand>();
        let minimum = inner.minimum();
        let maximum = inner.maximum();
        let commanded = inner.current_position();

        let handle = tokio::spawn(async move {
            info!("Stage command task started");
            while let Some(command) = receiver.recv().await {
                inner.execute(command);
            }
            debug!("Stage command queue closed");
        });

        (
            Self {
                sender,
                commanded: Mutex::new(commanded),
                minimum,
                maximum,
                center,
            },
            handle,
        )
    }

    fn send(&self, command: StageCommand) {
        let mut commanded = self.commanded.lock();
        let target = match command {
            StageCommand::GoAbsolute(position) => position,
            StageCommand::GoRelative(delta) => *commanded + delta,
            StageCommand::Recenter => self.center,
        };
        *commanded = target.clamp(self.minimum, self.maximum);
        if self.sender.send(command).is_err() {
            debug!("Stage command task gone, dropping {:?}", command);
        }
    }
}

impl StageActuator for QueuedStage {
    fn go_absolute(&self, position: f64) {
        self.send(StageCommand::GoAbsolute(position));
    }

    fn go_relative(&self, delta: f64) {
        self.send(StageCommand::GoRelative(delta));
    }

    fn current_position(&self) -> f64 {
        *self.commanded.lock()
    }

    fn minimum(&self) -> f64 {
        self.minimum
    }

    fn maximum(&self) -> f64 {
        self.maximum
    }

    fn recenter(&self) {
        self.send(StageCommand::Recenter);
    }
}
