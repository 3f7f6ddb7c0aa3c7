//! QPD readings and the sensor sources that produce them.

use crate::config::SensorConfig;
use crate::stage::StageActuator;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Snapshot of the position sensing detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QpdState {
    /// Total signal intensity
    pub sum: f64,
    /// Focus error signal
    pub offset: f64,
    pub timestamp: DateTime<Utc>,
}

impl QpdState {
    pub fn new(sum: f64, offset: f64) -> Self {
        Self {
            sum,
            offset,
            timestamp: Utc::now(),
        }
    }
}

/// A lazy, unbounded sequence of QPD readings
#[async_trait]
pub trait SensorSource: Send {
    /// Wait for the next reading. `None` ends the sequence.
    async fn next_reading(&mut self) -> Option<QpdState>;

    fn source_name(&self) -> &str;
}

/// QPD model driven by the stage position. The offset is proportional to
/// the distance from focus, signed so that a relative stage move of `d`
/// shifts the offset by `-offset_gain * d`. The sum signal is a Gaussian
/// centred on focus.
pub struct SimulatedSensor {
    config: SensorConfig,
    stage: Arc<dyn StageActuator>,
    ticker: Interval,
    rng: StdRng,
}

impl SimulatedSensor {
    pub fn new(config: SensorConfig, stage: Arc<dyn StageActuator>) -> Self {
        let mut ticker = interval(Duration::from_millis(config.poll_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            config,
            stage,
            ticker,
            rng: StdRng::from_entropy(),
        }
    }

    /// Noise-free reading for a given stage position
    pub fn reading_at(config: &SensorConfig, position: f64) -> QpdState {
        let defocus = config.focus_z - position;
        let sum = config.peak_sum * (-0.5 * (defocus / config.sum_width).powi(2)).exp();
        QpdState::new(sum, config.offset_gain * defocus)
    }

    fn sample(&mut self) -> QpdState {
        let mut reading = Self::reading_at(&self.config, self.stage.current_position());
        if self.config.noise > 0.0 {
            reading.offset += self.config.noise * self.rng.gen_range(-0.5..0.5);
        }
        reading
    }
}

#[async_trait]
impl SensorSource for SimulatedSensor {
    async fn next_reading(&mut self) -> Option<QpdState> {
        self.ticker.tick().await;
        Some(self.sample())
    }

    fn source_name(&self) -> &str {
        "simulated_qpd"
    }
}
