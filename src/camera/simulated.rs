use super::{CameraSettings, CameraSource};
use crate::error::CameraError;
use crate::events::{EventBus, EventFilter, EventReceiver, FocusLockEvent};
use crate::frame::{Frame, FrameImage};
use crate::stage::StageActuator;
use async_trait::async_trait;
use image::Luma;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

const BACKGROUND: f64 = 1000.0;
const CONTRAST: f64 = 800.0;
/// Period of the test pattern in binned pixels
const PATTERN_PERIOD: u32 = 4;

/// Camera imaging a striped target. Contrast falls off as a Gaussian of the
/// distance between the stage and `focus_z`, so sharper frames mean better
/// focus.
pub struct SimulatedCamera {
    settings: CameraSettings,
    stage: Arc<dyn StageActuator>,
    focus_z: f64,
    depth_of_field: f64,
    ready: Arc<AtomicBool>,
    frame_counter: Arc<AtomicU64>,
    ticker: Interval,
    film_events: Option<EventReceiver>,
}

impl SimulatedCamera {
    /// Create the camera. Invalid settings are logged and leave the camera
    /// not ready instead of failing.
    pub fn new(settings: CameraSettings, stage: Arc<dyn StageActuator>, focus_z: f64) -> Self {
        let mut camera = Self {
            ticker: Self::ticker(settings.fps),
            settings: settings.clone(),
            stage,
            focus_z,
            depth_of_field: 1.0,
            ready: Arc::new(AtomicBool::new(false)),
            frame_counter: Arc::new(AtomicU64::new(0)),
            film_events: None,
        };
        if let Err(e) = camera.apply_settings(settings) {
            error!("Camera '{}' not ready: {}", camera.settings.source, e);
        }
        camera
    }

    /// Restart frame numbering whenever a film starts
    pub fn with_event_bus(mut self, event_bus: &EventBus) -> Self {
        self.film_events = Some(EventReceiver::new(
            event_bus.subscribe(),
            EventFilter::EventTypes(vec!["film_started"]),
            format!("camera:{}", self.settings.source),
        ));
        self
    }

    pub fn with_depth_of_field(mut self, depth_of_field: f64) -> Self {
        self.depth_of_field = depth_of_field.max(f64::EPSILON);
        self
    }

    fn ticker(fps: u32) -> Interval {
        let period = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    /// Validate and apply new settings. On failure the camera keeps the old
    /// settings but stops producing frames until valid settings arrive.
    pub fn apply_settings(&mut self, settings: CameraSettings) -> Result<(), CameraError> {
        if let Err(e) = settings.validate() {
            self.ready.store(false, Ordering::Relaxed);
            return Err(e);
        }

        let (width, height) = settings.frame_dimensions();
        info!(
            "Camera '{}' configured for {}x{} frames ({} bytes) at {} fps",
            settings.source,
            width,
            height,
            settings.frame_bytes(),
            settings.fps
        );
        if settings.fps != self.settings.fps {
            self.ticker = Self::ticker(settings.fps);
        }
        self.settings = settings;
        self.ready.store(true, Ordering::Relaxed);
        Ok(())
    }

    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_counter.load(Ordering::Relaxed)
    }

    pub fn reset_frame_counter(&self) {
        self.frame_counter.store(0, Ordering::Relaxed);
    }

    fn check_film_started(&mut self) {
        let Some(events) = self.film_events.as_mut() else {
            return;
        };
        let started = events
            .drain()
            .iter()
            .any(|event| matches!(event, FocusLockEvent::FilmStarted { .. }));
        if started {
            debug!("Film started, restarting frame numbers");
            self.reset_frame_counter();
        }
    }

    /// Render the striped target at the current stage position
    pub fn render(&self) -> FrameImage {
        let (width, height) = self.settings.frame_dimensions();
        let defocus = (self.stage.current_position() - self.focus_z) / self.depth_of_field;
        let contrast = CONTRAST * (-0.5 * defocus * defocus).exp();

        FrameImage::from_fn(width, height, |x, y| {
            let stripe = if ((x + y) / (PATTERN_PERIOD / 2)) % 2 == 0 {
                1.0
            } else {
                -1.0
            };
            let value = (BACKGROUND + stripe * contrast).clamp(0.0, u16::MAX as f64);
            Luma([value as u16])
        })
    }
}

#[async_trait]
impl CameraSource for SimulatedCamera {
    async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            self.ticker.tick().await;
            if self.ready.load(Ordering::Relaxed) {
                break;
            }
        }

        self.check_film_started();
        let number = self.frame_counter.fetch_add(1, Ordering::Relaxed);
        Some(Frame::new(number, self.settings.source.clone(), self.render()))
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    fn source_name(&self) -> &str {
        &self.settings.source
    }
}
