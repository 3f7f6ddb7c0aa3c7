use super::{ComponentState, FocusLockOrchestrator};
use crate::camera::{CameraSettings, CameraSource, SimulatedCamera};
use crate::error::{FocusLockError, Result};
use crate::events::FocusLockEvent;
use crate::keyboard_input::{KeyboardController, KeyboardInputHandler};
use crate::quality::GradientQuality;
use crate::sensor::SimulatedSensor;
use crate::session::{pump_frames, pump_readings, LockSession, SessionWorker};
use crate::stage::{QueuedStage, StageActuator};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

/// Distance moved by one keyboard jump, in um
const KEYBOARD_JUMP_SIZE: f64 = 0.5;

impl FocusLockOrchestrator {
    /// Build the lock session and start its worker
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing focus lock components");

        let mut states = self.component_states.lock().await;
        for component in ["stage", "session", "sensor", "camera"] {
            states.insert(component.to_string(), ComponentState::Stopped);
        }
        // Only register keyboard component if enabled
        if self.keyboard_enabled {
            states.insert("keyboard".to_string(), ComponentState::Stopped);
        }
        drop(states);

        self.set_component_state("stage", ComponentState::Starting)
            .await;
        let (queued_stage, stage_task) =
            QueuedStage::spawn(Arc::clone(&self.stage), self.config.stage.center);
        self.stage_task = Some(stage_task);
        self.set_component_state("stage", ComponentState::Running)
            .await;

        self.set_component_state("session", ComponentState::Starting)
            .await;
        let mut session = LockSession::new(
            Arc::new(queued_stage),
            self.event_bus.clone(),
            Arc::new(GradientQuality),
        )?;

        if !self.config.parameters.is_empty() {
            session.apply_overrides(&self.config.parameters).map_err(|e| {
                error!("Configured lock parameters rejected: {}", e);
                e
            })?;
            info!(
                "Applied parameter overrides for {} section(s)",
                self.config.parameters.len()
            );
        }
        session.select_mode(&self.config.session.initial_mode)?;

        let modes = session
            .mode_names()
            .into_iter()
            .map(String::from)
            .collect();
        let (handle, session_task) =
            SessionWorker::spawn(session, self.config.session.command_queue_capacity);

        if self.keyboard_enabled {
            self.keyboard_handler = Some(KeyboardInputHandler::new(KeyboardController::new(
                handle.clone(),
                self.event_bus.clone(),
                KEYBOARD_JUMP_SIZE,
                modes,
            )));
        }
        self.session = Some(handle);
        self.session_task = Some(session_task);
        self.set_component_state("session", ComponentState::Running)
            .await;

        info!("All components initialized successfully");
        Ok(())
    }

    /// Start the input feeds and, if enabled, the keyboard controls
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting focus lock system");
        let session = self.session()?;
        let stage: Arc<dyn StageActuator> = self.stage.clone();

        self.set_component_state("sensor", ComponentState::Starting)
            .await;
        let sensor = SimulatedSensor::new(self.config.sensor.clone(), Arc::clone(&stage));
        let feed = pump_readings(
            Box::new(sensor),
            session.clone(),
            self.cancellation_token.child_token(),
        );
        self.spawn_feed("sensor", feed);
        self.set_component_state("sensor", ComponentState::Running)
            .await;

        self.set_component_state("camera", ComponentState::Starting)
            .await;
        let camera = SimulatedCamera::new(
            CameraSettings::from_config(&self.config.camera),
            stage,
            self.config.sensor.focus_z,
        )
        .with_event_bus(&self.event_bus);
        if !camera.is_ready() {
            self.set_component_state("camera", ComponentState::Failed)
                .await;
            return Err(FocusLockError::component(
                "camera",
                "Camera settings were rejected",
            ));
        }
        let feed = pump_frames(
            Box::new(camera),
            session.clone(),
            self.cancellation_token.child_token(),
        );
        self.spawn_feed("camera", feed);
        self.set_component_state("camera", ComponentState::Running)
            .await;

        if self.keyboard_enabled {
            if let Some(keyboard_handler) = &self.keyboard_handler {
                self.set_component_state("keyboard", ComponentState::Starting)
                    .await;

                keyboard_handler.start().await.map_err(|e| {
                    error!("Failed to start keyboard handler: {}", e);
                    e
                })?;

                self.set_component_state("keyboard", ComponentState::Running)
                    .await;
            }
        }

        if self.film_on_start {
            let film_id = session.start_film().await?;
            info!("Film {} started", film_id);
        }

        info!("Focus lock system started successfully");
        Ok(())
    }

    /// A feed that ends while the system is still running is reported as
    /// a component failure
    fn spawn_feed<F>(&mut self, name: &'static str, feed: F)
    where
        F: Future<Output = u64> + Send + 'static,
    {
        let event_bus = self.event_bus.clone();
        let cancel = self.cancellation_token.clone();
        let task = tokio::spawn(async move {
            let forwarded = feed.await;
            if !cancel.is_cancelled() {
                event_bus.emit(FocusLockEvent::ComponentError {
                    component: name.to_string(),
                    error: format!("feed stopped after {} item(s)", forwarded),
                });
            }
            forwarded
        });
        self.feed_tasks.push((name, task));
    }
}
