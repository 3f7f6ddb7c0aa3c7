use super::{ComponentState, FocusLockOrchestrator};
use crate::error::{FocusLockError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::timeout;
use tracing::{error, info, warn};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

impl FocusLockOrchestrator {
    /// Stop the film, capture the final lock status and stop every
    /// component in reverse dependency order
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");
        let mut exit_code = 0;

        if let Some(keyboard_handler) = &self.keyboard_handler {
            self.set_component_state("keyboard", ComponentState::Stopping)
                .await;
            if let Err(e) = keyboard_handler.stop().await {
                error!("Error stopping keyboard: {}", e);
                exit_code = 1;
            }
            self.set_component_state("keyboard", ComponentState::Stopped)
                .await;
        }

        if let Some(session) = &self.session {
            match session.status().await {
                Ok(status) => {
                    if status.film_id.is_some() {
                        if let Err(e) = session.stop_film().await {
                            warn!("Failed to stop film: {}", e);
                        }
                    }
                    self.final_status = Some(status);
                }
                Err(e) => warn!("Could not read final lock status: {}", e),
            }
        }

        // Cancel all background tasks
        self.cancellation_token.cancel();

        let feeds = std::mem::take(&mut self.feed_tasks);
        for (name, task) in feeds {
            match self.stop_component(name, task).await {
                Ok(forwarded) => info!("{} feed forwarded {} item(s)", name, forwarded),
                Err(e) => {
                    error!("Error stopping {}: {}", name, e);
                    exit_code = 1;
                }
            }
        }

        if let Some(session) = self.session.take() {
            if let Err(e) = session.shutdown().await {
                warn!("Session worker already gone: {}", e);
            }
        }
        if let Some(task) = self.session_task.take() {
            match self.stop_component("session", task).await {
                // Dropping the session closes the stage command queue
                Ok(session) => drop(session),
                Err(e) => {
                    error!("Error stopping session: {}", e);
                    exit_code = 1;
                }
            }
        }

        if let Some(task) = self.stage_task.take() {
            if let Err(e) = self.stop_component("stage", task).await {
                error!("Error stopping stage: {}", e);
                exit_code = 1;
            }
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    /// Wait for a component task to finish, bounded by the stop timeout
    async fn stop_component<T, F>(&self, component: &str, task: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, JoinError>>,
    {
        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping)
            .await;

        match timeout(STOP_TIMEOUT, task).await {
            Ok(Ok(output)) => {
                self.set_component_state(component, ComponentState::Stopped)
                    .await;
                info!("{} component stopped", component);
                Ok(output)
            }
            Ok(Err(e)) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                Err(FocusLockError::component(
                    component.to_string(),
                    format!("task failed: {}", e),
                ))
            }
            Err(_) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                error!("{} component stop timeout", component);
                Err(FocusLockError::System {
                    message: format!("{} component stop timeout", component),
                })
            }
        }
    }
}
