use super::{FocusLockOrchestrator, ShutdownReason};
use crate::error::{EventBusError, FocusLockError, Result};
use crate::events::{EventFilter, EventReceiver, FocusLockEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info, warn};

type SharedShutdownSender = Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>;

async fn request_shutdown(sender: &SharedShutdownSender, reason: ShutdownReason) {
    if let Some(sender) = sender.lock().await.take() {
        let _ = sender.send(reason);
    }
}

impl FocusLockOrchestrator {
    /// Run until a signal, a shutdown request on the event bus, or the
    /// optional `duration` elapses. Returns the process exit code.
    pub async fn run(&mut self, duration: Option<Duration>) -> Result<i32> {
        info!("Focus lock system is running");

        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| FocusLockError::System {
                message: "Shutdown sender already taken".to_string(),
            })?;

        let shutdown_receiver =
            self.shutdown_receiver
                .take()
                .ok_or_else(|| FocusLockError::System {
                    message: "Shutdown receiver already taken".to_string(),
                })?;

        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));
        self.setup_signal_handlers(&shutdown_sender);
        self.watch_shutdown_requests(&shutdown_sender);

        if let Some(duration) = duration {
            info!("Running for {:?}", duration);
            let sender = Arc::clone(&shutdown_sender);
            let cancel = self.cancellation_token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(duration) => {
                        request_shutdown(&sender, ShutdownReason::DurationElapsed).await;
                    }
                }
            });
        }

        // Wait for shutdown signal
        let shutdown_reason = shutdown_receiver.await.map_err(|_| FocusLockError::System {
            message: "Shutdown channel closed unexpectedly".to_string(),
        })?;

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let mut exit_code = self.shutdown().await?;
        if matches!(shutdown_reason, ShutdownReason::Error(_)) {
            exit_code = 1;
        }

        info!("Focus lock system shutdown complete");
        Ok(exit_code)
    }

    /// Set up signal handlers for graceful shutdown
    fn setup_signal_handlers(&self, shutdown_sender: &SharedShutdownSender) {
        // Handle SIGTERM (systemd stop) - Unix only
        #[cfg(unix)]
        {
            let sender = Arc::clone(shutdown_sender);
            tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        if sigterm.recv().await.is_some() {
                            info!("Received SIGTERM signal");
                            request_shutdown(&sender, ShutdownReason::Signal("SIGTERM".to_string()))
                                .await;
                        }
                    }
                    Err(e) => warn!("Failed to register SIGTERM handler: {}", e),
                }
            });
        }

        // Handle SIGINT (Ctrl+C) - Cross-platform
        let sender = Arc::clone(shutdown_sender);
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                request_shutdown(&sender, ShutdownReason::Signal("SIGINT".to_string())).await;
            }
        });
    }

    /// Turn `ShutdownRequested` and `ComponentError` events into a shutdown
    fn watch_shutdown_requests(&self, shutdown_sender: &SharedShutdownSender) {
        let sender = Arc::clone(shutdown_sender);
        let cancel = self.cancellation_token.clone();
        let mut receiver = EventReceiver::new(
            self.event_bus.subscribe(),
            EventFilter::EventTypes(vec!["shutdown_requested", "component_error"]),
            "shutdown_watch".to_string(),
        );

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = receiver.recv() => event,
                };
                match event {
                    Ok(FocusLockEvent::ShutdownRequested { reason }) => {
                        request_shutdown(&sender, ShutdownReason::UserRequest(reason)).await;
                        break;
                    }
                    Ok(FocusLockEvent::ComponentError { component, error }) => {
                        error!("Stopping after failure in {}", component);
                        request_shutdown(
                            &sender,
                            ShutdownReason::Error(format!("{}: {}", component, error)),
                        )
                        .await;
                        break;
                    }
                    Ok(_) => {}
                    Err(EventBusError::ChannelClosed) => break,
                    // Lagging only loses events we were not waiting for
                    Err(_) => {}
                }
            }
        });
    }
}
