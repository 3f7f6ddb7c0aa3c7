use crate::error::Result;
use crate::events::{EventBus, FocusLockEvent};
use crate::session::SessionHandle;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Operator actions reachable from the keyboard
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyAction {
    ToggleLock,
    JumpUp,
    JumpDown,
    ToggleFilm,
    NextMode,
    Quit,
}

impl KeyAction {
    pub fn from_key(code: KeyCode) -> Option<Self> {
        match code {
            KeyCode::Char('l') => Some(KeyAction::ToggleLock),
            KeyCode::Up => Some(KeyAction::JumpUp),
            KeyCode::Down => Some(KeyAction::JumpDown),
            KeyCode::Char('f') => Some(KeyAction::ToggleFilm),
            KeyCode::Char('m') => Some(KeyAction::NextMode),
            KeyCode::Char('q') | KeyCode::Esc => Some(KeyAction::Quit),
            _ => None,
        }
    }
}

/// Applies keyboard actions to a running session
#[derive(Clone)]
pub struct KeyboardController {
    session: SessionHandle,
    event_bus: EventBus,
    jump_size: f64,
    modes: Vec<String>,
}

impl KeyboardController {
    pub fn new(session: SessionHandle, event_bus: EventBus, jump_size: f64, modes: Vec<String>) -> Self {
        Self {
            session,
            event_bus,
            jump_size,
            modes,
        }
    }

    pub async fn apply(&self, action: KeyAction) -> Result<()> {
        match action {
            KeyAction::ToggleLock => {
                let status = self.session.status().await?;
                if status.locked {
                    self.session.stop_lock().await?;
                } else if !self.session.start_lock(None).await? {
                    info!("'{}' does not allow manual locking", status.mode);
                }
            }
            KeyAction::JumpUp => self.session.jump(self.jump_size).await?,
            KeyAction::JumpDown => self.session.jump(-self.jump_size).await?,
            KeyAction::ToggleFilm => {
                if self.session.status().await?.film_id.is_some() {
                    self.session.stop_film().await?;
                } else {
                    let film_id = self.session.start_film().await?;
                    info!("Film {} started", film_id);
                }
            }
            KeyAction::NextMode => {
                let current = self.session.status().await?.mode;
                let next = self
                    .modes
                    .iter()
                    .position(|mode| *mode == current)
                    .map_or(0, |i| (i + 1) % self.modes.len().max(1));
                if let Some(mode) = self.modes.get(next) {
                    self.session.select_mode(mode).await?;
                }
            }
            KeyAction::Quit => {
                self.event_bus.emit(FocusLockEvent::ShutdownRequested {
                    reason: "User requested via keyboard".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Interactive focus control from the terminal
pub struct KeyboardInputHandler {
    controller: KeyboardController,
    cancellation_token: CancellationToken,
}

impl KeyboardInputHandler {
    pub fn new(controller: KeyboardController) -> Self {
        Self {
            controller,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start listening for keyboard input
    pub async fn start(&self) -> Result<()> {
        info!("Starting keyboard control - l: lock, up/down: jump, f: film, m: mode, q: quit");

        let controller = self.controller.clone();
        let cancellation_token = self.cancellation_token.clone();
        let runtime_handle = Handle::current();

        task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }

            loop {
                if cancellation_token.is_cancelled() {
                    debug!("Keyboard input handler stopping");
                    break;
                }

                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        let Ok(Event::Key(key_event)) = event::read() else {
                            continue;
                        };
                        if key_event.kind != KeyEventKind::Press {
                            continue;
                        }
                        let Some(action) = KeyAction::from_key(key_event.code) else {
                            debug!("Key pressed: {:?}", key_event.code);
                            continue;
                        };

                        let controller = controller.clone();
                        runtime_handle.spawn(async move {
                            if let Err(e) = controller.apply(action).await {
                                warn!("Keyboard action {:?} failed: {}", action, e);
                            }
                        });
                        if action == KeyAction::Quit {
                            break;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Error polling for keyboard events: {}", e);
                    }
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            }
            debug!("Keyboard input handler task exited");
        });

        Ok(())
    }

    /// Stop the keyboard input handler
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping keyboard input handler");
        self.cancellation_token.cancel();

        // Give the task a moment to clean up and disable raw mode
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = disable_raw_mode();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventFilter, EventReceiver};
    use crate::mode::{AlwaysOnLockMode, NoLockMode};
    use crate::quality::GradientQuality;
    use crate::session::{LockSession, SessionWorker};
    use crate::stage::SimulatedStage;
    use std::sync::Arc;

    fn controller() -> (KeyboardController, EventBus) {
        let stage = Arc::new(SimulatedStage::new(0.0, 100.0, 50.0));
        let event_bus = EventBus::new(256);
        let session =
            LockSession::new(stage, event_bus.clone(), Arc::new(GradientQuality)).unwrap();
        let modes = session
            .mode_names()
            .into_iter()
            .map(String::from)
            .collect();
        let (handle, _task) = SessionWorker::spawn(session, 16);
        (
            KeyboardController::new(handle, event_bus.clone(), 0.5, modes),
            event_bus,
        )
    }

    #[test]
    fn test_key_mapping() {
        assert_eq!(KeyAction::from_key(KeyCode::Char('l')), Some(KeyAction::ToggleLock));
        assert_eq!(KeyAction::from_key(KeyCode::Up), Some(KeyAction::JumpUp));
        assert_eq!(KeyAction::from_key(KeyCode::Esc), Some(KeyAction::Quit));
        assert_eq!(KeyAction::from_key(KeyCode::Char('x')), None);
    }

    #[tokio::test]
    async fn test_toggle_lock_and_film() {
        let (controller, _event_bus) = controller();
        controller.session.select_mode(AlwaysOnLockMode::NAME).await.unwrap();

        controller.apply(KeyAction::ToggleLock).await.unwrap();
        assert!(controller.session.status().await.unwrap().locked);
        controller.apply(KeyAction::ToggleLock).await.unwrap();
        assert!(!controller.session.status().await.unwrap().locked);

        controller.apply(KeyAction::ToggleFilm).await.unwrap();
        assert!(controller.session.status().await.unwrap().film_id.is_some());
        controller.apply(KeyAction::ToggleFilm).await.unwrap();
        assert!(controller.session.status().await.unwrap().film_id.is_none());
    }

    #[tokio::test]
    async fn test_jump_and_mode_cycle() {
        let (controller, _event_bus) = controller();
        controller.apply(KeyAction::JumpUp).await.unwrap();
        controller.apply(KeyAction::JumpUp).await.unwrap();
        controller.apply(KeyAction::JumpDown).await.unwrap();
        let status = controller.session.status().await.unwrap();
        assert_eq!(status.mode, NoLockMode::NAME);
        assert_eq!(status.stage_position, 50.5);

        controller.apply(KeyAction::NextMode).await.unwrap();
        assert_eq!(controller.session.status().await.unwrap().mode, "Auto Lock");
    }

    #[tokio::test]
    async fn test_quit_requests_shutdown() {
        let (controller, event_bus) = controller();
        let mut receiver = EventReceiver::new(
            event_bus.subscribe(),
            EventFilter::EventTypes(vec!["shutdown_requested"]),
            "test".to_string(),
        );

        controller.apply(KeyAction::Quit).await.unwrap();
        assert!(matches!(
            receiver.try_recv().unwrap(),
            Some(FocusLockEvent::ShutdownRequested { .. })
        ));
    }

    #[tokio::test]
    async fn test_keyboard_handler_stop() {
        let (controller, _event_bus) = controller();
        let handler = KeyboardInputHandler::new(controller);

        handler.stop().await.unwrap();
        assert!(handler.cancellation_token.is_cancelled());
    }
}
