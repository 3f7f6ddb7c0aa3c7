use super::{LockSession, LockStatus};
use crate::behavior::BehaviorParams;
use crate::error::{FocusLockError, Result};
use crate::frame::Frame;
use crate::parameters::{LockParameters, ParameterOverrides};
use crate::sensor::QpdState;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Everything the lock session can be asked to do
#[derive(Debug)]
pub enum SessionCommand {
    QpdUpdate(QpdState),
    NewFrame(Frame),
    SelectMode {
        name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    StartLock {
        target: Option<f64>,
        reply: oneshot::Sender<bool>,
    },
    StopLock,
    StartBehavior {
        name: String,
        params: BehaviorParams,
        reply: oneshot::Sender<Result<()>>,
    },
    Jump(f64),
    StartFilm {
        reply: oneshot::Sender<Uuid>,
    },
    StopFilm,
    NewParameters {
        parameters: LockParameters,
        reply: oneshot::Sender<Result<()>>,
    },
    ApplyOverrides {
        overrides: ParameterOverrides,
        reply: oneshot::Sender<Result<()>>,
    },
    Status {
        reply: oneshot::Sender<LockStatus>,
    },
    Shutdown,
}

/// Cloneable front end to a running [`SessionWorker`]
#[derive(Debug, Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn send(&self, command: SessionCommand) -> Result<()> {
        self.sender
            .send(command)
            .await
            .map_err(|_| FocusLockError::component("session", "worker is not running"))
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply)).await?;
        response
            .await
            .map_err(|_| FocusLockError::component("session", "worker dropped the request"))
    }

    pub async fn qpd_update(&self, qpd_state: QpdState) -> Result<()> {
        self.send(SessionCommand::QpdUpdate(qpd_state)).await
    }

    pub async fn new_frame(&self, frame: Frame) -> Result<()> {
        self.send(SessionCommand::NewFrame(frame)).await
    }

    pub async fn select_mode(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.request(|reply| SessionCommand::SelectMode { name, reply })
            .await?
    }

    /// Returns whether the active mode accepted the request
    pub async fn start_lock(&self, target: Option<f64>) -> Result<bool> {
        self.request(|reply| SessionCommand::StartLock { target, reply })
            .await
    }

    pub async fn stop_lock(&self) -> Result<()> {
        self.send(SessionCommand::StopLock).await
    }

    pub async fn start_lock_behavior(&self, name: &str, params: BehaviorParams) -> Result<()> {
        let name = name.to_string();
        self.request(|reply| SessionCommand::StartBehavior {
            name,
            params,
            reply,
        })
        .await?
    }

    pub async fn jump(&self, delta: f64) -> Result<()> {
        self.send(SessionCommand::Jump(delta)).await
    }

    pub async fn start_film(&self) -> Result<Uuid> {
        self.request(|reply| SessionCommand::StartFilm { reply })
            .await
    }

    pub async fn stop_film(&self) -> Result<()> {
        self.send(SessionCommand::StopFilm).await
    }

    pub async fn new_parameters(&self, parameters: LockParameters) -> Result<()> {
        self.request(|reply| SessionCommand::NewParameters { parameters, reply })
            .await?
    }

    pub async fn apply_overrides(&self, overrides: ParameterOverrides) -> Result<()> {
        self.request(|reply| SessionCommand::ApplyOverrides { overrides, reply })
            .await?
    }

    pub async fn status(&self) -> Result<LockStatus> {
        self.request(|reply| SessionCommand::Status { reply }).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(SessionCommand::Shutdown).await
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Runs a [`LockSession`] on its own task. Commands are handled strictly in
/// arrival order, and the relock timer fires on the same task.
pub struct SessionWorker {
    session: LockSession,
    receiver: mpsc::Receiver<SessionCommand>,
}

impl SessionWorker {
    /// Spawn the worker. The task hands the session back when it stops.
    pub fn spawn(session: LockSession, capacity: usize) -> (SessionHandle, JoinHandle<LockSession>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let worker = Self { session, receiver };
        let handle = tokio::spawn(worker.run());
        (SessionHandle { sender }, handle)
    }

    async fn run(mut self) -> LockSession {
        info!("Lock session worker started");

        loop {
            let relock_deadline = self.session.relock_deadline();

            tokio::select! {
                command = self.receiver.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.dispatch(command),
                },
                _ = sleep_until(relock_deadline.unwrap_or_else(Instant::now)),
                    if relock_deadline.is_some() => {
                    debug!("Relock timer expired");
                    self.session.handle_relock_timer();
                }
            }
        }

        info!("Lock session worker stopped");
        self.session
    }

    fn dispatch(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::QpdUpdate(qpd_state) => self.session.handle_qpd_update(&qpd_state),
            SessionCommand::NewFrame(frame) => self.session.handle_new_frame(&frame),
            SessionCommand::SelectMode { name, reply } => {
                let result = self.session.select_mode(&name);
                if let Err(e) = &result {
                    error!("Failed to select lock mode: {}", e);
                }
                let _ = reply.send(result);
            }
            SessionCommand::StartLock { target, reply } => {
                let _ = reply.send(self.session.start_lock(target));
            }
            SessionCommand::StopLock => self.session.stop_lock(),
            SessionCommand::StartBehavior {
                name,
                params,
                reply,
            } => {
                let result = self.session.start_lock_behavior(&name, &params);
                if let Err(e) = &result {
                    error!("Failed to start behavior '{}': {}", name, e);
                }
                let _ = reply.send(result);
            }
            SessionCommand::Jump(delta) => self.session.handle_jump(delta),
            SessionCommand::StartFilm { reply } => {
                let _ = reply.send(self.session.start_film());
            }
            SessionCommand::StopFilm => self.session.stop_film(),
            SessionCommand::NewParameters { parameters, reply } => {
                let _ = reply.send(self.session.new_parameters(parameters));
            }
            SessionCommand::ApplyOverrides { overrides, reply } => {
                let _ = reply.send(self.session.apply_overrides(&overrides));
            }
            SessionCommand::Status { reply } => {
                let _ = reply.send(self.session.status());
            }
            SessionCommand::Shutdown => {}
        }
    }
}
