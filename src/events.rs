use crate::error::EventBusError;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events emitted by the focus lock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FocusLockEvent {
    /// A lock behavior finished, successfully or not
    LockFinished { success: bool },
    /// Lock quality crossed between bad and good
    GoodLockChanged { good_lock: bool },
    /// The offset the lock is holding changed
    LockTargetChanged { target: f64 },
    /// A different lock mode became active
    ModeChanged { name: String },
    /// An acquisition started
    FilmStarted { film_id: Uuid },
    /// An acquisition stopped
    FilmStopped { film_id: Uuid },
    /// The optimal lock scan produced a target
    OptimalTargetFound { target: f64, fitted: bool },
    /// A component reported an error
    ComponentError { component: String, error: String },
    /// System shutdown requested
    ShutdownRequested { reason: String },
}

impl FocusLockEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            FocusLockEvent::LockFinished { success } => format!(
                "Lock behavior finished ({})",
                if *success { "success" } else { "failure" }
            ),
            FocusLockEvent::GoodLockChanged { good_lock } => {
                format!("Lock is {}", if *good_lock { "good" } else { "bad" })
            }
            FocusLockEvent::LockTargetChanged { target } => {
                format!("Lock target set to {:.4}", target)
            }
            FocusLockEvent::ModeChanged { name } => format!("Lock mode changed to '{}'", name),
            FocusLockEvent::FilmStarted { film_id } => format!("Film {} started", film_id),
            FocusLockEvent::FilmStopped { film_id } => format!("Film {} stopped", film_id),
            FocusLockEvent::OptimalTargetFound { target, fitted } => format!(
                "Optimal target {:.4} ({})",
                target,
                if *fitted { "fitted" } else { "best sample" }
            ),
            FocusLockEvent::ComponentError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            FocusLockEvent::ShutdownRequested { reason } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            FocusLockEvent::LockFinished { .. } => "lock_finished",
            FocusLockEvent::GoodLockChanged { .. } => "good_lock_changed",
            FocusLockEvent::LockTargetChanged { .. } => "lock_target_changed",
            FocusLockEvent::ModeChanged { .. } => "mode_changed",
            FocusLockEvent::FilmStarted { .. } => "film_started",
            FocusLockEvent::FilmStopped { .. } => "film_stopped",
            FocusLockEvent::OptimalTargetFound { .. } => "optimal_target_found",
            FocusLockEvent::ComponentError { .. } => "component_error",
            FocusLockEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Event bus over a broadcast channel. Publishing never blocks, so the
/// serialized lock logic can emit from inside its handlers; each subscriber
/// sees events in publish order.
pub struct EventBus {
    sender: broadcast::Sender<FocusLockEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<FocusLockEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: FocusLockEvent) -> Result<usize, EventBusError> {
        if self.debug_logging {
            debug!("Publishing event: {}", event.description());
        }

        match &event {
            FocusLockEvent::LockFinished { success } => {
                if *success {
                    info!("Lock behavior finished successfully");
                } else {
                    warn!("Lock behavior finished without success");
                }
            }
            FocusLockEvent::ComponentError { component, error } => {
                error!("Component error in {}: {}", component, error);
            }
            FocusLockEvent::ModeChanged { name } => {
                info!("Lock mode changed to '{}'", name);
            }
            FocusLockEvent::ShutdownRequested { reason } => {
                info!("Shutdown requested: {}", reason);
            }
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Publish, logging instead of failing when nobody is listening
    pub fn emit(&self, event: FocusLockEvent) {
        if let Err(e) = self.publish(event) {
            debug!("Event dropped: {}", e);
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Custom filter function
    Custom(fn(&FocusLockEvent) -> bool),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &FocusLockEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<FocusLockEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    /// Create a new event receiver with a filter
    pub fn new(
        receiver: broadcast::Receiver<FocusLockEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<FocusLockEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::PublishFailed {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<FocusLockEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    return Ok(None);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::PublishFailed {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Drain everything currently queued that passes the filter
    pub fn drain(&mut self) -> Vec<FocusLockEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = self.try_recv() {
            events.push(event);
        }
        events
    }
}
