mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;


pub use orchestrator::FocusLockOrchestrator;
pub use types::{ComponentState, ShutdownReason};
