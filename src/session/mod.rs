//! Mode routing and serialized execution.
//!
//! [`LockSession`] owns the registered modes and routes every input to the
//! selected one. [`SessionWorker`] runs it on a single task so QPD updates,
//! frames, user actions and parameter reloads never interleave.

mod feeds;
mod registry;
#[cfg(test)]
mod tests;
mod worker;

pub use feeds::{pump_frames, pump_readings};
pub use registry::{LockSession, LockStatus};
pub use worker::{SessionCommand, SessionHandle, SessionWorker};
