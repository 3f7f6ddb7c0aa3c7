//! Frame sources for the focus lock.

mod settings;
mod simulated;
#[cfg(test)]
mod tests;

pub use settings::CameraSettings;
pub use simulated::SimulatedCamera;

use crate::frame::Frame;
use async_trait::async_trait;

/// A lazy, unbounded sequence of camera frames
#[async_trait]
pub trait CameraSource: Send {
    /// Wait for the next frame. `None` ends the sequence.
    async fn next_frame(&mut self) -> Option<Frame>;

    /// Whether the camera is configured well enough to deliver frames
    fn is_ready(&self) -> bool;

    fn source_name(&self) -> &str;
}
