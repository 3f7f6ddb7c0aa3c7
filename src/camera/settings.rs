use crate::config::CameraConfig;
use crate::error::CameraError;
use serde::{Deserialize, Serialize};

const SUPPORTED_BINNING: [u32; 3] = [1, 2, 4];

/// Acquisition settings for a camera feeding the focus lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraSettings {
    pub source: String,
    pub x_pixels: u32,
    pub y_pixels: u32,
    pub x_bin: u32,
    pub y_bin: u32,
    pub fps: u32,
}

impl CameraSettings {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            source: config.source.clone(),
            x_pixels: config.x_pixels,
            y_pixels: config.y_pixels,
            x_bin: config.x_bin,
            y_bin: config.y_bin,
            fps: config.fps,
        }
    }

    /// Check the ROI and binning. Only square 1x1, 2x2 and 4x4 binning is
    /// supported.
    pub fn validate(&self) -> Result<(), CameraError> {
        if self.x_bin != self.y_bin {
            return Err(CameraError::UnequalBinning {
                x_bin: self.x_bin,
                y_bin: self.y_bin,
            });
        }
        if !SUPPORTED_BINNING.contains(&self.x_bin) {
            return Err(CameraError::UnsupportedBinning { bin: self.x_bin });
        }
        if self.x_pixels == 0 || self.y_pixels == 0 {
            return Err(CameraError::Configuration {
                details: format!("empty ROI {}x{}", self.x_pixels, self.y_pixels),
            });
        }
        if self.x_pixels < self.x_bin || self.y_pixels < self.y_bin {
            return Err(CameraError::Configuration {
                details: format!(
                    "ROI {}x{} smaller than binning {}",
                    self.x_pixels, self.y_pixels, self.x_bin
                ),
            });
        }
        if self.fps == 0 {
            return Err(CameraError::Configuration {
                details: "frame rate must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Image size after binning
    pub fn frame_dimensions(&self) -> (u32, u32) {
        (
            self.x_pixels / self.x_bin.max(1),
            self.y_pixels / self.y_bin.max(1),
        )
    }

    /// Size of one 16-bit frame in bytes
    pub fn frame_bytes(&self) -> usize {
        let (width, height) = self.frame_dimensions();
        2 * width as usize * height as usize
    }
}
