//! Image sharpness scores used by the optimal lock scan.

use crate::frame::Frame;

/// Pure mapping from a frame to a scalar focus quality, higher is sharper
pub trait FocusQuality: Send + Sync {
    fn quality(&self, frame: &Frame) -> f64;
}

impl<F> FocusQuality for F
where
    F: Fn(&Frame) -> f64 + Send + Sync,
{
    fn quality(&self, frame: &Frame) -> f64 {
        self(frame)
    }
}

/// Mean squared intensity gradient normalised by the mean intensity, so
/// the score tracks sharpness rather than brightness
#[derive(Debug, Clone, Copy, Default)]
pub struct GradientQuality;

impl FocusQuality for GradientQuality {
    fn quality(&self, frame: &Frame) -> f64 {
        image_gradient(frame)
    }
}

pub fn image_gradient(frame: &Frame) -> f64 {
    let image = frame.image.as_ref();
    let (width, height) = image.dimensions();
    if width < 2 || height < 2 {
        return 0.0;
    }

    let mut total = 0.0;
    let mut gradient = 0.0;
    for y in 0..height - 1 {
        for x in 0..width - 1 {
            let here = image.get_pixel(x, y)[0] as f64;
            let dx = image.get_pixel(x + 1, y)[0] as f64 - here;
            let dy = image.get_pixel(x, y + 1)[0] as f64 - here;
            total += here;
            gradient += dx * dx + dy * dy;
        }
    }

    let count = ((width - 1) * (height - 1)) as f64;
    let mean = total / count;
    if mean <= 0.0 {
        return 0.0;
    }
    gradient / count / mean
}
