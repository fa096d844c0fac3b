//! Intensity windowing (brightness/contrast).
//!
//! Samples at or below `min` map to black, at or above `max` to white,
//! whatever the native intensity scale of the data is.

use ndarray::{Array, ArrayBase, Data, Dimension};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Window {
    min: f32,
    max: f32,
}

impl Window {
    /// Build a window from two bounds, in either order.
    pub fn new(a: f32, b: f32) -> Self {
        if a <= b {
            Self { min: a, max: b }
        } else {
            Self { min: b, max: a }
        }
    }

    /// Window from a DICOM style centre/width pair.
    pub fn from_center_width(center: f32, width: f32) -> Self {
        let half = width.abs() / 2.0;
        Self::new(center - half, center + half)
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    /// Clip a sample to `[min, max]`. NaN maps to `min`.
    #[inline]
    pub fn clip(&self, value: f32) -> f32 {
        value.max(self.min).min(self.max)
    }

    /// Linear map of the window onto `0..=255`.
    #[inline]
    pub fn to_u8(&self, value: f32) -> u8 {
        let width = self.max - self.min;
        if width <= 0.0 {
            return if value >= self.max { u8::MAX } else { 0 };
        }
        let t = (self.clip(value) - self.min) / width;
        (t * 255.0).round().clamp(0.0, 255.0) as u8
    }

    pub fn apply<S, D>(&self, array: &ArrayBase<S, D>) -> Array<f32, D>
    where
        S: Data<Elem = f32>,
        D: Dimension,
    {
        array.mapv(|v| self.clip(v))
    }
}

/// Clip every sample of `array` to the closed interval between `min` and `max`.
pub fn apply_window<S, D>(array: &ArrayBase<S, D>, min: f32, max: f32) -> Array<f32, D>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    Window::new(min, max).apply(array)
}
