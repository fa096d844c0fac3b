use ndarray::ArrayView2;

/// Largest resampled extent along any axis.
pub(crate) const MAX_RESAMPLED_EXTENT: u32 = 4096;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Dimensions `(depth, height, width)` the volume would have if every
    /// voxel were as small as the finest spacing.
    ///
    /// `spacing` and `original_dim` are both in (slice, row, column) order.
    /// An axis is never stretched past [`MAX_RESAMPLED_EXTENT`], nor shrunk
    /// below its original extent by that cap.
    pub(crate) fn get_isotropic_dimensions(
        spacing: (f32, f32, f32),
        original_dim: (usize, usize, usize),
    ) -> (u32, u32, u32) {
        let (z_spacing, y_spacing, x_spacing) = spacing;
        let min_spacing = x_spacing.min(y_spacing).min(z_spacing);
        if !(min_spacing.is_finite() && min_spacing > 0.0) {
            return (
                original_dim.0 as u32,
                original_dim.1 as u32,
                original_dim.2 as u32,
            );
        }
        let inv_min_spacing = 1.0 / min_spacing;

        let scale = |extent: usize, spacing: f32| {
            let stretched = (extent as f32 * spacing * inv_min_spacing).round() as u32;
            stretched.min(MAX_RESAMPLED_EXTENT.max(extent as u32)).max(1)
        };

        (
            scale(original_dim.0, z_spacing),
            scale(original_dim.1, y_spacing),
            scale(original_dim.2, x_spacing),
        )
    }

    #[inline]
    pub(crate) fn bilinear_interpolate(slice: &ArrayView2<f32>, y: f32, x: f32) -> f32 {
        let (height, width) = slice.dim();

        let y0 = (y.floor().max(0.0) as usize).min(height - 1);
        let x0 = (x.floor().max(0.0) as usize).min(width - 1);
        let y1 = (y0 + 1).min(height - 1);
        let x1 = (x0 + 1).min(width - 1);

        let dy = (y - y0 as f32).clamp(0.0, 1.0);
        let dx = (x - x0 as f32).clamp(0.0, 1.0);
        let one_minus_dx = 1.0 - dx;
        let one_minus_dy = 1.0 - dy;

        let v00 = slice[[y0, x0]];
        let v01 = slice[[y0, x1]];
        let v10 = slice[[y1, x0]];
        let v11 = slice[[y1, x1]];

        let v0 = v00.mul_add(one_minus_dx, v01 * dx);
        let v1 = v10.mul_add(one_minus_dx, v11 * dx);

        v0.mul_add(one_minus_dy, v1 * dy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn isotropic_dimensions_stretch_coarse_axes() {
        let dim = Interpolator::get_isotropic_dimensions((2.5, 0.5, 0.5), (10, 64, 32));
        assert_eq!(dim, (50, 64, 32));
    }

    #[test]
    fn stretched_axes_are_capped() {
        let dim = Interpolator::get_isotropic_dimensions((500.0, 0.5, 0.5), (10, 64, 32));
        assert_eq!(dim, (MAX_RESAMPLED_EXTENT, 64, 32));

        let wide = Interpolator::get_isotropic_dimensions((1.0, 1.0, 1.0), (2, 8, 5000));
        assert_eq!(wide, (2, 8, 5000));
    }

    #[test]
    fn degenerate_spacing_keeps_original_dimensions() {
        let dim = Interpolator::get_isotropic_dimensions((0.0, 1.0, 1.0), (3, 4, 5));
        assert_eq!(dim, (3, 4, 5));
    }

    #[test]
    fn bilinear_hits_samples_and_midpoints() {
        let plane = array![[0.0_f32, 10.0], [20.0, 30.0]];
        let view = plane.view();
        assert_relative_eq!(Interpolator::bilinear_interpolate(&view, 0.0, 0.0), 0.0);
        assert_relative_eq!(Interpolator::bilinear_interpolate(&view, 1.0, 1.0), 30.0);
        assert_relative_eq!(Interpolator::bilinear_interpolate(&view, 0.5, 0.5), 15.0);
        assert_relative_eq!(Interpolator::bilinear_interpolate(&view, 0.0, 0.25), 2.5);
    }
}
