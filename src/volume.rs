use crate::enums::{Interpolation, Orientation, QualityTier};
use crate::frame::RawFrame;
use crate::interpolator::Interpolator;
use crate::marching_cubes::{self, MarchingCubesConfig, MeshGenerationError};
use crate::mesh::Mesh;
use crate::window::Window;

use image::{GrayImage, ImageBuffer};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, s};
use rayon::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("{orientation} index {index} is outside 0..{extent}")]
    InvalidIndex {
        orientation: Orientation,
        index: usize,
        extent: usize,
    },

    #[error("Could not build a {width}x{height} image from the plane")]
    ImageBuffer { width: u32, height: u32 },
}

/// Sorted, stacked slices with axis order (slice, row, column).
///
/// A `Volume` always holds at least one slice and never changes after it is
/// assembled.
#[derive(Clone, Debug)]
pub struct Volume {
    data: Array3<f32>,
    spacing: (f32, f32, f32),
    interpolated_dim: (u32, u32, u32),
    value_range: (f32, f32),
    anchor: RawFrame,
    slice_positions: Vec<f64>,
}

/// What the presentation layer shows about a loaded volume.
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeDescriptor {
    /// `(depth, height, width)`
    pub shape: (usize, usize, usize),
    pub patient_name: String,
    pub rows: usize,
    pub columns: usize,
    pub slice_count: usize,
    /// `(slice, row, column)` spacing in millimetres.
    pub spacing: (f32, f32, f32),
}

/// A 2D plane cut from a volume, oriented for display.
#[derive(Clone, Debug)]
pub struct Plane<'a> {
    pub orientation: Orientation,
    pub index: usize,
    view: ArrayView2<'a, f32>,
}

impl<'a> Plane<'a> {
    pub fn view(&self) -> &ArrayView2<'a, f32> {
        &self.view
    }

    /// `(rows, columns)` of the plane.
    pub fn extent(&self) -> (usize, usize) {
        self.view.dim()
    }

    pub fn to_array(&self) -> Array2<f32> {
        self.view.to_owned()
    }

    /// Row and column spacing of this plane given the volume spacing.
    pub fn pixel_spacing(&self, spacing: (f32, f32, f32)) -> (f32, f32) {
        let (slice, row, col) = spacing;
        match self.orientation {
            Orientation::Axial => (row, col),
            Orientation::Coronal => (slice, col),
            Orientation::Sagittal => (slice, row),
        }
    }

    /// `(height, width)` of the plane in physical units.
    pub fn physical_size(&self, spacing: (f32, f32, f32)) -> (f32, f32) {
        let (rows, cols) = self.extent();
        let (row_spacing, col_spacing) = self.pixel_spacing(spacing);
        (rows as f32 * row_spacing, cols as f32 * col_spacing)
    }
}

impl Volume {
    pub(crate) fn new(
        data: Array3<f32>,
        spacing: (f32, f32, f32),
        anchor: RawFrame,
        slice_positions: Vec<f64>,
    ) -> Self {
        let original_dim = data.dim();
        let value_range = data
            .iter()
            .filter(|v| v.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        Self {
            data,
            spacing,
            interpolated_dim: Interpolator::get_isotropic_dimensions(spacing, original_dim),
            value_range,
            anchor,
            slice_positions,
        }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// `(slice, row, column)` spacing in millimetres.
    pub fn spacing(&self) -> (f32, f32, f32) {
        self.spacing
    }

    /// Smallest and largest finite sample.
    pub fn value_range(&self) -> (f32, f32) {
        self.value_range
    }

    /// First slice after sorting, kept for display metadata.
    pub fn anchor(&self) -> &RawFrame {
        &self.anchor
    }

    /// Through-plane position of every slice, in stacking order.
    pub fn slice_positions(&self) -> &[f64] {
        &self.slice_positions
    }

    pub fn descriptor(&self) -> VolumeDescriptor {
        let shape = self.dim();
        VolumeDescriptor {
            shape,
            patient_name: self
                .anchor
                .patient_name
                .clone()
                .unwrap_or_else(|| "Anonymous".to_string()),
            rows: self.anchor.rows(),
            columns: self.anchor.columns(),
            slice_count: shape.0,
            spacing: self.spacing,
        }
    }

    /// Number of planes available along `orientation`.
    pub fn extent(&self, orientation: Orientation) -> usize {
        let dim = self.data.dim();
        match orientation {
            Orientation::Axial => dim.0,
            Orientation::Coronal => dim.1,
            Orientation::Sagittal => dim.2,
        }
    }

    /// Raw plane in storage order, without the display flip.
    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
    ) -> Result<ArrayView2<'_, f32>, VolumeError> {
        self.check_index(index, orientation)?;
        let slice = match orientation {
            Orientation::Axial => self.data.slice(s![index, .., ..]),
            Orientation::Coronal => self.data.slice(s![.., index, ..]),
            Orientation::Sagittal => self.data.slice(s![.., .., index]),
        };
        Ok(slice)
    }

    /// Plane at `index` along `orientation`, in display orientation.
    ///
    /// Axial planes are `volume[index, .., ..]` unchanged. Coronal and
    /// sagittal planes have their slice axis reversed so that the last slice
    /// is the top row. The index is never clamped.
    pub fn get_plane(
        &self,
        orientation: Orientation,
        index: usize,
    ) -> Result<Plane<'_>, VolumeError> {
        self.check_index(index, orientation)?;
        let view = match orientation {
            Orientation::Axial => self.data.slice(s![index, .., ..]),
            Orientation::Coronal => self.data.slice(s![..;-1, index, ..]),
            Orientation::Sagittal => self.data.slice(s![..;-1, .., index]),
        };
        Ok(Plane {
            orientation,
            index,
            view,
        })
    }

    /// Render a windowed plane as an 8-bit grayscale image.
    ///
    /// With [`Interpolation::Bilinear`] coronal and sagittal planes are
    /// resampled to square pixels using the volume spacing.
    pub fn get_image_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
        window: Window,
        interpolation: Interpolation,
    ) -> Result<GrayImage, VolumeError> {
        let plane = self.get_plane(orientation, index)?;

        match interpolation {
            Interpolation::None => Self::slice_to_image(plane.view(), window),
            Interpolation::Bilinear(_) => {
                // Axial doesn't need interpolation (already isotropic in-plane)
                if matches!(orientation, Orientation::Axial) {
                    return Self::slice_to_image(plane.view(), window);
                }
                let (width, height) = self.get_output_dimensions(orientation);
                Self::interpolate_slice(plane.view(), width, height, window)
            }
        }
    }

    /// Iso-surface at `threshold`, sampling every `step` voxels.
    pub fn extract_mesh(&self, threshold: f32, step: usize) -> Result<Mesh, MeshGenerationError> {
        let config = MarchingCubesConfig::new(threshold, step);
        marching_cubes::extract_isosurface(self.view(), &config)
    }

    pub fn extract_mesh_with_quality(
        &self,
        threshold: f32,
        quality: QualityTier,
    ) -> Result<Mesh, MeshGenerationError> {
        self.extract_mesh(threshold, quality.step())
    }

    fn check_index(&self, index: usize, orientation: Orientation) -> Result<(), VolumeError> {
        let extent = self.extent(orientation);
        if index < extent {
            Ok(())
        } else {
            Err(VolumeError::InvalidIndex {
                orientation,
                index,
                extent,
            })
        }
    }

    fn get_output_dimensions(&self, orientation: Orientation) -> (u32, u32) {
        // Always return (width, height) - standard image convention
        match orientation {
            Orientation::Axial => (self.interpolated_dim.2, self.interpolated_dim.1),
            Orientation::Coronal => (self.interpolated_dim.2, self.interpolated_dim.0),
            Orientation::Sagittal => (self.interpolated_dim.1, self.interpolated_dim.0),
        }
    }

    fn slice_to_image(slice: &ArrayView2<'_, f32>, window: Window) -> Result<GrayImage, VolumeError> {
        let (height, width) = slice.dim();
        let (width, height) = (width as u32, height as u32);
        // Rows are collected in order; `iter` walks logical order even when
        // the view has a negative stride.
        let pixel_data: Vec<u8> = slice.iter().map(|&v| window.to_u8(v)).collect();
        ImageBuffer::from_raw(width, height, pixel_data)
            .ok_or(VolumeError::ImageBuffer { width, height })
    }

    fn interpolate_slice(
        slice: &ArrayView2<'_, f32>,
        width: u32,
        height: u32,
        window: Window,
    ) -> Result<GrayImage, VolumeError> {
        let (slice_height, slice_width) = slice.dim();

        let pixel_data: Vec<u8> = (0..height)
            .into_par_iter()
            .flat_map_iter(|y| {
                (0..width).map(move |x| {
                    // Pixel centres of the output grid mapped onto the source grid
                    let norm_x = (x as f32 + 0.5) / width as f32;
                    let norm_y = (y as f32 + 0.5) / height as f32;

                    let src_x = norm_x * slice_width as f32 - 0.5;
                    let src_y = norm_y * slice_height as f32 - 0.5;

                    let src_x = src_x.max(0.0).min((slice_width - 1) as f32);
                    let src_y = src_y.max(0.0).min((slice_height - 1) as f32);

                    let value = Interpolator::bilinear_interpolate(slice, src_y, src_x);
                    window.to_u8(value)
                })
            })
            .collect();

        ImageBuffer::from_raw(width, height, pixel_data)
            .ok_or(VolumeError::ImageBuffer { width, height })
    }
}
