use std::collections::HashMap;

use ndarray::ArrayView3;
use rayon::prelude::*;
use thiserror::Error;
use web_time::Instant;

use crate::enums::QualityTier;
use crate::mesh::{Mesh, to_display};
use crate::tables::{CASES, CORNER_OFFSETS, EDGE_ENDPOINTS};

#[derive(Debug, Error, PartialEq)]
pub enum MeshGenerationError {
    #[error("Step size must be at least 1")]
    InvalidStep,

    #[error("Surface level {0} is not a finite number")]
    NonFiniteLevel(f32),

    #[error("Surface level {level} must be within volume data range [{min}, {max}]")]
    LevelOutOfRange { level: f32, min: f32, max: f32 },

    #[error("Volume of shape {dim:?} is too small, every axis needs at least 2 samples")]
    VolumeTooSmall { dim: (usize, usize, usize) },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarchingCubesConfig {
    /// Intensity of the extracted surface. Samples at or above it are inside.
    pub level: f32,
    /// Sampling stride in voxels along every axis.
    pub step: usize,
    pub compute_normals: bool,
}

impl MarchingCubesConfig {
    pub fn new(level: f32, step: usize) -> Self {
        Self {
            level,
            step,
            compute_normals: true,
        }
    }

    pub fn from_quality(level: f32, quality: QualityTier) -> Self {
        Self::new(level, quality.step())
    }

    pub fn with_normals(mut self, compute_normals: bool) -> Self {
        self.compute_normals = compute_normals;
        self
    }
}

/// A lattice edge: lower endpoint in sample coordinates (slice, row, col)
/// and the axis it runs along.
type EdgeKey = ([usize; 3], u8);

/// Vertices and triangles of one layer of cubes, indexed locally.
#[derive(Default)]
struct Slab {
    vertices: Vec<(EdgeKey, [f32; 3])>,
    lookup: HashMap<EdgeKey, u32>,
    triangles: Vec<[u32; 3]>,
}

struct Lattice<'a> {
    field: ArrayView3<'a, f32>,
    step: usize,
    level: f32,
    fallback: f32,
    /// Samples per axis, (slice, row, col).
    samples: [usize; 3],
}

/// Extract the iso-surface of `field` at `config.level`.
///
/// `field` is indexed (slice, row, col); the returned vertices are in voxel
/// units and display order (x = col, y = row, z = slice). Every
/// `config.step`-th sample is used along each axis, so a trailing partial
/// cube is skipped when the extent minus one is not a multiple of the step.
/// A level that no cube straddles yields an empty mesh.
///
/// # Errors
///
/// Fails when the step is zero, the level is not finite or lies outside the
/// data range, or an axis has fewer than two voxels.
pub fn extract_isosurface(
    field: ArrayView3<'_, f32>,
    config: &MarchingCubesConfig,
) -> Result<Mesh, MeshGenerationError> {
    let started = Instant::now();
    let level = config.level;
    let step = config.step;

    if step == 0 {
        return Err(MeshGenerationError::InvalidStep);
    }
    if !level.is_finite() {
        return Err(MeshGenerationError::NonFiniteLevel(level));
    }

    let dim = field.dim();
    if dim.0 < 2 || dim.1 < 2 || dim.2 < 2 {
        return Err(MeshGenerationError::VolumeTooSmall { dim });
    }

    let (min, max) = field
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !(min..=max).contains(&level) {
        return Err(MeshGenerationError::LevelOutOfRange { level, min, max });
    }

    let samples = [
        (dim.0 - 1) / step + 1,
        (dim.1 - 1) / step + 1,
        (dim.2 - 1) / step + 1,
    ];
    if samples.iter().any(|&n| n < 2) {
        log::debug!("Step {step} leaves no whole cube in a {dim:?} volume");
        return Ok(Mesh::empty());
    }

    let lattice = Lattice {
        field,
        step,
        level,
        fallback: min,
        samples,
    };

    let slabs: Vec<Slab> = (0..samples[0] - 1)
        .into_par_iter()
        .map(|layer| lattice.march_layer(layer))
        .collect();

    let mut mesh = merge_slabs(slabs);
    if config.compute_normals {
        mesh.compute_normals();
    }

    log::info!(
        "Extracted iso-surface at {level} (step {step}): {} vertices, {} faces in {:?}",
        mesh.vertex_count(),
        mesh.face_count(),
        started.elapsed()
    );
    Ok(mesh)
}

// Slabs are merged in layer order, so vertex numbering matches a single
// sequential sweep.
fn merge_slabs(slabs: Vec<Slab>) -> Mesh {
    let mut mesh = Mesh::empty();
    let mut global = HashMap::<EdgeKey, u32>::new();

    for slab in slabs {
        let mut remap = Vec::with_capacity(slab.vertices.len());
        for (key, point) in slab.vertices {
            let index = *global.entry(key).or_insert_with(|| {
                mesh.vertices.push(point);
                (mesh.vertices.len() - 1) as u32
            });
            remap.push(index);
        }
        mesh.faces.extend(
            slab.triangles
                .iter()
                .map(|triangle| triangle.map(|i| remap[i as usize])),
        );
    }

    mesh
}

impl Lattice<'_> {
    #[inline]
    fn sample(&self, grid: [usize; 3]) -> f32 {
        let value = self.field[[
            grid[0] * self.step,
            grid[1] * self.step,
            grid[2] * self.step,
        ]];
        if value.is_finite() { value } else { self.fallback }
    }

    fn march_layer(&self, layer: usize) -> Slab {
        let mut slab = Slab::default();
        let mut grid = [[0usize; 3]; 8];
        let mut values = [0.0f32; 8];
        let mut edge_vertex = [0u32; 12];

        for row in 0..self.samples[1] - 1 {
            for col in 0..self.samples[2] - 1 {
                let mut case_index = 0usize;
                for (corner, [dx, dy, dz]) in CORNER_OFFSETS.iter().enumerate() {
                    grid[corner] = [layer + dz, row + dy, col + dx];
                    values[corner] = self.sample(grid[corner]);
                    if values[corner] >= self.level {
                        case_index |= 1 << corner;
                    }
                }

                let edge_mask = CASES.edge_masks[case_index];
                if edge_mask == 0 {
                    continue;
                }

                for (edge, [a, b]) in EDGE_ENDPOINTS.iter().enumerate() {
                    if edge_mask & (1 << edge) == 0 {
                        continue;
                    }
                    // Interpolate from the lower endpoint so neighbouring
                    // cubes compute bit-identical points.
                    let (a, b) = if grid[*a] <= grid[*b] { (*a, *b) } else { (*b, *a) };
                    edge_vertex[edge] =
                        self.edge_vertex(&mut slab, grid[a], grid[b], values[a], values[b]);
                }

                for triangle in &CASES.triangles[case_index] {
                    slab.triangles
                        .push(triangle.map(|edge| edge_vertex[edge as usize]));
                }
            }
        }

        slab
    }

    fn edge_vertex(
        &self,
        slab: &mut Slab,
        lower: [usize; 3],
        upper: [usize; 3],
        v_lower: f32,
        v_upper: f32,
    ) -> u32 {
        let axis = (0..3).position(|i| lower[i] != upper[i]).unwrap_or(0) as u8;
        let key = (lower, axis);
        if let Some(&index) = slab.lookup.get(&key) {
            return index;
        }

        // One endpoint is inside and one outside, so the values differ.
        let t = (self.level - v_lower) / (v_upper - v_lower);
        let mut point = lower.map(|g| (g * self.step) as f32);
        point[axis as usize] += t * self.step as f32;

        let index = slab.vertices.len() as u32;
        slab.vertices.push((key, to_display(point)));
        slab.lookup.insert(key, index);
        index
    }
}
