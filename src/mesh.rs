//! Triangle mesh produced by iso-surface extraction.
//!
//! Vertices are stored in display axis order: `x` is the column, `y` the row
//! and `z` the slice index of the volume. [`to_display`] is the one place
//! where array index order is relabelled.

/// Relabel a point from array index order `[slice, row, col]` to display
/// order `[x, y, z] = [col, row, slice]`.
#[inline]
pub fn to_display(index_point: [f32; 3]) -> [f32; 3] {
    let [slice, row, col] = index_point;
    [col, row, slice]
}

/// Inverse of [`to_display`].
#[inline]
pub fn to_index(display_point: [f32; 3]) -> [f32; 3] {
    let [x, y, z] = display_point;
    [z, y, x]
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<[f32; 3]>,
    pub faces: Vec<[u32; 3]>,
    /// Unit normals, one per vertex, pointing from high toward low intensity.
    pub normals: Option<Vec<[f32; 3]>>,
}

impl Mesh {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Axis aligned bounds `(min, max)`, `None` for a mesh without vertices.
    pub fn bounds(&self) -> Option<([f32; 3], [f32; 3])> {
        let first = *self.vertices.first()?;
        Some(self.vertices.iter().fold((first, first), |(mut lo, mut hi), v| {
            for axis in 0..3 {
                lo[axis] = lo[axis].min(v[axis]);
                hi[axis] = hi[axis].max(v[axis]);
            }
            (lo, hi)
        }))
    }

    /// Scale voxel coordinates to physical units.
    ///
    /// `spacing` is the volume spacing in `(slice, row, column)` order, as
    /// returned by [`Volume::spacing`](crate::volume::Volume::spacing).
    pub fn scaled(mut self, spacing: (f32, f32, f32)) -> Self {
        let (slice, row, col) = spacing;
        let factors = to_display([slice, row, col]);
        for vertex in &mut self.vertices {
            for axis in 0..3 {
                vertex[axis] *= factors[axis];
            }
        }
        if self.normals.is_some() {
            self.compute_normals();
        }
        self
    }

    /// Area weighted vertex normals from the face winding.
    pub fn compute_normals(&mut self) {
        let mut normals = vec![[0.0_f32; 3]; self.vertices.len()];

        for face in &self.faces {
            let [a, b, c] = face.map(|i| self.vertices[i as usize]);
            let n = cross(sub(b, a), sub(c, a));
            for &i in face {
                let acc = &mut normals[i as usize];
                for axis in 0..3 {
                    acc[axis] += n[axis];
                }
            }
        }

        for n in &mut normals {
            let length = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
            if length > f32::EPSILON {
                for component in n.iter_mut() {
                    *component /= length;
                }
            }
        }

        self.normals = Some(normals);
    }
}

#[inline]
fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tetrahedron() -> Mesh {
        Mesh {
            vertices: vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
            ],
            // Counter-clockwise seen from outside.
            faces: vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
            normals: None,
        }
    }

    #[test]
    fn empty_mesh_has_no_geometry() {
        let mesh = Mesh::empty();
        assert!(mesh.is_empty());
        assert_eq!(mesh.vertex_count(), 0);
        assert_eq!(mesh.bounds(), None);
    }

    #[test]
    fn display_order_swaps_slice_and_column() {
        assert_eq!(to_display([3.0, 2.0, 1.0]), [1.0, 2.0, 3.0]);
        assert_eq!(to_index(to_display([7.5, -1.0, 4.0])), [7.5, -1.0, 4.0]);
    }

    #[test]
    fn normals_point_away_from_the_solid() {
        let mut mesh = tetrahedron();
        mesh.compute_normals();
        let normals = mesh.normals.as_ref().unwrap();

        // The origin vertex normal points back toward the negative octant.
        let n0 = normals[0];
        assert!(n0.iter().all(|&c| c < 0.0));
        for n in normals {
            assert_relative_eq!((n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn scaling_follows_display_axes() {
        let mesh = tetrahedron().scaled((4.0, 2.0, 0.5));
        let (lo, hi) = mesh.bounds().unwrap();
        assert_eq!(lo, [0.0, 0.0, 0.0]);
        // x is the column axis, z the slice axis.
        assert_eq!(hi, [0.5, 2.0, 4.0]);
    }
}
