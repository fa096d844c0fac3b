//! Cube configuration tables for marching cubes.
//!
//! Corner and edge numbering is the usual one:
//!
//! ```text
//!        7 ---- 6          corners are (x, y, z) offsets, bit i of a case
//!       /|     /|          index is set when corner i is inside
//!      4 ---- 5 |
//!      | 3 ---| 2          edges 0-3 ring the z = 0 face, 4-7 the z = 1
//!      |/     |/           face, 8-11 are the vertical edges
//!      0 ---- 1
//! ```
//!
//! The triangle lists are derived from the cube faces rather than typed out.
//! On every face the boundary is walked counter-clockwise as seen from
//! outside the cube; each edge where the walk enters the inside region is
//! joined to the next crossing edge along the walk. On a face with two
//! diagonal inside corners this keeps the inside corners apart, and since
//! the rule only looks at the four corners of the face, neighbouring cubes
//! always agree on the shared face. The joined segments close into loops
//! which are fanned into triangles wound counter-clockwise around the
//! outward direction (from inside toward outside).

use std::sync::LazyLock;

/// Corner offsets as (x, y, z).
pub(crate) const CORNER_OFFSETS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

pub(crate) const EDGE_ENDPOINTS: [[usize; 2]; 12] = [
    [0, 1],
    [1, 2],
    [2, 3],
    [3, 0],
    [4, 5],
    [5, 6],
    [6, 7],
    [7, 4],
    [0, 4],
    [1, 5],
    [2, 6],
    [3, 7],
];

// Face corners, counter-clockwise seen from outside the cube.
const FACE_CORNERS: [[usize; 4]; 6] = [
    [0, 3, 2, 1], // z = 0
    [4, 5, 6, 7], // z = 1
    [0, 1, 5, 4], // y = 0
    [3, 7, 6, 2], // y = 1
    [0, 4, 7, 3], // x = 0
    [1, 2, 6, 5], // x = 1
];

// FACE_EDGES[f][i] joins FACE_CORNERS[f][i] and FACE_CORNERS[f][(i + 1) % 4].
const FACE_EDGES: [[usize; 4]; 6] = [
    [3, 2, 1, 0],
    [4, 5, 6, 7],
    [0, 9, 4, 8],
    [11, 6, 10, 2],
    [8, 7, 11, 3],
    [1, 10, 5, 9],
];

pub(crate) struct CaseTable {
    /// Bit `e` set when edge `e` crosses the surface.
    pub edge_masks: [u16; 256],
    /// Triangles per case, as edge indices.
    pub triangles: Vec<Vec<[u8; 3]>>,
}

pub(crate) static CASES: LazyLock<CaseTable> = LazyLock::new(CaseTable::build);

impl CaseTable {
    fn build() -> Self {
        let mut edge_masks = [0u16; 256];
        let mut triangles = Vec::with_capacity(256);

        for case in 0..256usize {
            let inside = |corner: usize| case & (1 << corner) != 0;

            for (e, [a, b]) in EDGE_ENDPOINTS.iter().enumerate() {
                if inside(*a) != inside(*b) {
                    edge_masks[case] |= 1 << e;
                }
            }

            let next = Self::link_edges(&inside);
            triangles.push(Self::fan_loops(&next));
        }

        Self {
            edge_masks,
            triangles,
        }
    }

    // next[e] is the edge following crossing edge `e` along its loop.
    fn link_edges(inside: &impl Fn(usize) -> bool) -> [Option<usize>; 12] {
        let mut next = [None; 12];

        for (corners, edges) in FACE_CORNERS.iter().zip(FACE_EDGES.iter()) {
            // (edge, entering) in walk order
            let crossings: Vec<(usize, bool)> = (0..4)
                .filter(|&i| inside(corners[i]) != inside(corners[(i + 1) % 4]))
                .map(|i| (edges[i], inside(corners[(i + 1) % 4])))
                .collect();

            for (k, &(edge, entering)) in crossings.iter().enumerate() {
                if entering {
                    let (following, _) = crossings[(k + 1) % crossings.len()];
                    next[edge] = Some(following);
                }
            }
        }

        next
    }

    fn fan_loops(next: &[Option<usize>; 12]) -> Vec<[u8; 3]> {
        let mut visited = [false; 12];
        let mut triangles = Vec::new();

        for start in 0..12 {
            if visited[start] || next[start].is_none() {
                continue;
            }

            let mut ring = Vec::new();
            let mut edge = start;
            loop {
                visited[edge] = true;
                ring.push(edge as u8);
                match next[edge] {
                    Some(following) if !visited[following] => edge = following,
                    _ => break,
                }
            }

            for pair in ring[1..].windows(2) {
                triangles.push([ring[0], pair[0], pair[1]]);
            }
        }

        triangles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge_of(a: usize, b: usize) -> usize {
        EDGE_ENDPOINTS
            .iter()
            .position(|&[p, q]| (p == a && q == b) || (p == b && q == a))
            .unwrap()
    }

    #[test]
    fn face_edges_match_face_corners() {
        for (corners, edges) in FACE_CORNERS.iter().zip(FACE_EDGES.iter()) {
            for i in 0..4 {
                assert_eq!(edges[i], edge_of(corners[i], corners[(i + 1) % 4]));
            }
        }
    }

    #[test]
    fn every_edge_borders_two_faces() {
        for edge in 0..12 {
            let faces = FACE_EDGES.iter().filter(|f| f.contains(&edge)).count();
            assert_eq!(faces, 2, "edge {edge}");
        }
    }

    #[test]
    fn faces_are_wound_outward() {
        let centre = [0.5_f64; 3];
        for corners in FACE_CORNERS {
            let p: Vec<[f64; 3]> = corners
                .iter()
                .map(|&c| CORNER_OFFSETS[c].map(|v| v as f64))
                .collect();
            let u = [p[1][0] - p[0][0], p[1][1] - p[0][1], p[1][2] - p[0][2]];
            let v = [p[2][0] - p[1][0], p[2][1] - p[1][1], p[2][2] - p[1][2]];
            let n = [
                u[1] * v[2] - u[2] * v[1],
                u[2] * v[0] - u[0] * v[2],
                u[0] * v[1] - u[1] * v[0],
            ];
            let out = [p[0][0] - centre[0], p[0][1] - centre[1], p[0][2] - centre[2]];
            assert!(n[0] * out[0] + n[1] * out[1] + n[2] * out[2] > 0.0);
        }
    }

    #[test]
    fn trivial_cases_have_no_triangles() {
        assert!(CASES.triangles[0].is_empty());
        assert!(CASES.triangles[255].is_empty());
        assert_eq!(CASES.edge_masks[0], 0);
        assert_eq!(CASES.edge_masks[255], 0);
    }

    #[test]
    fn edge_masks_agree_with_the_classic_table() {
        assert_eq!(CASES.edge_masks[1], 0x109);
        assert_eq!(CASES.edge_masks[2], 0x203);
        assert_eq!(CASES.edge_masks[3], 0x30a);
        assert_eq!(CASES.edge_masks[0x80], 0x8c0);
        assert_eq!(CASES.edge_masks[0xfe], 0x109);
    }

    #[test]
    fn single_corner_yields_one_outward_triangle() {
        assert_eq!(CASES.triangles[1], vec![[0, 3, 8]]);
    }

    #[test]
    fn triangles_only_use_crossing_edges_and_use_them_all() {
        for case in 0..256 {
            let mask = CASES.edge_masks[case];
            let mut used = 0u16;
            for tri in &CASES.triangles[case] {
                for &e in tri {
                    assert!(mask & (1 << e) != 0, "case {case} uses edge {e}");
                    used |= 1 << e;
                }
            }
            assert_eq!(used, mask, "case {case}");
        }
    }

    #[test]
    fn triangle_counts_stay_small() {
        let max = CASES.triangles.iter().map(Vec::len).max().unwrap();
        assert!(max <= 8, "largest case has {max} triangles");
    }
}
