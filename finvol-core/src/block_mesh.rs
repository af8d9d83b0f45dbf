//! Structured hexahedral block mesh generator.
//!
//! Produces an [`FvMesh`] for a box of `nx * ny * nz` equal cells. Points are numbered
//! `i + (nx+1)(j + (ny+1)k)` and cells `i + nx(j + ny k)`; internal faces are emitted cell by
//! cell in +x, +y, +z order, which is already upper-triangular.

use crate::error::{Error, Result};
use crate::mesh::{FvMesh, MeshParts, PatchKind, PatchSpec};
use crate::parallel::Communicator;
use crate::types::{Axis, Point3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One of the six sides of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// x = min
    Left,
    /// x = max
    Right,
    /// y = min
    Bottom,
    /// y = max
    Top,
    /// z = min
    Back,
    /// z = max
    Front,
}

impl Side {
    /// All sides in patch order.
    pub const ALL: [Side; 6] = [
        Side::Left,
        Side::Right,
        Side::Bottom,
        Side::Top,
        Side::Back,
        Side::Front,
    ];

    /// Default patch name.
    pub fn name(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
            Side::Bottom => "bottom",
            Side::Top => "top",
            Side::Back => "back",
            Side::Front => "front",
        }
    }

    pub fn axis(self) -> Axis {
        match self {
            Side::Left | Side::Right => Axis::X,
            Side::Bottom | Side::Top => Axis::Y,
            Side::Back | Side::Front => Axis::Z,
        }
    }

    fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
            Side::Bottom => 2,
            Side::Top => 3,
            Side::Back => 4,
            Side::Front => 5,
        }
    }

    /// The two sides normal to an axis, min side first.
    pub fn pair(axis: Axis) -> (Side, Side) {
        match axis {
            Axis::X => (Side::Left, Side::Right),
            Axis::Y => (Side::Bottom, Side::Top),
            Axis::Z => (Side::Back, Side::Front),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SidePatch {
    name: String,
    kind: PatchKind,
}

/// Builder for a structured block mesh.
///
/// # Example
///
/// ```
/// use finvol_core::block_mesh::{BlockMesh, Side};
/// use finvol_core::mesh::PatchKind;
///
/// let mesh = BlockMesh::new([10, 10, 1], [1.0, 1.0, 0.1])
///     .side(Side::Top, "lid", PatchKind::Wall)
///     .two_dimensional()
///     .build()
///     .unwrap();
/// assert_eq!(mesh.n_cells(), 100);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BlockMesh {
    cells: [usize; 3],
    lengths: [f64; 3],
    origin: Point3,
    sides: [SidePatch; 6],
}

impl BlockMesh {
    /// Block with `cells` divisions along x, y, z and the given edge lengths.
    pub fn new(cells: [usize; 3], lengths: [f64; 3]) -> Self {
        let sides = Side::ALL.map(|s| SidePatch {
            name: s.name().to_string(),
            kind: PatchKind::Patch,
        });
        Self {
            cells,
            lengths,
            origin: Point3::zeros(),
            sides,
        }
    }

    /// Minimum corner of the block.
    pub fn origin(mut self, origin: Point3) -> Self {
        self.origin = origin;
        self
    }

    /// Rename a side and set its patch type.
    pub fn side(mut self, side: Side, name: impl Into<String>, kind: PatchKind) -> Self {
        self.sides[side.index()] = SidePatch {
            name: name.into(),
            kind,
        };
        self
    }

    /// Make the z direction empty (front and back patches).
    pub fn two_dimensional(mut self) -> Self {
        self.sides[Side::Back.index()].kind = PatchKind::Empty;
        self.sides[Side::Front.index()].kind = PatchKind::Empty;
        self
    }

    /// Couple the two sides normal to `axis` as a cyclic pair.
    pub fn cyclic(mut self, axis: Axis) -> Self {
        let (lo, hi) = Side::pair(axis);
        let lo_name = self.sides[lo.index()].name.clone();
        let hi_name = self.sides[hi.index()].name.clone();
        self.sides[lo.index()].kind = PatchKind::Cyclic {
            neighbour_patch: hi_name,
        };
        self.sides[hi.index()].kind = PatchKind::Cyclic {
            neighbour_patch: lo_name,
        };
        self
    }

    pub fn n_cells(&self) -> usize {
        self.cells.iter().product()
    }

    fn validate(&self) -> Result<()> {
        if self.cells.contains(&0) {
            return Err(Error::Mesh(format!(
                "block needs at least one cell per direction, got {:?}",
                self.cells
            )));
        }
        if self.lengths.iter().any(|&l| l <= 0.0 || !l.is_finite()) {
            return Err(Error::Mesh(format!(
                "block lengths must be positive, got {:?}",
                self.lengths
            )));
        }
        for (a, side) in self.sides.iter().enumerate() {
            if self.sides[a + 1..].iter().any(|other| other.name == side.name) {
                return Err(Error::Mesh(format!(
                    "duplicate patch name {} in block",
                    side.name
                )));
            }
        }
        Ok(())
    }

    /// Generate the primitive mesh description.
    pub fn parts(&self) -> Result<MeshParts> {
        self.validate()?;

        let [nx, ny, nz] = self.cells;
        let [lx, ly, lz] = self.lengths;
        let (dx, dy, dz) = (lx / nx as f64, ly / ny as f64, lz / nz as f64);

        let mut points = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
        for k in 0..=nz {
            for j in 0..=ny {
                for i in 0..=nx {
                    points.push(
                        self.origin
                            + Point3::new(i as f64 * dx, j as f64 * dy, k as f64 * dz),
                    );
                }
            }
        }

        let pt = |i: usize, j: usize, k: usize| i + (nx + 1) * (j + (ny + 1) * k);
        let cell = |i: usize, j: usize, k: usize| i + nx * (j + ny * k);

        // Quads with right-hand normals along +x, +y, +z
        let x_face = |i, j, k| vec![pt(i, j, k), pt(i, j + 1, k), pt(i, j + 1, k + 1), pt(i, j, k + 1)];
        let y_face = |i, j, k| vec![pt(i, j, k), pt(i, j, k + 1), pt(i + 1, j, k + 1), pt(i + 1, j, k)];
        let z_face = |i, j, k| vec![pt(i, j, k), pt(i + 1, j, k), pt(i + 1, j + 1, k), pt(i, j + 1, k)];
        let flip = |mut f: Vec<usize>| {
            f[1..].reverse();
            f
        };

        let mut faces = Vec::new();
        let mut owner = Vec::new();
        let mut neighbour = Vec::new();

        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let c = cell(i, j, k);
                    if i + 1 < nx {
                        faces.push(x_face(i + 1, j, k));
                        owner.push(c);
                        neighbour.push(cell(i + 1, j, k));
                    }
                    if j + 1 < ny {
                        faces.push(y_face(i, j + 1, k));
                        owner.push(c);
                        neighbour.push(cell(i, j + 1, k));
                    }
                    if k + 1 < nz {
                        faces.push(z_face(i, j, k + 1));
                        owner.push(c);
                        neighbour.push(cell(i, j, k + 1));
                    }
                }
            }
        }

        let mut patches = Vec::with_capacity(6);
        for side in Side::ALL {
            let start = faces.len();
            match side {
                Side::Left | Side::Right => {
                    let (i_face, i_cell) = if side == Side::Left { (0, 0) } else { (nx, nx - 1) };
                    for k in 0..nz {
                        for j in 0..ny {
                            let f = x_face(i_face, j, k);
                            faces.push(if side == Side::Left { flip(f) } else { f });
                            owner.push(cell(i_cell, j, k));
                        }
                    }
                }
                Side::Bottom | Side::Top => {
                    let (j_face, j_cell) = if side == Side::Bottom { (0, 0) } else { (ny, ny - 1) };
                    for k in 0..nz {
                        for i in 0..nx {
                            let f = y_face(i, j_face, k);
                            faces.push(if side == Side::Bottom { flip(f) } else { f });
                            owner.push(cell(i, j_cell, k));
                        }
                    }
                }
                Side::Back | Side::Front => {
                    let (k_face, k_cell) = if side == Side::Back { (0, 0) } else { (nz, nz - 1) };
                    for j in 0..ny {
                        for i in 0..nx {
                            let f = z_face(i, j, k_face);
                            faces.push(if side == Side::Back { flip(f) } else { f });
                            owner.push(cell(i, j, k_cell));
                        }
                    }
                }
            }
            let sp = &self.sides[side.index()];
            patches.push(PatchSpec::new(
                sp.name.clone(),
                sp.kind.clone(),
                start,
                faces.len() - start,
            ));
        }

        Ok(MeshParts {
            points,
            faces,
            owner,
            neighbour,
            patches,
        })
    }

    /// Build a serial mesh.
    pub fn build(&self) -> Result<FvMesh> {
        FvMesh::new(self.parts()?)
    }

    /// Build the mesh on a given communicator. Only meaningful for single-rank use.
    pub fn build_with_comm(&self, comm: Arc<dyn Communicator>) -> Result<FvMesh> {
        FvMesh::with_comm(self.parts()?, comm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vec3;
    use approx::assert_relative_eq;

    #[test]
    fn test_counts() {
        let parts = BlockMesh::new([3, 2, 1], [3.0, 2.0, 1.0]).parts().unwrap();
        assert_eq!(parts.points.len(), 4 * 3 * 2);
        // (nx-1)ny nz + nx(ny-1)nz + nx ny(nz-1)
        assert_eq!(parts.neighbour.len(), 2 * 2 + 3);
        assert_eq!(parts.faces.len(), 7 + 2 * (2 + 3 + 6));
        assert_eq!(parts.patches.len(), 6);
    }

    #[test]
    fn test_boundary_normals_point_outward() {
        let mesh = BlockMesh::new([2, 2, 2], [1.0, 1.0, 1.0]).build().unwrap();
        let expected = [
            ("left", Vec3::new(-1.0, 0.0, 0.0)),
            ("right", Vec3::new(1.0, 0.0, 0.0)),
            ("bottom", Vec3::new(0.0, -1.0, 0.0)),
            ("top", Vec3::new(0.0, 1.0, 0.0)),
            ("back", Vec3::new(0.0, 0.0, -1.0)),
            ("front", Vec3::new(0.0, 0.0, 1.0)),
        ];
        for (name, n) in expected {
            let patch = mesh.patch(mesh.find_patch(name).unwrap()).unwrap();
            assert_eq!(patch.size(), 4);
            for nf in patch.nf() {
                assert_relative_eq!(*nf, n, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_internal_normals_point_to_neighbour() {
        let mesh = BlockMesh::new([2, 3, 2], [1.0, 1.5, 2.0]).build().unwrap();
        for f in 0..mesh.n_internal_faces() {
            let d = mesh.cell_centres()[mesh.neighbour()[f]] - mesh.cell_centres()[mesh.owner()[f]];
            assert!(mesh.face_areas()[f].dot(&d) > 0.0);
        }
    }

    #[test]
    fn test_two_dimensional_and_named_sides() {
        let mesh = BlockMesh::new([4, 4, 1], [1.0, 1.0, 0.1])
            .side(Side::Top, "lid", PatchKind::Wall)
            .two_dimensional()
            .build()
            .unwrap();
        let lid = mesh.patch(mesh.find_patch("lid").unwrap()).unwrap();
        assert_eq!(lid.kind(), &PatchKind::Wall);
        let front = mesh.patch(mesh.find_patch("front").unwrap()).unwrap();
        assert!(front.is_empty_kind());
        assert!(mesh.find_patch("top").is_none());
    }

    #[test]
    fn test_origin_shift() {
        let mesh = BlockMesh::new([1, 1, 1], [2.0, 2.0, 2.0])
            .origin(Point3::new(-1.0, -1.0, -1.0))
            .build()
            .unwrap();
        assert_relative_eq!(mesh.cell_centres()[0], Point3::zeros(), epsilon = 1e-12);
        assert_relative_eq!(mesh.cell_volumes()[0], 8.0, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_blocks() {
        assert!(BlockMesh::new([0, 1, 1], [1.0, 1.0, 1.0]).parts().is_err());
        assert!(BlockMesh::new([1, 1, 1], [1.0, -1.0, 1.0]).parts().is_err());
        let dup = BlockMesh::new([1, 1, 1], [1.0, 1.0, 1.0]).side(Side::Top, "left", PatchKind::Wall);
        assert!(dup.parts().is_err());
    }
}
