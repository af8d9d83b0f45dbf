//! Finite-volume mesh.
//!
//! Stores the polyhedral topology (points, faces, owner/neighbour cells, boundary patches)
//! and derives everything the discretisation needs from it:
//!
//! - face centres, area vectors and cell centres / volumes,
//! - interpolation weights, delta coefficients and non-orthogonal correction vectors,
//! - the LDU addressing used by [`LduMatrix`](crate::ldu::LduMatrix).
//!
//! # Face ordering
//!
//! Internal faces come first and are ordered upper-triangular: `owner < neighbour`, sorted by
//! owner and then by neighbour. Boundary faces follow, grouped contiguously by patch. The
//! Gauss-Seidel smoother and the DIC/DILU factorisations rely on this ordering.

use crate::error::{Error, Result};
use crate::parallel::{Communicator, SerialComm};
use crate::types::{Point3, Vec3, VSMALL};
use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;

/// Boundary patch types.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchKind {
    /// Generic boundary.
    Patch,
    /// Wall boundary.
    Wall,
    /// Direction excluded from the solution (front/back of 2D cases).
    Empty,
    /// Symmetry plane.
    Symmetry,
    /// Periodic boundary coupled face-by-face to another patch of the same mesh.
    Cyclic { neighbour_patch: String },
    /// Boundary shared with another subdomain of a decomposed case.
    Processor {
        neighbour_rank: usize,
        /// Centres of the cells on the other side, one per patch face.
        neighbour_centres: Vec<Point3>,
    },
}

impl PatchKind {
    /// Coupled patches exchange values with a neighbouring cell instead of prescribing them.
    pub fn coupled(&self) -> bool {
        matches!(self, PatchKind::Cyclic { .. } | PatchKind::Processor { .. })
    }

    /// Type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            PatchKind::Patch => "patch",
            PatchKind::Wall => "wall",
            PatchKind::Empty => "empty",
            PatchKind::Symmetry => "symmetryPlane",
            PatchKind::Cyclic { .. } => "cyclic",
            PatchKind::Processor { .. } => "processor",
        }
    }
}

/// Patch definition used to construct a mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchSpec {
    pub name: String,
    pub kind: PatchKind,
    /// Index of the first face of the patch.
    pub start: usize,
    /// Number of faces in the patch.
    pub size: usize,
}

impl PatchSpec {
    pub fn new(name: impl Into<String>, kind: PatchKind, start: usize, size: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            start,
            size,
        }
    }
}

/// Primitive mesh description: everything needed to build an [`FvMesh`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshParts {
    pub points: Vec<Point3>,
    /// Point labels of each face, ordered so the right-hand normal points out of the owner.
    pub faces: Vec<Vec<usize>>,
    pub owner: Vec<usize>,
    /// Neighbour cell of each internal face.
    pub neighbour: Vec<usize>,
    pub patches: Vec<PatchSpec>,
}

/// A boundary patch with its face addressing and geometry.
#[derive(Debug, Clone)]
pub struct Patch {
    name: String,
    kind: PatchKind,
    start: usize,
    size: usize,
    face_cells: Vec<usize>,
    /// Index of the paired patch for cyclics.
    neighbour_patch: Option<usize>,
    nf: Vec<Vec3>,
    delta: Vec<Vec3>,
    weights: Vec<f64>,
    delta_coeffs: Vec<f64>,
    non_orth_delta_coeffs: Vec<f64>,
    corr_vecs: Vec<Vec3>,
}

impl Patch {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &PatchKind {
        &self.kind
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Global face index range of the patch.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.size
    }

    /// Cells adjacent to each patch face.
    pub fn face_cells(&self) -> &[usize] {
        &self.face_cells
    }

    pub fn coupled(&self) -> bool {
        self.kind.coupled()
    }

    pub fn is_empty_kind(&self) -> bool {
        self.kind == PatchKind::Empty
    }

    /// Paired patch index of a cyclic.
    pub fn neighbour_patch(&self) -> Option<usize> {
        self.neighbour_patch
    }

    /// Neighbouring subdomain of a processor patch.
    pub fn neighbour_rank(&self) -> Option<usize> {
        match self.kind {
            PatchKind::Processor { neighbour_rank, .. } => Some(neighbour_rank),
            _ => None,
        }
    }

    /// Unit face normals.
    pub fn nf(&self) -> &[Vec3] {
        &self.nf
    }

    /// Cell-to-face (non-coupled) or cell-to-neighbour-cell (coupled) vectors.
    pub fn delta(&self) -> &[Vec3] {
        &self.delta
    }

    /// Interpolation weights of the internal side (1 on non-coupled patches).
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn delta_coeffs(&self) -> &[f64] {
        &self.delta_coeffs
    }

    pub fn non_orth_delta_coeffs(&self) -> &[f64] {
        &self.non_orth_delta_coeffs
    }

    /// Non-orthogonal correction vectors (zero on non-coupled patches).
    pub fn corr_vecs(&self) -> &[Vec3] {
        &self.corr_vecs
    }
}

/// Lower/upper addressing of the face-based sparse matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct LduAddressing {
    n_cells: usize,
    lower: Vec<usize>,
    upper: Vec<usize>,
    owner_start: Vec<usize>,
    losort: Vec<usize>,
    losort_start: Vec<usize>,
}

impl LduAddressing {
    /// Build addressing from upper-triangular ordered lower/upper face cells.
    pub fn new(n_cells: usize, lower: Vec<usize>, upper: Vec<usize>) -> Self {
        let n_faces = lower.len();

        let mut owner_start = vec![0usize; n_cells + 1];
        for &l in &lower {
            owner_start[l + 1] += 1;
        }
        for c in 0..n_cells {
            owner_start[c + 1] += owner_start[c];
        }

        // Faces ordered by their upper cell; stable so ties keep face order
        let mut losort: Vec<usize> = (0..n_faces).collect();
        losort.sort_by_key(|&f| upper[f]);

        let mut losort_start = vec![0usize; n_cells + 1];
        for &u in &upper {
            losort_start[u + 1] += 1;
        }
        for c in 0..n_cells {
            losort_start[c + 1] += losort_start[c];
        }

        Self {
            n_cells,
            lower,
            upper,
            owner_start,
            losort,
            losort_start,
        }
    }

    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    pub fn n_faces(&self) -> usize {
        self.lower.len()
    }

    /// Owner cell of each internal face (row of the upper coefficient).
    pub fn lower(&self) -> &[usize] {
        &self.lower
    }

    /// Neighbour cell of each internal face (row of the lower coefficient).
    pub fn upper(&self) -> &[usize] {
        &self.upper
    }

    /// First face owned by each cell; `owner_start[n_cells]` is the face count.
    pub fn owner_start(&self) -> &[usize] {
        &self.owner_start
    }

    /// Face indices sorted by upper cell.
    pub fn losort(&self) -> &[usize] {
        &self.losort
    }

    pub fn losort_start(&self) -> &[usize] {
        &self.losort_start
    }
}

/// Result of [`FvMesh::check`].
#[derive(Debug, Clone, PartialEq)]
pub struct MeshCheckReport {
    pub n_points: usize,
    pub n_faces: usize,
    pub n_internal_faces: usize,
    pub n_cells: usize,
    pub n_patches: usize,
    /// Cells whose face area vectors do not sum to zero.
    pub open_cells: Vec<usize>,
    /// Cells with zero or negative volume.
    pub non_positive_volumes: Vec<usize>,
    pub min_volume: f64,
    pub max_volume: f64,
    pub total_volume: f64,
    /// Maximum angle between face normal and cell-centre vector (degrees).
    pub max_non_orthogonality: f64,
    pub average_non_orthogonality: f64,
    /// Faces above [`SEVERE_NON_ORTHOGONALITY`] degrees.
    pub severely_non_orthogonal_faces: usize,
}

/// Non-orthogonality (degrees) above which faces are reported.
pub const SEVERE_NON_ORTHOGONALITY: f64 = 70.0;

const CLOSED_CELL_TOLERANCE: f64 = 1e-6;

impl MeshCheckReport {
    /// True when no check failed.
    pub fn ok(&self) -> bool {
        self.open_cells.is_empty()
            && self.non_positive_volumes.is_empty()
            && self.severely_non_orthogonal_faces == 0
    }
}

impl fmt::Display for MeshCheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Mesh stats")?;
        writeln!(f, "    points:           {}", self.n_points)?;
        writeln!(f, "    faces:            {}", self.n_faces)?;
        writeln!(f, "    internal faces:   {}", self.n_internal_faces)?;
        writeln!(f, "    cells:            {}", self.n_cells)?;
        writeln!(f, "    boundary patches: {}", self.n_patches)?;
        writeln!(f, "Checking geometry...")?;
        writeln!(
            f,
            "    Min volume = {:e}. Max volume = {:e}. Total volume = {:e}.",
            self.min_volume, self.max_volume, self.total_volume
        )?;
        writeln!(
            f,
            "    Mesh non-orthogonality Max: {:.4} average: {:.4}",
            self.max_non_orthogonality, self.average_non_orthogonality
        )?;
        if !self.open_cells.is_empty() {
            writeln!(f, "   ***Open cells found: {}", self.open_cells.len())?;
        }
        if !self.non_positive_volumes.is_empty() {
            writeln!(
                f,
                "   ***Zero or negative cell volume detected: {}",
                self.non_positive_volumes.len()
            )?;
        }
        if self.severely_non_orthogonal_faces > 0 {
            writeln!(
                f,
                "   ***Number of severely non-orthogonal faces: {}",
                self.severely_non_orthogonal_faces
            )?;
        }
        if self.ok() {
            write!(f, "Mesh OK.")
        } else {
            write!(f, "Failed mesh checks.")
        }
    }
}

/// Finite-volume mesh with derived geometry and LDU addressing.
#[derive(Debug, Clone)]
pub struct FvMesh {
    points: Vec<Point3>,
    faces: Vec<Vec<usize>>,
    owner: Vec<usize>,
    neighbour: Vec<usize>,
    patches: Vec<Patch>,
    n_cells: usize,
    cells: Vec<Vec<usize>>,

    face_centres: Vec<Point3>,
    face_areas: Vec<Vec3>,
    mag_face_areas: Vec<f64>,
    cell_centres: Vec<Point3>,
    cell_volumes: Vec<f64>,

    weights: Vec<f64>,
    delta_coeffs: Vec<f64>,
    non_orth_delta_coeffs: Vec<f64>,
    corr_vecs: Vec<Vec3>,

    addressing: Arc<LduAddressing>,
    comm: Arc<dyn Communicator>,
}

impl FvMesh {
    /// Build a serial mesh.
    pub fn new(parts: MeshParts) -> Result<Self> {
        Self::with_comm(parts, Arc::new(SerialComm::new()))
    }

    /// Build a mesh that is one subdomain of a decomposed case.
    pub fn with_comm(parts: MeshParts, comm: Arc<dyn Communicator>) -> Result<Self> {
        let MeshParts {
            points,
            faces,
            owner,
            neighbour,
            patches: patch_specs,
        } = parts;

        let n_cells = validate_topology(&points, &faces, &owner, &neighbour)?;
        let n_internal = neighbour.len();
        validate_patches(&patch_specs, n_internal, faces.len(), comm.as_ref())?;

        // Face geometry is independent per face
        let (face_centres, face_areas): (Vec<Point3>, Vec<Vec3>) = faces
            .par_iter()
            .map(|face| face_geometry(&points, face))
            .unzip();
        let mag_face_areas: Vec<f64> = face_areas.iter().map(|s| s.norm()).collect();

        let (cell_centres, cell_volumes) =
            cell_geometry(n_cells, &owner, &neighbour, &face_centres, &face_areas);

        let mut cells = vec![Vec::new(); n_cells];
        for (f, &o) in owner.iter().enumerate() {
            cells[o].push(f);
        }
        for (f, &n) in neighbour.iter().enumerate() {
            cells[n].push(f);
        }

        let mut weights = Vec::with_capacity(n_internal);
        let mut delta_coeffs = Vec::with_capacity(n_internal);
        let mut non_orth_delta_coeffs = Vec::with_capacity(n_internal);
        let mut corr_vecs = Vec::with_capacity(n_internal);
        for f in 0..n_internal {
            let (own, nei) = (owner[f], neighbour[f]);
            let sf = face_areas[f];
            let d_own = sf.dot(&(face_centres[f] - cell_centres[own])).abs();
            let d_nei = sf.dot(&(cell_centres[nei] - face_centres[f])).abs();
            weights.push(d_nei / (d_own + d_nei + VSMALL));

            let delta = cell_centres[nei] - cell_centres[own];
            let unit_area = sf / mag_face_areas[f].max(VSMALL);
            delta_coeffs.push(1.0 / delta.norm().max(VSMALL));
            let nodc = 1.0 / unit_area.dot(&delta).max(0.05 * delta.norm()).max(VSMALL);
            non_orth_delta_coeffs.push(nodc);
            corr_vecs.push(unit_area - delta * nodc);
        }

        let addressing = Arc::new(LduAddressing::new(
            n_cells,
            owner[..n_internal].to_vec(),
            neighbour.clone(),
        ));

        let mut mesh = Self {
            points,
            faces,
            owner,
            neighbour,
            patches: Vec::new(),
            n_cells,
            cells,
            face_centres,
            face_areas,
            mag_face_areas,
            cell_centres,
            cell_volumes,
            weights,
            delta_coeffs,
            non_orth_delta_coeffs,
            corr_vecs,
            addressing,
            comm,
        };
        mesh.patches = mesh.build_patches(patch_specs)?;

        log::debug!(
            "Mesh built: {} cells, {} faces ({} internal), {} patches on rank {}",
            mesh.n_cells,
            mesh.faces.len(),
            n_internal,
            mesh.patches.len(),
            mesh.comm.rank()
        );

        Ok(mesh)
    }

    fn build_patches(&self, specs: Vec<PatchSpec>) -> Result<Vec<Patch>> {
        let names: Vec<String> = specs.iter().map(|s| s.name.clone()).collect();
        let mut patches = Vec::with_capacity(specs.len());

        for spec in &specs {
            let range = spec.start..spec.start + spec.size;
            let face_cells: Vec<usize> = self.owner[range.clone()].to_vec();
            let nf: Vec<Vec3> = range
                .clone()
                .map(|f| self.face_areas[f] / self.mag_face_areas[f].max(VSMALL))
                .collect();
            let d_own: Vec<Vec3> = range
                .clone()
                .zip(&face_cells)
                .map(|(f, &c)| self.face_centres[f] - self.cell_centres[c])
                .collect();

            let mut neighbour_patch = None;
            // Neighbour-side face-to-cell vectors and normals for coupled patches
            let coupled_side: Option<(Vec<Vec3>, Vec<Vec3>)> = match &spec.kind {
                PatchKind::Cyclic {
                    neighbour_patch: nbr_name,
                } => {
                    let nbr_index = names.iter().position(|n| n == nbr_name).ok_or_else(|| {
                        Error::Mesh(format!(
                            "cyclic patch {} refers to unknown patch {}",
                            spec.name, nbr_name
                        ))
                    })?;
                    neighbour_patch = Some(nbr_index);
                    let nbr = &specs[nbr_index];
                    let nbr_range = nbr.start..nbr.start + nbr.size;
                    let nbr_d: Vec<Vec3> = nbr_range
                        .clone()
                        .map(|f| self.face_centres[f] - self.cell_centres[self.owner[f]])
                        .collect();
                    let nbr_nf: Vec<Vec3> = nbr_range
                        .map(|f| self.face_areas[f] / self.mag_face_areas[f].max(VSMALL))
                        .collect();
                    Some((nbr_d, nbr_nf))
                }
                PatchKind::Processor {
                    neighbour_centres, ..
                } => {
                    let nbr_d: Vec<Vec3> = range
                        .clone()
                        .zip(neighbour_centres)
                        .map(|(f, c)| self.face_centres[f] - c)
                        .collect();
                    let nbr_nf: Vec<Vec3> = nf.iter().map(|n| -n).collect();
                    Some((nbr_d, nbr_nf))
                }
                _ => None,
            };

            let n = spec.size;
            let mut delta = Vec::with_capacity(n);
            let mut weights = Vec::with_capacity(n);
            let mut delta_coeffs = Vec::with_capacity(n);
            let mut non_orth_delta_coeffs = Vec::with_capacity(n);
            let mut corr_vecs = Vec::with_capacity(n);

            match coupled_side {
                Some((nbr_d, nbr_nf)) => {
                    for i in 0..n {
                        let d = d_own[i] - nbr_d[i];
                        let nf_delta = nf[i].dot(&d_own[i]).abs();
                        let nbr_nf_delta = nbr_nf[i].dot(&nbr_d[i]).abs();
                        weights.push(nbr_nf_delta / (nf_delta + nbr_nf_delta + VSMALL));
                        delta_coeffs.push(1.0 / d.norm().max(VSMALL));
                        let nodc = 1.0 / nf[i].dot(&d).max(0.05 * d.norm()).max(VSMALL);
                        non_orth_delta_coeffs.push(nodc);
                        corr_vecs.push(nf[i] - d * nodc);
                        delta.push(d);
                    }
                }
                None => {
                    for i in 0..n {
                        let d = nf[i] * nf[i].dot(&d_own[i]);
                        let dc = 1.0 / d.norm().max(VSMALL);
                        weights.push(1.0);
                        delta_coeffs.push(dc);
                        non_orth_delta_coeffs.push(dc);
                        corr_vecs.push(Vec3::zeros());
                        delta.push(d);
                    }
                }
            }

            patches.push(Patch {
                name: spec.name.clone(),
                kind: spec.kind.clone(),
                start: spec.start,
                size: spec.size,
                face_cells,
                neighbour_patch,
                nf,
                delta,
                weights,
                delta_coeffs,
                non_orth_delta_coeffs,
                corr_vecs,
            });
        }

        Ok(patches)
    }

    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    pub fn n_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn n_internal_faces(&self) -> usize {
        self.neighbour.len()
    }

    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    pub fn faces(&self) -> &[Vec<usize>] {
        &self.faces
    }

    pub fn owner(&self) -> &[usize] {
        &self.owner
    }

    pub fn neighbour(&self) -> &[usize] {
        &self.neighbour
    }

    /// Faces of each cell.
    pub fn cells(&self) -> &[Vec<usize>] {
        &self.cells
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn patch(&self, index: usize) -> Option<&Patch> {
        self.patches.get(index)
    }

    /// Index of the patch with the given name.
    pub fn find_patch(&self, name: &str) -> Option<usize> {
        self.patches.iter().position(|p| p.name == name)
    }

    /// Patch owning a boundary face.
    pub fn which_patch(&self, face: usize) -> Option<usize> {
        self.patches.iter().position(|p| p.range().contains(&face))
    }

    pub fn face_centres(&self) -> &[Point3] {
        &self.face_centres
    }

    /// Face area vectors (magnitude = area, direction = outward from owner).
    pub fn face_areas(&self) -> &[Vec3] {
        &self.face_areas
    }

    pub fn mag_face_areas(&self) -> &[f64] {
        &self.mag_face_areas
    }

    pub fn cell_centres(&self) -> &[Point3] {
        &self.cell_centres
    }

    pub fn cell_volumes(&self) -> &[f64] {
        &self.cell_volumes
    }

    /// Owner-side linear interpolation weights of internal faces.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn delta_coeffs(&self) -> &[f64] {
        &self.delta_coeffs
    }

    pub fn non_orth_delta_coeffs(&self) -> &[f64] {
        &self.non_orth_delta_coeffs
    }

    pub fn corr_vecs(&self) -> &[Vec3] {
        &self.corr_vecs
    }

    /// Shared LDU addressing of the internal faces.
    pub fn ldu_addressing(&self) -> &Arc<LduAddressing> {
        &self.addressing
    }

    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    /// Face area vectors of a patch.
    pub fn patch_face_areas(&self, patch: usize) -> &[Vec3] {
        &self.face_areas[self.patches[patch].range()]
    }

    pub fn patch_mag_face_areas(&self, patch: usize) -> &[f64] {
        &self.mag_face_areas[self.patches[patch].range()]
    }

    pub fn patch_face_centres(&self, patch: usize) -> &[Point3] {
        &self.face_centres[self.patches[patch].range()]
    }

    /// Volume of the whole (possibly decomposed) domain.
    pub fn total_volume(&self) -> Result<f64> {
        self.comm.sum(self.cell_volumes.iter().sum())
    }

    /// Run the geometric and topological mesh checks.
    pub fn check(&self) -> MeshCheckReport {
        let mut sum_closed = vec![Vec3::zeros(); self.n_cells];
        let mut sum_mag_closed = vec![0.0; self.n_cells];
        for (f, sf) in self.face_areas.iter().enumerate() {
            let own = self.owner[f];
            sum_closed[own] += sf;
            sum_mag_closed[own] += sf.norm();
            if f < self.n_internal_faces() {
                let nei = self.neighbour[f];
                sum_closed[nei] -= sf;
                sum_mag_closed[nei] += sf.norm();
            }
        }
        let open_cells: Vec<usize> = (0..self.n_cells)
            .filter(|&c| sum_closed[c].norm() > CLOSED_CELL_TOLERANCE * sum_mag_closed[c])
            .collect();

        let non_positive_volumes: Vec<usize> = (0..self.n_cells)
            .filter(|&c| self.cell_volumes[c] <= VSMALL)
            .collect();

        let min_volume = self.cell_volumes.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_volume = self
            .cell_volumes
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        let total_volume: f64 = self.cell_volumes.iter().sum();

        let mut angles = Vec::with_capacity(self.n_internal_faces());
        for f in 0..self.n_internal_faces() {
            let d = self.cell_centres[self.neighbour[f]] - self.cell_centres[self.owner[f]];
            angles.push(angle_degrees(&self.face_areas[f], &d));
        }
        for patch in self.patches.iter().filter(|p| p.coupled()) {
            for (i, f) in patch.range().enumerate() {
                angles.push(angle_degrees(&self.face_areas[f], &patch.delta[i]));
            }
        }
        let max_non_orthogonality = angles.iter().cloned().fold(0.0, f64::max);
        let average_non_orthogonality = if angles.is_empty() {
            0.0
        } else {
            angles.iter().sum::<f64>() / angles.len() as f64
        };
        let severely_non_orthogonal_faces = angles
            .iter()
            .filter(|&&a| a > SEVERE_NON_ORTHOGONALITY)
            .count();

        let report = MeshCheckReport {
            n_points: self.points.len(),
            n_faces: self.faces.len(),
            n_internal_faces: self.n_internal_faces(),
            n_cells: self.n_cells,
            n_patches: self.patches.len(),
            open_cells,
            non_positive_volumes,
            min_volume: if self.n_cells > 0 { min_volume } else { 0.0 },
            max_volume: if self.n_cells > 0 { max_volume } else { 0.0 },
            total_volume,
            max_non_orthogonality,
            average_non_orthogonality,
            severely_non_orthogonal_faces,
        };

        if !report.ok() {
            log::warn!(
                "Mesh check failed: {} open cells, {} non-positive volumes, {} severely non-orthogonal faces",
                report.open_cells.len(),
                report.non_positive_volumes.len(),
                report.severely_non_orthogonal_faces
            );
        }

        report
    }
}

fn angle_degrees(a: &Vec3, b: &Vec3) -> f64 {
    let cos = a.dot(b) / (a.norm() * b.norm()).max(VSMALL);
    cos.clamp(-1.0, 1.0).acos().to_degrees()
}

/// Validate faces and owner/neighbour addressing, returning the cell count.
fn validate_topology(
    points: &[Point3],
    faces: &[Vec<usize>],
    owner: &[usize],
    neighbour: &[usize],
) -> Result<usize> {
    if owner.len() != faces.len() {
        return Err(Error::Mesh(format!(
            "owner list has {} entries for {} faces",
            owner.len(),
            faces.len()
        )));
    }
    if neighbour.len() > faces.len() {
        return Err(Error::Mesh(format!(
            "neighbour list has {} entries for {} faces",
            neighbour.len(),
            faces.len()
        )));
    }

    for (f, face) in faces.iter().enumerate() {
        if face.len() < 3 {
            return Err(Error::Mesh(format!(
                "face {} has {} points, at least 3 are required",
                f,
                face.len()
            )));
        }
        if let Some(&p) = face.iter().find(|&&p| p >= points.len()) {
            return Err(Error::Mesh(format!(
                "face {} uses point {} but the mesh has {} points",
                f,
                p,
                points.len()
            )));
        }
    }

    for (f, (&o, &n)) in owner.iter().zip(neighbour).enumerate() {
        if o >= n {
            return Err(Error::Mesh(format!(
                "internal face {} has owner {} >= neighbour {}",
                f, o, n
            )));
        }
        if f > 0 && (owner[f - 1], neighbour[f - 1]) >= (o, n) {
            return Err(Error::Mesh(format!(
                "internal face {} ({}, {}) is not in upper-triangular order",
                f, o, n
            )));
        }
    }

    let n_cells = owner
        .iter()
        .chain(neighbour)
        .max()
        .map(|&m| m + 1)
        .unwrap_or(0);

    let mut n_cell_faces = vec![0usize; n_cells];
    for &c in owner.iter().chain(neighbour) {
        n_cell_faces[c] += 1;
    }
    if let Some(c) = n_cell_faces.iter().position(|&n| n < 4) {
        return Err(Error::Mesh(format!(
            "cell {} has only {} faces",
            c, n_cell_faces[c]
        )));
    }

    Ok(n_cells)
}

fn validate_patches(
    patches: &[PatchSpec],
    n_internal: usize,
    n_faces: usize,
    comm: &dyn Communicator,
) -> Result<()> {
    let mut next = n_internal;
    for spec in patches {
        if spec.start != next {
            return Err(Error::Mesh(format!(
                "patch {} starts at face {}, expected {}",
                spec.name, spec.start, next
            )));
        }
        next += spec.size;

        match &spec.kind {
            PatchKind::Cyclic { neighbour_patch } => {
                let nbr = patches
                    .iter()
                    .find(|p| &p.name == neighbour_patch)
                    .ok_or_else(|| {
                        Error::Mesh(format!(
                            "cyclic patch {} refers to unknown patch {}",
                            spec.name, neighbour_patch
                        ))
                    })?;
                let points_back = matches!(
                    &nbr.kind,
                    PatchKind::Cyclic { neighbour_patch } if neighbour_patch == &spec.name
                );
                if !points_back || nbr.size != spec.size {
                    return Err(Error::Mesh(format!(
                        "cyclic patches {} and {} are not a matching pair",
                        spec.name, nbr.name
                    )));
                }
            }
            PatchKind::Processor {
                neighbour_rank,
                neighbour_centres,
            } => {
                if *neighbour_rank >= comm.n_ranks() || *neighbour_rank == comm.rank() {
                    return Err(Error::Mesh(format!(
                        "processor patch {} couples rank {} to invalid rank {} ({} ranks)",
                        spec.name,
                        comm.rank(),
                        neighbour_rank,
                        comm.n_ranks()
                    )));
                }
                if neighbour_centres.len() != spec.size {
                    return Err(Error::Mesh(format!(
                        "processor patch {} has {} faces but {} neighbour centres",
                        spec.name,
                        spec.size,
                        neighbour_centres.len()
                    )));
                }
            }
            _ => {}
        }
    }

    if next != n_faces {
        return Err(Error::Mesh(format!(
            "patches cover faces up to {} but the mesh has {} faces",
            next, n_faces
        )));
    }

    Ok(())
}

/// Face centre and area vector by triangle decomposition about the point average.
fn face_geometry(points: &[Point3], face: &[usize]) -> (Point3, Vec3) {
    let n = face.len();
    if n == 3 {
        let (a, b, c) = (points[face[0]], points[face[1]], points[face[2]]);
        return ((a + b + c) / 3.0, 0.5 * (b - a).cross(&(c - a)));
    }

    let f_centre = face.iter().fold(Point3::zeros(), |acc, &p| acc + points[p]) / n as f64;

    let mut sum_n = Vec3::zeros();
    let mut sum_a = 0.0;
    let mut sum_ac = Vec3::zeros();
    for i in 0..n {
        let p = points[face[i]];
        let next = points[face[(i + 1) % n]];
        let c = p + next + f_centre;
        let tri_n = (next - p).cross(&(f_centre - p));
        let a = tri_n.norm();
        sum_n += tri_n;
        sum_a += a;
        sum_ac += a * c;
    }

    let centre = if sum_a > VSMALL {
        sum_ac / (3.0 * sum_a)
    } else {
        f_centre
    };
    (centre, 0.5 * sum_n)
}

/// Cell centres and volumes by pyramid decomposition about the face-centre average.
fn cell_geometry(
    n_cells: usize,
    owner: &[usize],
    neighbour: &[usize],
    face_centres: &[Point3],
    face_areas: &[Vec3],
) -> (Vec<Point3>, Vec<f64>) {
    let mut c_est = vec![Point3::zeros(); n_cells];
    let mut n_cell_faces = vec![0usize; n_cells];
    for (f, &o) in owner.iter().enumerate() {
        c_est[o] += face_centres[f];
        n_cell_faces[o] += 1;
    }
    for (f, &n) in neighbour.iter().enumerate() {
        c_est[n] += face_centres[f];
        n_cell_faces[n] += 1;
    }
    for (c, count) in c_est.iter_mut().zip(&n_cell_faces) {
        *c /= (*count).max(1) as f64;
    }

    let mut centres = vec![Point3::zeros(); n_cells];
    let mut volumes = vec![0.0; n_cells];
    for (f, &o) in owner.iter().enumerate() {
        let pyr3_vol = face_areas[f].dot(&(face_centres[f] - c_est[o]));
        let pc = 0.75 * face_centres[f] + 0.25 * c_est[o];
        centres[o] += pyr3_vol * pc;
        volumes[o] += pyr3_vol;
    }
    for (f, &n) in neighbour.iter().enumerate() {
        let pyr3_vol = face_areas[f].dot(&(c_est[n] - face_centres[f]));
        let pc = 0.75 * face_centres[f] + 0.25 * c_est[n];
        centres[n] += pyr3_vol * pc;
        volumes[n] += pyr3_vol;
    }

    for c in 0..n_cells {
        if volumes[c].abs() > VSMALL {
            centres[c] /= volumes[c];
        } else {
            centres[c] = c_est[c];
        }
        volumes[c] /= 3.0;
    }

    (centres, volumes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_mesh::BlockMesh;
    use approx::assert_relative_eq;

    #[test]
    fn test_unit_cube_geometry() {
        let mesh = BlockMesh::new([2, 2, 2], [1.0, 1.0, 1.0]).build().unwrap();

        assert_eq!(mesh.n_cells(), 8);
        assert_eq!(mesh.n_internal_faces(), 12);
        assert_eq!(mesh.n_faces(), 36);
        assert_eq!(mesh.n_points(), 27);

        for &v in mesh.cell_volumes() {
            assert_relative_eq!(v, 0.125, epsilon = 1e-12);
        }
        for &a in mesh.mag_face_areas() {
            assert_relative_eq!(a, 0.25, epsilon = 1e-12);
        }
        assert_relative_eq!(mesh.total_volume().unwrap(), 1.0, epsilon = 1e-12);

        let c0 = mesh.cell_centres()[0];
        assert_relative_eq!(c0, Point3::new(0.25, 0.25, 0.25), epsilon = 1e-12);
    }

    #[test]
    fn test_internal_face_coefficients() {
        let mesh = BlockMesh::new([4, 1, 1], [1.0, 0.1, 0.1]).build().unwrap();

        for f in 0..mesh.n_internal_faces() {
            assert_relative_eq!(mesh.weights()[f], 0.5, epsilon = 1e-12);
            assert_relative_eq!(mesh.delta_coeffs()[f], 4.0, epsilon = 1e-10);
            assert_relative_eq!(mesh.non_orth_delta_coeffs()[f], 4.0, epsilon = 1e-10);
            assert!(mesh.corr_vecs()[f].norm() < 1e-12);
        }

        let left = mesh.find_patch("left").unwrap();
        let patch = mesh.patch(left).unwrap();
        assert_eq!(patch.face_cells(), &[0]);
        assert_relative_eq!(patch.weights()[0], 1.0);
        assert_relative_eq!(patch.delta_coeffs()[0], 8.0, epsilon = 1e-10);
        assert_relative_eq!(patch.nf()[0], Vec3::new(-1.0, 0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_ldu_addressing() {
        let mesh = BlockMesh::new([3, 2, 1], [3.0, 2.0, 1.0]).build().unwrap();
        let addr = mesh.ldu_addressing();

        assert_eq!(addr.n_cells(), 6);
        assert_eq!(addr.n_faces(), mesh.n_internal_faces());
        assert_eq!(addr.owner_start()[6], addr.n_faces());

        for c in 0..addr.n_cells() {
            for f in addr.owner_start()[c]..addr.owner_start()[c + 1] {
                assert_eq!(addr.lower()[f], c);
            }
            for i in addr.losort_start()[c]..addr.losort_start()[c + 1] {
                assert_eq!(addr.upper()[addr.losort()[i]], c);
            }
        }
    }

    #[test]
    fn test_mesh_check_passes_for_block() {
        let mesh = BlockMesh::new([3, 3, 3], [1.0, 2.0, 3.0]).build().unwrap();
        let report = mesh.check();
        assert!(report.ok(), "{}", report);
        assert!(report.max_non_orthogonality < 1e-6);
        assert_relative_eq!(report.total_volume, 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cyclic_patch_coupling() {
        let mesh = BlockMesh::new([4, 1, 1], [1.0, 1.0, 1.0])
            .cyclic(crate::types::Axis::X)
            .build()
            .unwrap();

        let left = mesh.find_patch("left").unwrap();
        let right = mesh.find_patch("right").unwrap();
        let patch = mesh.patch(left).unwrap();
        assert!(patch.coupled());
        assert_eq!(patch.neighbour_patch(), Some(right));
        assert_relative_eq!(patch.weights()[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(patch.delta_coeffs()[0], 4.0, epsilon = 1e-10);
        assert_relative_eq!(patch.delta()[0], Vec3::new(-0.25, 0.0, 0.0), epsilon = 1e-12);
        assert!(patch.corr_vecs()[0].norm() < 1e-12);
    }

    #[test]
    fn test_rejects_unordered_faces() {
        let mut parts = BlockMesh::new([2, 2, 1], [1.0, 1.0, 1.0]).parts().unwrap();
        parts.owner.swap(0, 1);
        parts.neighbour.swap(0, 1);
        parts.faces.swap(0, 1);
        let result = FvMesh::new(parts);
        assert!(matches!(result, Err(Error::Mesh(_))));
    }

    #[test]
    fn test_rejects_patch_gap() {
        let mut parts = BlockMesh::new([2, 1, 1], [1.0, 1.0, 1.0]).parts().unwrap();
        parts.patches[1].start += 1;
        assert!(FvMesh::new(parts).is_err());
    }

    #[test]
    fn test_rejects_processor_patch_in_serial() {
        let mut parts = BlockMesh::new([2, 1, 1], [1.0, 1.0, 1.0]).parts().unwrap();
        let size = parts.patches[0].size;
        parts.patches[0].kind = PatchKind::Processor {
            neighbour_rank: 1,
            neighbour_centres: vec![Point3::zeros(); size],
        };
        assert!(FvMesh::new(parts).is_err());
    }

    #[test]
    fn test_polygon_face_geometry() {
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(2.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let (centre, area) = face_geometry(&points, &[0, 1, 2, 3]);
        assert_relative_eq!(centre, Point3::new(1.0, 0.5, 0.0), epsilon = 1e-12);
        assert_relative_eq!(area, Vec3::new(0.0, 0.0, 2.0), epsilon = 1e-12);
    }
}
