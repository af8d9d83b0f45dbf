//! Domain decomposition into subdomains coupled by processor patches.
//!
//! [`decompose`] splits a serial mesh into `n` subdomains. Each subdomain keeps every patch
//! of the original mesh (possibly with zero faces) followed by one `procBoundary<r>to<s>`
//! patch per neighbouring rank. Processor faces appear in global face order on both sides;
//! the side that does not own the face in the serial mesh stores it flipped.
//!
//! Subdomains run on threads of one process through [`run_parallel`], each with a connected
//! [`ThreadComm`]:
//!
//! ```ignore
//! let case = decompose(&mesh, 2, &DecompositionMethod::Simple { axis: Axis::X })?;
//! let fields = run_parallel(2, |rank, comm| {
//!     let local = case.mesh(rank, comm)?;
//!     let mut t = case.distribute(&local, &t_global)?;
//!     // assemble and solve on `local`
//!     Ok(t)
//! })?;
//! let t_global = case.reconstruct(&mesh, &fields)?;
//! ```

use crate::boundary::PatchField;
use crate::error::{Error, Result};
use crate::field::{SurfaceScalarField, VolScalarField};
use crate::mesh::{FvMesh, MeshParts, PatchKind, PatchSpec};
use crate::parallel::{Communicator, ThreadComm};
use crate::types::Axis;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How cells are assigned to subdomains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum DecompositionMethod {
    /// Slabs of equal cell count ordered by cell-centre coordinate along an axis.
    Simple { axis: Axis },
}

impl DecompositionMethod {
    /// Rank of every cell of `mesh`.
    pub fn cell_ranks(&self, mesh: &FvMesh, n_ranks: usize) -> Vec<usize> {
        match *self {
            DecompositionMethod::Simple { axis } => {
                let dir = axis.index();
                let centres = mesh.cell_centres();
                let n_cells = mesh.n_cells();
                let mut order: Vec<usize> = (0..n_cells).collect();
                order.sort_by(|&a, &b| centres[a][dir].total_cmp(&centres[b][dir]).then(a.cmp(&b)));
                let mut ranks = vec![0; n_cells];
                for (position, &cell) in order.iter().enumerate() {
                    ranks[cell] = position * n_ranks / n_cells;
                }
                ranks
            }
        }
    }
}

/// Mesh and addressing of one subdomain.
#[derive(Debug, Clone)]
pub struct Subdomain {
    parts: MeshParts,
    /// Global cell of each local cell.
    cell_addressing: Vec<usize>,
    /// Global face of each local face.
    face_addressing: Vec<usize>,
    /// True for faces stored with the opposite orientation to the global mesh.
    flipped: Vec<bool>,
    /// Global patch of each local patch; `None` for processor patches.
    patch_addressing: Vec<Option<usize>>,
}

impl Subdomain {
    pub fn parts(&self) -> &MeshParts {
        &self.parts
    }

    pub fn cell_addressing(&self) -> &[usize] {
        &self.cell_addressing
    }

    pub fn face_addressing(&self) -> &[usize] {
        &self.face_addressing
    }

    pub fn flipped(&self) -> &[bool] {
        &self.flipped
    }

    pub fn patch_addressing(&self) -> &[Option<usize>] {
        &self.patch_addressing
    }

    /// Global faces covered by local patch `patch`, relative to the start of the global patch.
    fn patch_positions(&self, patch: usize, global_start: usize) -> Vec<usize> {
        let spec = &self.parts.patches[patch];
        (spec.start..spec.start + spec.size)
            .map(|f| self.face_addressing[f] - global_start)
            .collect()
    }
}

/// A serial mesh split into subdomains.
#[derive(Debug, Clone)]
pub struct DecomposedCase {
    subdomains: Vec<Subdomain>,
    n_cells: usize,
    n_internal_faces: usize,
    patch_starts: Vec<usize>,
    patch_sizes: Vec<usize>,
}

/// Split `mesh` into `n_ranks` subdomains.
pub fn decompose(mesh: &FvMesh, n_ranks: usize, method: &DecompositionMethod) -> Result<DecomposedCase> {
    if n_ranks == 0 || n_ranks > mesh.n_cells() {
        return Err(Error::Mesh(format!(
            "cannot split {} cells into {} subdomains",
            mesh.n_cells(),
            n_ranks
        )));
    }
    if mesh.comm().is_parallel() {
        return Err(Error::Mesh("mesh is already a subdomain of a decomposed case".into()));
    }

    let cell_ranks = method.cell_ranks(mesh, n_ranks);
    check_cyclics(mesh, &cell_ranks)?;

    let subdomains = (0..n_ranks)
        .map(|rank| build_subdomain(mesh, &cell_ranks, rank, n_ranks))
        .collect::<Result<Vec<_>>>()?;

    for (rank, sub) in subdomains.iter().enumerate() {
        let n_proc = sub.patch_addressing.iter().filter(|p| p.is_none()).count();
        log::debug!(
            "Subdomain {}: {} cells, {} faces, {} processor patches",
            rank,
            sub.cell_addressing.len(),
            sub.face_addressing.len(),
            n_proc
        );
    }
    log::info!(
        "Decomposed {} cells into {} subdomains ({:?})",
        mesh.n_cells(),
        n_ranks,
        method
    );

    Ok(DecomposedCase {
        subdomains,
        n_cells: mesh.n_cells(),
        n_internal_faces: mesh.n_internal_faces(),
        patch_starts: mesh.patches().iter().map(|p| p.start()).collect(),
        patch_sizes: mesh.patches().iter().map(|p| p.size()).collect(),
    })
}

/// Cyclic face pairs must stay on one rank.
fn check_cyclics(mesh: &FvMesh, cell_ranks: &[usize]) -> Result<()> {
    for patch in mesh.patches() {
        let Some(nbr) = patch.neighbour_patch() else {
            continue;
        };
        let nbr_cells = mesh.patches()[nbr].face_cells();
        let split = patch
            .face_cells()
            .iter()
            .zip(nbr_cells)
            .any(|(&a, &b)| cell_ranks[a] != cell_ranks[b]);
        if split {
            return Err(Error::Mesh(format!(
                "cyclic patches {} and {} would be split across subdomains, \
                 decompose along another axis",
                patch.name(),
                mesh.patches()[nbr].name()
            )));
        }
    }
    Ok(())
}

fn build_subdomain(mesh: &FvMesh, cell_ranks: &[usize], rank: usize, n_ranks: usize) -> Result<Subdomain> {
    let cell_addressing: Vec<usize> = (0..mesh.n_cells()).filter(|&c| cell_ranks[c] == rank).collect();
    let mut local_cell = vec![usize::MAX; mesh.n_cells()];
    for (i, &c) in cell_addressing.iter().enumerate() {
        local_cell[c] = i;
    }

    let (g_owner, g_neighbour) = (mesh.owner(), mesh.neighbour());
    let mut face_addressing = Vec::new();
    let mut flipped = Vec::new();
    let mut owner = Vec::new();
    let mut neighbour = Vec::new();

    for f in 0..mesh.n_internal_faces() {
        let (o, n) = (g_owner[f], g_neighbour[f]);
        if cell_ranks[o] == rank && cell_ranks[n] == rank {
            face_addressing.push(f);
            flipped.push(false);
            owner.push(local_cell[o]);
            neighbour.push(local_cell[n]);
        }
    }

    let mut patches = Vec::new();
    let mut patch_addressing = Vec::new();
    for (index, patch) in mesh.patches().iter().enumerate() {
        let start = face_addressing.len();
        for f in patch.range() {
            if cell_ranks[g_owner[f]] == rank {
                face_addressing.push(f);
                flipped.push(false);
                owner.push(local_cell[g_owner[f]]);
            }
        }
        patches.push(PatchSpec::new(
            patch.name(),
            patch.kind().clone(),
            start,
            face_addressing.len() - start,
        ));
        patch_addressing.push(Some(index));
    }

    let centres = mesh.cell_centres();
    for other in (0..n_ranks).filter(|&s| s != rank) {
        let start = face_addressing.len();
        let mut neighbour_centres = Vec::new();
        for f in 0..mesh.n_internal_faces() {
            let (o, n) = (g_owner[f], g_neighbour[f]);
            if cell_ranks[o] == rank && cell_ranks[n] == other {
                face_addressing.push(f);
                flipped.push(false);
                owner.push(local_cell[o]);
                neighbour_centres.push(centres[n]);
            } else if cell_ranks[n] == rank && cell_ranks[o] == other {
                face_addressing.push(f);
                flipped.push(true);
                owner.push(local_cell[n]);
                neighbour_centres.push(centres[o]);
            }
        }
        let size = face_addressing.len() - start;
        if size > 0 {
            patches.push(PatchSpec::new(
                format!("procBoundary{}to{}", rank, other),
                PatchKind::Processor {
                    neighbour_rank: other,
                    neighbour_centres,
                },
                start,
                size,
            ));
            patch_addressing.push(None);
        }
    }

    // Points in global order
    let mut local_point = vec![usize::MAX; mesh.n_points()];
    let mut points = Vec::new();
    let mut used = vec![false; mesh.n_points()];
    for &f in &face_addressing {
        for &p in &mesh.faces()[f] {
            used[p] = true;
        }
    }
    for (p, _) in used.iter().enumerate().filter(|(_, u)| **u) {
        local_point[p] = points.len();
        points.push(mesh.points()[p]);
    }
    let faces = face_addressing
        .iter()
        .zip(&flipped)
        .map(|(&f, &flip)| {
            let mut face: Vec<usize> = mesh.faces()[f].iter().map(|&p| local_point[p]).collect();
            if flip {
                face.reverse();
            }
            face
        })
        .collect();

    if cell_addressing.is_empty() {
        return Err(Error::Mesh(format!("subdomain {} has no cells", rank)));
    }

    Ok(Subdomain {
        parts: MeshParts {
            points,
            faces,
            owner,
            neighbour,
            patches,
        },
        cell_addressing,
        face_addressing,
        flipped,
        patch_addressing,
    })
}

impl DecomposedCase {
    pub fn n_ranks(&self) -> usize {
        self.subdomains.len()
    }

    pub fn subdomain(&self, rank: usize) -> Result<&Subdomain> {
        self.subdomains.get(rank).ok_or_else(|| {
            Error::Communication(format!(
                "no subdomain {} in a case of {} subdomains",
                rank,
                self.subdomains.len()
            ))
        })
    }

    /// Build the mesh of subdomain `rank`, communicating through `comm`.
    pub fn mesh(&self, rank: usize, comm: Arc<dyn Communicator>) -> Result<FvMesh> {
        if comm.rank() != rank || comm.n_ranks() != self.n_ranks() {
            return Err(Error::Communication(format!(
                "communicator of rank {} of {} cannot drive subdomain {} of {}",
                comm.rank(),
                comm.n_ranks(),
                rank,
                self.n_ranks()
            )));
        }
        FvMesh::with_comm(self.subdomain(rank)?.parts.clone(), comm)
    }

    /// Local part of a global cell field on the subdomain mesh `local`.
    ///
    /// Processor patch values start as the adjacent cell values; they are filled from the
    /// neighbouring ranks by `correct_boundary_conditions`.
    pub fn distribute(&self, local: &FvMesh, vf: &VolScalarField) -> Result<VolScalarField> {
        let sub = self.subdomain(local.comm().rank())?;
        if vf.internal().len() != self.n_cells {
            return Err(Error::Field(format!(
                "field {} has {} cells, the decomposed mesh {}",
                vf.name(),
                vf.internal().len(),
                self.n_cells
            )));
        }
        let internal = sub.cell_addressing.iter().map(|&c| vf.internal()[c]).collect();
        let mut field = VolScalarField::from_values(vf.name(), local, internal)?;
        for (patch, global) in sub.patch_addressing.iter().enumerate() {
            if let Some(global) = *global {
                let positions = sub.patch_positions(patch, self.patch_starts[global]);
                field.set_patch_field(patch, vf.boundary_field(global).subset(&positions)?)?;
            }
        }
        Ok(field)
    }

    /// Local part of a global face field; values on flipped faces change sign.
    pub fn distribute_surface(&self, local: &FvMesh, ssf: &SurfaceScalarField) -> Result<SurfaceScalarField> {
        let sub = self.subdomain(local.comm().rank())?;
        if ssf.internal().len() != self.n_internal_faces || ssf.n_patches() != self.patch_starts.len() {
            return Err(Error::Field(format!(
                "face field {} does not match the decomposed mesh",
                ssf.name()
            )));
        }
        let internal = (0..local.n_internal_faces())
            .map(|f| ssf.internal()[sub.face_addressing[f]])
            .collect();
        let boundary = local
            .patches()
            .iter()
            .zip(&sub.patch_addressing)
            .map(|(patch, global)| {
                patch
                    .range()
                    .map(|f| {
                        let g = sub.face_addressing[f];
                        match *global {
                            Some(gp) => ssf.boundary(gp)[g - self.patch_starts[gp]],
                            None if sub.flipped[f] => -ssf.internal()[g],
                            None => ssf.internal()[g],
                        }
                    })
                    .collect()
            })
            .collect();
        Ok(SurfaceScalarField::new(ssf.name(), internal, boundary))
    }

    /// Global field assembled from one field per subdomain, in rank order.
    pub fn reconstruct(&self, mesh: &FvMesh, fields: &[VolScalarField]) -> Result<VolScalarField> {
        if fields.len() != self.n_ranks() || mesh.n_cells() != self.n_cells {
            return Err(Error::Field(format!(
                "cannot reconstruct {} subdomain fields onto a mesh of {} cells ({} subdomains of {} cells)",
                fields.len(),
                mesh.n_cells(),
                self.n_ranks(),
                self.n_cells
            )));
        }
        let mut internal = vec![0.0; self.n_cells];
        for (sub, field) in self.subdomains.iter().zip(fields) {
            if field.internal().len() != sub.cell_addressing.len() {
                return Err(Error::Field(format!(
                    "subdomain field {} has {} cells, expected {}",
                    field.name(),
                    field.internal().len(),
                    sub.cell_addressing.len()
                )));
            }
            for (&c, &v) in sub.cell_addressing.iter().zip(field.internal()) {
                internal[c] = v;
            }
        }

        let mut result = VolScalarField::from_values(fields[0].name(), mesh, internal)?;
        for global in 0..self.patch_starts.len() {
            let mut located = Vec::new();
            for (sub, field) in self.subdomains.iter().zip(fields) {
                for (patch, g) in sub.patch_addressing.iter().enumerate() {
                    if *g == Some(global) {
                        let positions = sub.patch_positions(patch, self.patch_starts[global]);
                        located.push((field.boundary_field(patch), positions));
                    }
                }
            }
            let pieces: Vec<(&PatchField, &[usize])> = located
                .iter()
                .map(|(pf, positions)| (*pf, positions.as_slice()))
                .collect();
            result.set_patch_field(global, PatchField::assemble(&pieces, self.patch_sizes[global])?)?;
        }
        Ok(result)
    }
}

/// Run `f(rank, comm)` on one scoped thread per rank and collect the results in rank order.
pub fn run_parallel<T, F>(n_ranks: usize, f: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(usize, Arc<dyn Communicator>) -> Result<T> + Sync,
{
    let comms = ThreadComm::universe(n_ranks);
    std::thread::scope(|scope| {
        let f = &f;
        let handles: Vec<_> = comms
            .into_iter()
            .enumerate()
            .map(|(rank, comm)| scope.spawn(move || f(rank, Arc::new(comm))))
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(rank, handle)| {
                handle
                    .join()
                    .map_err(|_| Error::Communication(format!("rank {} panicked", rank)))
                    .and_then(|result| result)
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_mesh::{BlockMesh, Side};
    use crate::boundary::PatchFieldConfig;
    use crate::fvm;
    use crate::schemes::FvSchemes;
    use crate::solver::SolverControls;
    use approx::assert_relative_eq;

    fn channel() -> FvMesh {
        BlockMesh::new([8, 2, 1], [2.0, 1.0, 1.0])
            .two_dimensional()
            .side(Side::Left, "inlet", PatchKind::Patch)
            .side(Side::Right, "outlet", PatchKind::Patch)
            .build()
            .unwrap()
    }

    fn temperature(mesh: &FvMesh) -> VolScalarField {
        VolScalarField::uniform("T", mesh, 0.0)
            .with_patch(mesh, "inlet", &PatchFieldConfig::FixedValue { value: 1.0 })
            .unwrap()
            .with_patch(mesh, "outlet", &PatchFieldConfig::FixedValue { value: 0.0 })
            .unwrap()
    }

    fn flux(mesh: &FvMesh) -> SurfaceScalarField {
        // u = (1, 0): flux = x component of the face area
        let internal = mesh.face_areas()[..mesh.n_internal_faces()]
            .iter()
            .map(|s| s.x)
            .collect();
        let boundary = (0..mesh.patches().len())
            .map(|p| mesh.patch_face_areas(p).iter().map(|s| s.x).collect())
            .collect();
        SurfaceScalarField::new("phi", internal, boundary)
    }

    fn simple_x() -> DecompositionMethod {
        DecompositionMethod::Simple { axis: Axis::X }
    }

    #[test]
    fn test_simple_decomposition_addressing() {
        let mesh = channel();
        let case = decompose(&mesh, 2, &simple_x()).unwrap();
        assert_eq!(case.n_ranks(), 2);
        for rank in 0..2 {
            let sub = case.subdomain(rank).unwrap();
            assert_eq!(sub.cell_addressing().len(), 8);
            let proc_patch = sub.parts().patches.last().unwrap();
            assert_eq!(proc_patch.name, format!("procBoundary{}to{}", rank, 1 - rank));
            assert_eq!(proc_patch.size, 2);
            // Original patches are kept, in order, before the processor patch
            assert_eq!(sub.patch_addressing().len(), mesh.patches().len() + 1);
        }
        let left = case.subdomain(0).unwrap();
        assert!(left.cell_addressing().iter().all(|&c| mesh.cell_centres()[c].x < 1.0));
        // Only the higher rank stores the shared faces flipped
        assert!(left.flipped().iter().all(|f| !f));
        assert_eq!(case.subdomain(1).unwrap().flipped().iter().filter(|f| **f).count(), 2);

        assert!(decompose(&mesh, 0, &simple_x()).is_err());
        assert!(decompose(&mesh, 17, &simple_x()).is_err());
    }

    #[test]
    fn test_cyclic_split_rejected() {
        let mesh = BlockMesh::new([4, 2, 1], [1.0, 1.0, 1.0]).cyclic(Axis::X).build().unwrap();
        assert!(decompose(&mesh, 2, &simple_x()).is_err());
        assert!(decompose(&mesh, 2, &DecompositionMethod::Simple { axis: Axis::Y }).is_ok());
    }

    #[test]
    fn test_distribute_surface_flips_sign_and_reconstruct_round_trips() {
        let mesh = channel();
        let case = decompose(&mesh, 2, &simple_x()).unwrap();
        let phi = flux(&mesh);
        let t = temperature(&mesh);
        let comms = ThreadComm::universe(2);

        let mut pieces = Vec::new();
        for (rank, comm) in comms.into_iter().enumerate() {
            let local = case.mesh(rank, Arc::new(comm)).unwrap();
            let local_phi = case.distribute_surface(&local, &phi).unwrap();
            let proc = local.patches().len() - 1;
            let expected = if rank == 0 { 0.5 } else { -0.5 };
            assert!(local_phi.boundary(proc).iter().all(|&v| v == expected));
            // The flipped faces point back towards rank 0
            assert!(local.patch(proc).unwrap().nf().iter().all(|n| n.x * expected > 0.0));
            pieces.push(case.distribute(&local, &t).unwrap());
        }

        let back = case.reconstruct(&mesh, &pieces).unwrap();
        assert_eq!(back.internal(), t.internal());
        for p in 0..mesh.patches().len() {
            assert_eq!(back.boundary_field(p), t.boundary_field(p));
        }
    }

    #[test]
    fn test_parallel_solve_matches_serial() {
        let mesh = channel();
        let schemes = FvSchemes::new().with_div("div(phi,T)", "Gauss upwind");
        let dt = SurfaceScalarField::uniform("DT", &mesh, 0.1);
        let controls = SolverControls::new("PBiCGStab")
            .with_preconditioner("DILU")
            .with_tolerance(1e-12)
            .with_max_iter(500);
        let phi = flux(&mesh);

        let mut serial = temperature(&mesh);
        let mut eqn = fvm::div(&mesh, &schemes, &phi, &serial)
            .unwrap()
            .try_sub(fvm::laplacian(&mesh, &schemes, &dt, &serial).unwrap())
            .unwrap();
        eqn.solve(&mut serial, &controls).unwrap();

        let case = decompose(&mesh, 2, &simple_x()).unwrap();
        let global_t = temperature(&mesh);
        let fields = run_parallel(2, |rank, comm| {
            let local = case.mesh(rank, comm)?;
            let mut t = case.distribute(&local, &global_t)?;
            t.correct_boundary_conditions(&local)?;
            let phi = case.distribute_surface(&local, &phi)?;
            let dt = SurfaceScalarField::uniform("DT", &local, 0.1);
            let mut eqn = fvm::div(&local, &schemes, &phi, &t)?
                .try_sub(fvm::laplacian(&local, &schemes, &dt, &t)?)?;
            eqn.solve(&mut t, &controls)?;
            Ok(t)
        })
        .unwrap();

        let parallel = case.reconstruct(&mesh, &fields).unwrap();
        for (p, s) in parallel.internal().iter().zip(serial.internal()) {
            assert_relative_eq!(*p, *s, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_run_parallel_reduces_across_ranks() {
        let sums = run_parallel(3, |rank, comm| comm.sum(rank as f64)).unwrap();
        assert_eq!(sums, vec![3.0, 3.0, 3.0]);

        let failed = run_parallel(2, |rank, _comm| {
            if rank == 1 {
                Err(Error::Config("bad rank".into()))
            } else {
                Ok(rank)
            }
        });
        assert!(failed.is_err());
    }
}
