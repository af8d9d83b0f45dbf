//! Finite-volume matrix: the discretised equation of one scalar field.
//!
//! An [`FvMatrix`] represents `A psi = source` where `A` is an [`LduMatrix`] over the mesh
//! addressing. Boundary conditions enter through two per-patch coefficient sets:
//!
//! - `internal_coeffs`: added to the diagonal of the cells next to the patch,
//! - `boundary_coeffs`: added to the source on non-coupled patches; on coupled patches they
//!   multiply the neighbour-cell value and are applied through the matrix interfaces.
//!
//! Matrices are assembled by the operators in [`fvm`](crate::fvm), combined with
//! [`try_add`](FvMatrix::try_add) / [`try_sub`](FvMatrix::try_sub), then relaxed and solved:
//!
//! ```ignore
//! let mut eqn = fvm::ddt(&mesh, &time, &schemes, &t)?
//!     .try_add(fvm::div(&mesh, &schemes, &phi, &t)?)?
//!     .try_sub(fvm::laplacian(&mesh, &schemes, &dt, &t)?)?;
//! eqn.relax_from(&t, &solution, final_iter)?;
//! eqn.solve_with(&mut t, &solution, final_iter, &mut residuals)?;
//! ```

use crate::config::FvSolution;
use crate::control::Residuals;
use crate::error::{Error, Result};
use crate::field::{SurfaceScalarField, VolScalarField};
use crate::ldu::{LduInterfaces, LduMatrix};
use crate::mesh::FvMesh;
use crate::solver::{check_performance, new_solver, LinearSystem, SolverControls, SolverPerformance};
use std::ops::Neg;
use std::sync::Arc;

/// Discretised equation of one scalar field.
#[derive(Debug, Clone)]
pub struct FvMatrix<'a> {
    mesh: &'a FvMesh,
    field_name: String,
    ldu: LduMatrix,
    source: Vec<f64>,
    internal_coeffs: Vec<Vec<f64>>,
    boundary_coeffs: Vec<Vec<f64>>,
    face_flux_correction: Option<SurfaceScalarField>,
}

impl<'a> FvMatrix<'a> {
    /// Empty equation for `psi`.
    pub fn new(mesh: &'a FvMesh, psi: &VolScalarField) -> Self {
        Self::for_field(mesh, psi.name())
    }

    /// Empty equation for the field called `field_name`.
    pub fn for_field(mesh: &'a FvMesh, field_name: impl Into<String>) -> Self {
        let patch_zeros: Vec<Vec<f64>> = mesh.patches().iter().map(|p| vec![0.0; p.size()]).collect();
        Self {
            mesh,
            field_name: field_name.into(),
            ldu: LduMatrix::new(Arc::clone(mesh.ldu_addressing())),
            source: vec![0.0; mesh.n_cells()],
            internal_coeffs: patch_zeros.clone(),
            boundary_coeffs: patch_zeros,
            face_flux_correction: None,
        }
    }

    pub fn mesh(&self) -> &'a FvMesh {
        self.mesh
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn ldu(&self) -> &LduMatrix {
        &self.ldu
    }

    pub fn ldu_mut(&mut self) -> &mut LduMatrix {
        &mut self.ldu
    }

    pub fn source(&self) -> &[f64] {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut [f64] {
        &mut self.source
    }

    pub fn internal_coeffs(&self) -> &[Vec<f64>] {
        &self.internal_coeffs
    }

    pub fn internal_coeffs_mut(&mut self) -> &mut [Vec<f64>] {
        &mut self.internal_coeffs
    }

    pub fn boundary_coeffs(&self) -> &[Vec<f64>] {
        &self.boundary_coeffs
    }

    pub fn boundary_coeffs_mut(&mut self) -> &mut [Vec<f64>] {
        &mut self.boundary_coeffs
    }

    /// Explicit face-flux part of the equation (non-orthogonal correction).
    pub fn face_flux_correction(&self) -> Option<&SurfaceScalarField> {
        self.face_flux_correction.as_ref()
    }

    pub fn set_face_flux_correction(&mut self, correction: Option<SurfaceScalarField>) {
        self.face_flux_correction = correction;
    }

    fn check_field(&self, psi: &VolScalarField) -> Result<()> {
        if psi.name() != self.field_name {
            return Err(Error::Matrix(format!(
                "matrix for {} applied to field {}",
                self.field_name,
                psi.name()
            )));
        }
        if psi.internal().len() != self.mesh.n_cells() {
            return Err(Error::Matrix(format!(
                "field {} has {} cells, matrix has {}",
                psi.name(),
                psi.internal().len(),
                self.mesh.n_cells()
            )));
        }
        Ok(())
    }

    fn check_compatible(&self, other: &FvMatrix<'_>, op: &str) -> Result<()> {
        if self.field_name != other.field_name {
            return Err(Error::Matrix(format!(
                "incompatible fields for operation {}: {} {} {}",
                op, self.field_name, op, other.field_name
            )));
        }
        if !std::ptr::eq(self.mesh, other.mesh) {
            return Err(Error::Matrix(format!(
                "matrices for {} are defined on different meshes",
                self.field_name
            )));
        }
        Ok(())
    }

    fn combine(mut self, other: FvMatrix<'_>, sign: f64, op: &str) -> Result<Self> {
        self.check_compatible(&other, op)?;
        if sign > 0.0 {
            self.ldu.add(&other.ldu)?;
        } else {
            self.ldu.sub(&other.ldu)?;
        }
        axpy(&mut self.source, sign, &other.source);
        for (a, b) in self.internal_coeffs.iter_mut().zip(&other.internal_coeffs) {
            axpy(a, sign, b);
        }
        for (a, b) in self.boundary_coeffs.iter_mut().zip(&other.boundary_coeffs) {
            axpy(a, sign, b);
        }
        self.face_flux_correction = match (self.face_flux_correction.take(), other.face_flux_correction) {
            (Some(mut a), Some(b)) => {
                axpy_surface(&mut a, sign, &b);
                Some(a)
            }
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b.scale(sign)),
            (None, None) => None,
        };
        Ok(self)
    }

    /// `self + other`; both must be equations of the same field.
    pub fn try_add(self, other: FvMatrix<'_>) -> Result<Self> {
        self.combine(other, 1.0, "+")
    }

    /// `self - other`; both must be equations of the same field.
    pub fn try_sub(self, other: FvMatrix<'_>) -> Result<Self> {
        self.combine(other, -1.0, "-")
    }

    /// Multiply the whole equation by a constant.
    pub fn scale(mut self, factor: f64) -> Self {
        self.ldu.scale(factor);
        self.source.iter_mut().for_each(|s| *s *= factor);
        for coeffs in self.internal_coeffs.iter_mut().chain(self.boundary_coeffs.iter_mut()) {
            coeffs.iter_mut().for_each(|c| *c *= factor);
        }
        self.face_flux_correction = self.face_flux_correction.map(|f| f.scale(factor));
        self
    }

    /// `M + su`: an explicit cell source on the left-hand side.
    pub fn add_source(mut self, su: &[f64]) -> Result<Self> {
        self.check_source(su)?;
        for ((s, v), vol) in self.source.iter_mut().zip(su).zip(self.mesh.cell_volumes()) {
            *s -= vol * v;
        }
        Ok(self)
    }

    /// `M == su`: an explicit cell source on the right-hand side.
    pub fn equate(mut self, su: &[f64]) -> Result<Self> {
        self.check_source(su)?;
        for ((s, v), vol) in self.source.iter_mut().zip(su).zip(self.mesh.cell_volumes()) {
            *s += vol * v;
        }
        Ok(self)
    }

    fn check_source(&self, su: &[f64]) -> Result<()> {
        if su.len() != self.source.len() {
            return Err(Error::Matrix(format!(
                "source for {} has {} values, expected {}",
                self.field_name,
                su.len(),
                self.source.len()
            )));
        }
        Ok(())
    }

    /// Add the internal coefficients of every patch to `diag`.
    fn add_boundary_diag(&self, diag: &mut [f64]) {
        for (patch, coeffs) in self.mesh.patches().iter().zip(&self.internal_coeffs) {
            for (&c, ic) in patch.face_cells().iter().zip(coeffs) {
                diag[c] += ic;
            }
        }
    }

    /// Add the boundary coefficients to `source`. Coupled patches contribute
    /// `boundary_coeffs * psi_neighbour` when `neighbours` is given.
    fn add_boundary_source(&self, source: &mut [f64], neighbours: Option<&[Option<Vec<f64>>]>) {
        for (index, (patch, coeffs)) in self.mesh.patches().iter().zip(&self.boundary_coeffs).enumerate() {
            if patch.coupled() {
                if let Some(Some(nbr)) = neighbours.map(|n| &n[index]) {
                    for ((&c, bc), pn) in patch.face_cells().iter().zip(coeffs).zip(nbr) {
                        source[c] += bc * pn;
                    }
                }
            } else {
                for (&c, bc) in patch.face_cells().iter().zip(coeffs) {
                    source[c] += bc;
                }
            }
        }
    }

    /// Implicit under-relaxation.
    ///
    /// The diagonal is made at least as large as the sum of the off-diagonal magnitudes
    /// (boundary contributions included), divided by `alpha`, and the change is balanced by
    /// `(D - D0) psi` in the source. A non-positive `alpha` leaves the equation unchanged.
    pub fn relax(&mut self, psi: &VolScalarField, alpha: f64) -> Result<()> {
        self.check_field(psi)?;
        if alpha <= 0.0 {
            return Ok(());
        }

        let d0 = self.ldu.diag().into_owned();
        let mut sum_off = self.ldu.sum_mag_off_diag();
        let mut d = d0.clone();

        for (patch, (ic, bc)) in self
            .mesh
            .patches()
            .iter()
            .zip(self.internal_coeffs.iter().zip(&self.boundary_coeffs))
        {
            if patch.coupled() {
                for ((&c, i), b) in patch.face_cells().iter().zip(ic).zip(bc) {
                    d[c] += i;
                    sum_off[c] += b.abs();
                }
            } else {
                for (&c, i) in patch.face_cells().iter().zip(ic) {
                    d[c] += i.abs();
                }
            }
        }

        for (dc, so) in d.iter_mut().zip(&sum_off) {
            *dc = dc.abs().max(*so) / alpha;
        }

        // Remove the boundary diagonal again; solve adds it back
        for (patch, ic) in self.mesh.patches().iter().zip(&self.internal_coeffs) {
            for (&c, i) in patch.face_cells().iter().zip(ic) {
                d[c] -= i;
            }
        }

        for (c, s) in self.source.iter_mut().enumerate() {
            *s += (d[c] - d0[c]) * psi.internal()[c];
        }
        *self.ldu.diag_mut() = d;
        Ok(())
    }

    /// Relax with the equation relaxation factor configured for this field, if any.
    pub fn relax_from(&mut self, psi: &VolScalarField, solution: &FvSolution, final_iter: bool) -> Result<()> {
        match solution.equation_relaxation_factor(&self.field_name, final_iter) {
            Some(alpha) => self.relax(psi, alpha),
            None => Ok(()),
        }
    }

    /// Fix the level of a field no boundary condition pins.
    ///
    /// Applied on the master rank only; every rank must call it.
    pub fn set_reference(&mut self, psi: &VolScalarField, cell: usize, value: f64) -> Result<()> {
        self.check_field(psi)?;
        if !psi.needs_reference(self.mesh)? || !self.mesh.comm().is_master() {
            return Ok(());
        }
        if cell >= self.mesh.n_cells() {
            return Err(Error::Matrix(format!(
                "reference cell {} out of range for {} cells",
                cell,
                self.mesh.n_cells()
            )));
        }
        let diag = self.ldu.diag_mut();
        let d = diag[cell];
        self.source[cell] += d * value;
        diag[cell] += d;
        Ok(())
    }

    /// Prescribe the value of `psi` in `cells`, eliminating them from the system.
    pub fn set_values(&mut self, psi: &mut VolScalarField, cells: &[usize], values: &[f64]) -> Result<()> {
        self.check_field(psi)?;
        if cells.len() != values.len() {
            return Err(Error::Matrix(format!(
                "{} cells but {} values",
                cells.len(),
                values.len()
            )));
        }
        let mesh = self.mesh;
        let n_internal = mesh.n_internal_faces();
        let symmetric = self.ldu.symmetric();
        let asymmetric = self.ldu.asymmetric();
        let diag = self.ldu.diag().into_owned();

        for (&cell, &value) in cells.iter().zip(values) {
            if cell >= mesh.n_cells() {
                return Err(Error::Matrix(format!("cell {} out of range", cell)));
            }
            psi.internal_mut()[cell] = value;
            self.source[cell] = value * diag[cell];

            if !(symmetric || asymmetric) {
                continue;
            }
            for &face in &mesh.cells()[cell] {
                if face < n_internal {
                    let (own, nei) = (mesh.owner()[face], mesh.neighbour()[face]);
                    if symmetric {
                        let upper = self.ldu.upper_mut();
                        let other = if cell == own { nei } else { own };
                        self.source[other] -= upper[face] * value;
                        upper[face] = 0.0;
                    } else {
                        if cell == own {
                            self.source[nei] -= self.ldu.lower()[face] * value;
                        } else {
                            self.source[own] -= self.ldu.upper()[face] * value;
                        }
                        self.ldu.upper_mut()[face] = 0.0;
                        self.ldu.lower_mut()[face] = 0.0;
                    }
                } else if let Some(patch) = mesh.which_patch(face) {
                    let local = face - mesh.patches()[patch].start();
                    self.internal_coeffs[patch][local] = 0.0;
                    self.boundary_coeffs[patch][local] = 0.0;
                }
            }
        }
        Ok(())
    }

    /// Solve for `psi` with the given linear solver controls.
    ///
    /// The boundary diagonal is added for the duration of the solve only; non-coupled
    /// boundary coefficients go into the source, coupled ones through the interfaces.
    pub fn solve(&mut self, psi: &mut VolScalarField, controls: &SolverControls) -> Result<SolverPerformance> {
        self.check_field(psi)?;
        log::debug!("Solving {} with {}", self.field_name, controls.solver);

        let saved_diag = self.ldu.diag().into_owned();
        let mut diag = saved_diag.clone();
        self.add_boundary_diag(&mut diag);
        *self.ldu.diag_mut() = diag;

        let mut total_source = self.source.clone();
        self.add_boundary_source(&mut total_source, None);

        let result = self.solve_segregated(psi, controls, &total_source);
        *self.ldu.diag_mut() = saved_diag;
        let perf = result?;

        psi.correct_boundary_conditions(self.mesh)?;
        check_performance(controls, &perf)?;
        Ok(perf)
    }

    fn solve_segregated(
        &self,
        psi: &mut VolScalarField,
        controls: &SolverControls,
        total_source: &[f64],
    ) -> Result<SolverPerformance> {
        let interfaces = LduInterfaces::from_mesh(self.mesh)?;
        let comm = self.mesh.comm();
        let system = LinearSystem::new(
            &self.field_name,
            &self.ldu,
            &self.boundary_coeffs,
            &self.internal_coeffs,
            &interfaces,
            comm.as_ref(),
        );
        let solver = new_solver(controls, &self.ldu)?;
        solver.solve(&system, psi.internal_mut(), total_source)
    }

    /// Solve with the controls `solution` holds for this field and record the performance.
    pub fn solve_with(
        &mut self,
        psi: &mut VolScalarField,
        solution: &FvSolution,
        final_iter: bool,
        residuals: &mut Residuals,
    ) -> Result<SolverPerformance> {
        let controls = solution.solver_controls(&self.field_name, final_iter)?;
        let result = self.solve(psi, &controls);
        match &result {
            Ok(perf) => residuals.record(perf.clone()),
            Err(Error::NonConvergence {
                field,
                solver,
                iterations,
                initial_residual,
                final_residual,
            }) => {
                let mut perf = SolverPerformance::new(solver.clone(), field.clone());
                perf.initial_residual = *initial_residual;
                perf.final_residual = *final_residual;
                perf.n_iterations = *iterations;
                residuals.record(perf);
            }
            Err(_) => {}
        }
        result
    }

    /// Residual `source - A psi` of the current `psi`, boundary contributions included.
    pub fn residual(&self, psi: &VolScalarField) -> Result<Vec<f64>> {
        self.check_field(psi)?;
        let mut boundary_diag = vec![0.0; self.mesh.n_cells()];
        self.add_boundary_diag(&mut boundary_diag);

        let source: Vec<f64> = self
            .source
            .iter()
            .zip(boundary_diag.iter().zip(psi.internal()))
            .map(|(s, (bd, p))| s - bd * p)
            .collect();

        let interfaces = LduInterfaces::from_mesh(self.mesh)?;
        let mut r = self
            .ldu
            .residual(psi.internal(), &source, &self.boundary_coeffs, &interfaces)?;
        self.add_boundary_source(&mut r, None);
        Ok(r)
    }

    /// Central coefficients per unit volume, boundary diagonal included.
    pub fn a(&self) -> Result<VolScalarField> {
        let mut d = self.ldu.diag().into_owned();
        self.add_boundary_diag(&mut d);
        for (v, vol) in d.iter_mut().zip(self.mesh.cell_volumes()) {
            *v /= vol;
        }
        VolScalarField::calculated(format!("A({})", self.field_name), self.mesh, d)
    }

    /// `(source - offdiag psi) / V`, coupled neighbour contributions included.
    pub fn h(&self, psi: &VolScalarField) -> Result<VolScalarField> {
        self.check_field(psi)?;
        let mut h = self.ldu.h(psi.internal());
        for (v, s) in h.iter_mut().zip(&self.source) {
            *v += s;
        }
        let neighbours = psi.coupled_neighbour_values(self.mesh)?;
        self.add_boundary_source(&mut h, Some(neighbours.as_slice()));
        for (v, vol) in h.iter_mut().zip(self.mesh.cell_volumes()) {
            *v /= vol;
        }
        let mut field = VolScalarField::calculated(format!("H({})", self.field_name), self.mesh, h)?;
        field.correct_boundary_conditions(self.mesh)?;
        Ok(field)
    }

    /// `-offdiag 1 / V`, coupled interface coefficients included.
    pub fn h1(&self) -> Result<VolScalarField> {
        let mut h1 = self.ldu.h1();
        for (patch, bc) in self.mesh.patches().iter().zip(&self.boundary_coeffs) {
            if patch.coupled() {
                for (&c, b) in patch.face_cells().iter().zip(bc) {
                    h1[c] += b;
                }
            }
        }
        for (v, vol) in h1.iter_mut().zip(self.mesh.cell_volumes()) {
            *v /= vol;
        }
        VolScalarField::calculated("H(1)", self.mesh, h1)
    }

    /// Face fluxes of the implicit operator applied to `psi`.
    ///
    /// Consistent with the matrix: the flux leaving each cell sums to its residual-free
    /// balance. Includes the face-flux correction.
    pub fn flux(&self, psi: &VolScalarField) -> Result<SurfaceScalarField> {
        self.check_field(psi)?;
        let internal = self.ldu.face_h(psi.internal());
        let neighbours = psi.coupled_neighbour_values(self.mesh)?;

        let mut boundary = Vec::with_capacity(self.mesh.patches().len());
        for (index, patch) in self.mesh.patches().iter().enumerate() {
            let ic = &self.internal_coeffs[index];
            let bc = &self.boundary_coeffs[index];
            let values: Vec<f64> = match &neighbours[index] {
                Some(nbr) if patch.coupled() => patch
                    .face_cells()
                    .iter()
                    .enumerate()
                    .map(|(i, &c)| ic[i] * psi.internal()[c] - bc[i] * nbr[i])
                    .collect(),
                _ => patch
                    .face_cells()
                    .iter()
                    .enumerate()
                    .map(|(i, &c)| ic[i] * psi.internal()[c] - bc[i])
                    .collect(),
            };
            boundary.push(values);
        }

        let mut flux = SurfaceScalarField::new(format!("flux({})", self.field_name), internal, boundary);
        if let Some(correction) = &self.face_flux_correction {
            axpy_surface(&mut flux, 1.0, correction);
        }
        Ok(flux)
    }
}

impl Neg for FvMatrix<'_> {
    type Output = Self;

    fn neg(self) -> Self {
        self.scale(-1.0)
    }
}

fn axpy(a: &mut [f64], sign: f64, b: &[f64]) {
    for (x, y) in a.iter_mut().zip(b) {
        *x += sign * y;
    }
}

fn axpy_surface(a: &mut SurfaceScalarField, sign: f64, b: &SurfaceScalarField) {
    axpy(a.internal_mut(), sign, b.internal());
    for patch in 0..a.n_patches().min(b.n_patches()) {
        axpy(a.boundary_mut(patch), sign, b.boundary(patch));
    }
}
