//! Linear solvers for face-addressed matrices.
//!
//! Every solver works on a [`LinearSystem`]: the [`LduMatrix`] plus the coefficients and
//! interfaces of its coupled boundaries. Residuals are normalised by [`norm_factor`] so the
//! tolerance means the same thing regardless of the scale of the equation.
//!
//! # Solver Backends
//!
//! - [`Pcg`]: preconditioned conjugate gradient, symmetric matrices only.
//! - [`PBiCgStab`]: preconditioned stabilised bi-conjugate gradient.
//! - [`SmoothSolver`]: repeated sweeps of a [`Smoother`].
//! - [`DiagonalSolver`]: exact solve of a diagonal-only matrix.
//! - [`DirectSolver`]: sparse Cholesky (faer) or dense LU (nalgebra) of the assembled system.

mod controls;
mod direct;
mod pbicgstab;
mod pcg;
mod performance;
pub mod preconditioner;
pub mod smoother;
mod smooth_solver;

pub use controls::SolverControls;
pub use direct::DirectSolver;
pub use pbicgstab::PBiCgStab;
pub use pcg::Pcg;
pub use performance::SolverPerformance;
pub use preconditioner::{new_preconditioner, Preconditioner};
pub use smooth_solver::SmoothSolver;
pub use smoother::{new_smoother, Smoother};

use crate::error::{Error, Result};
use crate::ldu::{LduInterfaces, LduMatrix};
use crate::parallel::Communicator;
use crate::types::{sum_mag, sum_prod};
use rayon::prelude::*;

/// Solvers available for symmetric matrices.
pub const SYMMETRIC_SOLVERS: [&str; 5] = ["PCG", "PBiCGStab", "smoothSolver", "diagonal", "direct"];

/// Solvers available for asymmetric matrices.
pub const ASYMMETRIC_SOLVERS: [&str; 4] = ["PBiCGStab", "smoothSolver", "diagonal", "direct"];

/// Keeps the normalisation factor away from zero.
const NORM_FACTOR_FLOOR: f64 = 1e-20;

/// A matrix with its coupled boundaries, ready to be solved.
#[derive(Clone, Copy)]
pub struct LinearSystem<'a> {
    pub field_name: &'a str,
    pub matrix: &'a LduMatrix,
    pub interface_bou_coeffs: &'a [Vec<f64>],
    pub interface_int_coeffs: &'a [Vec<f64>],
    pub interfaces: &'a LduInterfaces,
    pub comm: &'a dyn Communicator,
}

impl<'a> LinearSystem<'a> {
    pub fn new(
        field_name: &'a str,
        matrix: &'a LduMatrix,
        interface_bou_coeffs: &'a [Vec<f64>],
        interface_int_coeffs: &'a [Vec<f64>],
        interfaces: &'a LduInterfaces,
        comm: &'a dyn Communicator,
    ) -> Self {
        Self {
            field_name,
            matrix,
            interface_bou_coeffs,
            interface_int_coeffs,
            interfaces,
            comm,
        }
    }

    pub fn amul(&self, psi: &[f64], result: &mut [f64]) -> Result<()> {
        self.matrix
            .amul_into(psi, result, self.interface_bou_coeffs, self.interfaces)
    }

    pub fn tmul(&self, psi: &[f64]) -> Result<Vec<f64>> {
        self.matrix
            .tmul(psi, self.interface_int_coeffs, self.interfaces)
    }

    pub fn residual(&self, psi: &[f64], source: &[f64]) -> Result<Vec<f64>> {
        self.matrix
            .residual(psi, source, self.interface_bou_coeffs, self.interfaces)
    }

    /// Sum of magnitudes over all ranks.
    pub fn g_sum_mag(&self, v: &[f64]) -> Result<f64> {
        self.comm.sum(sum_mag(v))
    }

    /// Dot product over all ranks.
    pub fn g_sum_prod(&self, a: &[f64], b: &[f64]) -> Result<f64> {
        self.comm.sum(sum_prod(a, b))
    }

    /// Normalised residual `gSumMag(source - A psi) / normFactor`.
    pub fn normalised_residual(&self, r_a: &[f64], norm_factor: f64) -> Result<f64> {
        Ok(self.g_sum_mag(r_a)? / norm_factor)
    }
}

/// Residual normalisation factor.
///
/// `sum(|A psi - sumA * avg(psi)| + |source - sumA * avg(psi)|) + 1e-20`, summed over all
/// ranks, where `avg` is the global average of `psi`. It is invariant to scaling of the
/// equation and to a constant shift of `psi`.
pub fn norm_factor(system: &LinearSystem<'_>, psi: &[f64], source: &[f64], a_psi: &[f64]) -> Result<f64> {
    let comm = system.comm;
    let count = comm.sum(psi.len() as f64)?;
    let psi_avg = if count > 0.0 {
        comm.sum(psi.iter().sum())? / count
    } else {
        0.0
    };
    let sum_a = system
        .matrix
        .sum_a(system.interface_bou_coeffs, system.interfaces);

    let local: f64 = sum_a
        .iter()
        .zip(a_psi.iter().zip(source))
        .map(|(sa, (ap, b))| {
            let shift = sa * psi_avg;
            (ap - shift).abs() + (b - shift).abs()
        })
        .sum();
    Ok(comm.sum(local)? + NORM_FACTOR_FLOOR)
}

/// Linear solver interface.
pub trait LduSolver: Send + Sync {
    /// Solve `A psi = source` in place, starting from the current `psi`.
    fn solve(&self, system: &LinearSystem<'_>, psi: &mut [f64], source: &[f64]) -> Result<SolverPerformance>;

    /// Solver name for diagnostics.
    fn name(&self) -> &str;
}

/// Exact solve of a matrix with no off-diagonal coefficients.
pub struct DiagonalSolver;

impl LduSolver for DiagonalSolver {
    fn solve(&self, system: &LinearSystem<'_>, psi: &mut [f64], source: &[f64]) -> Result<SolverPerformance> {
        let diag = system.matrix.diag();
        if let Some(c) = diag.iter().position(|d| *d == 0.0) {
            return Err(Error::SingularMatrix(format!(
                "zero diagonal at cell {} solving for {}",
                c, system.field_name
            )));
        }
        psi.par_iter_mut()
            .zip(source.par_iter().zip(diag.par_iter()))
            .for_each(|(p, (s, d))| *p = s / d);

        let mut perf = SolverPerformance::new(self.name(), system.field_name);
        perf.converged = true;
        Ok(perf)
    }

    fn name(&self) -> &str {
        "diagonal"
    }
}

/// Select a solver for `matrix` from its controls.
///
/// A diagonal-only matrix always gets the [`DiagonalSolver`]. Unknown names, and names only
/// valid for the other symmetry, are rejected with the list of valid choices.
pub fn new_solver(controls: &SolverControls, matrix: &LduMatrix) -> Result<Box<dyn LduSolver>> {
    controls.validate()?;
    if matrix.diagonal() {
        return Ok(Box::new(DiagonalSolver));
    }

    let valid: &[&str] = if matrix.asymmetric() {
        &ASYMMETRIC_SOLVERS
    } else {
        &SYMMETRIC_SOLVERS
    };
    if !valid.contains(&controls.solver.as_str()) {
        return Err(Error::Solver(format!(
            "unknown {} matrix solver {}, valid solvers are: {}",
            if matrix.asymmetric() { "asymmetric" } else { "symmetric" },
            controls.solver,
            valid.join(", ")
        )));
    }

    Ok(match controls.solver.as_str() {
        "PCG" => Box::new(Pcg::new(controls.clone(), matrix)?),
        "PBiCGStab" => Box::new(PBiCgStab::new(controls.clone(), matrix)?),
        "smoothSolver" => Box::new(SmoothSolver::new(controls.clone(), matrix)?),
        "diagonal" => Box::new(DiagonalSolver),
        _ => Box::new(DirectSolver::new(matrix)),
    })
}

/// Report a finished solve: an info line on success, a warning (or an error when
/// `fail_on_non_convergence` is set) when the tolerance was not met.
pub fn check_performance(controls: &SolverControls, perf: &SolverPerformance) -> Result<()> {
    if perf.converged {
        log::info!("{}", perf);
        return Ok(());
    }
    if controls.fail_on_non_convergence {
        return Err(Error::NonConvergence {
            field: perf.field_name.clone(),
            solver: perf.solver_name.clone(),
            iterations: perf.n_iterations,
            initial_residual: perf.initial_residual,
            final_residual: perf.final_residual,
        });
    }
    log::warn!("{} (not converged)", perf);
    Ok(())
}
