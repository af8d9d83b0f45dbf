//! Preconditioned conjugate gradient.

use super::{norm_factor, new_preconditioner, LduSolver, LinearSystem, Preconditioner, SolverControls, SolverPerformance};
use crate::error::{Error, Result};
use crate::ldu::LduMatrix;

/// Conjugate gradient for symmetric matrices.
///
/// Reported under the preconditioner-qualified name, e.g. `DICPCG`.
pub struct Pcg {
    controls: SolverControls,
    preconditioner: Box<dyn Preconditioner>,
    name: String,
}

impl Pcg {
    pub fn new(controls: SolverControls, matrix: &LduMatrix) -> Result<Self> {
        if matrix.asymmetric() {
            return Err(Error::Solver(
                "PCG requires a symmetric matrix, use PBiCGStab".into(),
            ));
        }
        let preconditioner = new_preconditioner(&controls.preconditioner, matrix)?;
        let name = format!("{}PCG", preconditioner.name());
        Ok(Self {
            controls,
            preconditioner,
            name,
        })
    }
}

impl LduSolver for Pcg {
    fn solve(&self, system: &LinearSystem<'_>, psi: &mut [f64], source: &[f64]) -> Result<SolverPerformance> {
        let n = psi.len();
        let c = &self.controls;
        let mut perf = SolverPerformance::new(self.name(), system.field_name);

        let mut w_a = vec![0.0; n];
        system.amul(psi, &mut w_a)?;
        let mut r_a: Vec<f64> = source.iter().zip(&w_a).map(|(b, w)| b - w).collect();

        let nf = norm_factor(system, psi, source, &w_a)?;
        perf.initial_residual = system.normalised_residual(&r_a, nf)?;
        perf.final_residual = perf.initial_residual;

        if c.min_iter > 0 || !perf.check_convergence(c.tolerance, c.rel_tol) {
            let mut p_a = vec![0.0; n];
            let mut w_a_r_a: f64 = 0.0;

            loop {
                let w_a_r_a_old = w_a_r_a;
                self.preconditioner.precondition(&mut w_a, &r_a);
                w_a_r_a = system.g_sum_prod(&w_a, &r_a)?;

                if perf.n_iterations == 0 {
                    p_a.copy_from_slice(&w_a);
                } else {
                    let beta = w_a_r_a / w_a_r_a_old;
                    for (p, w) in p_a.iter_mut().zip(&w_a) {
                        *p = w + beta * *p;
                    }
                }

                system.amul(&p_a, &mut w_a)?;
                let w_a_p_a = system.g_sum_prod(&w_a, &p_a)?;
                if perf.check_singularity(w_a_p_a.abs() / nf) {
                    break;
                }

                let alpha = w_a_r_a / w_a_p_a;
                for ((x, p), (r, w)) in psi.iter_mut().zip(&p_a).zip(r_a.iter_mut().zip(&w_a)) {
                    *x += alpha * p;
                    *r -= alpha * w;
                }
                perf.final_residual = system.normalised_residual(&r_a, nf)?;
                perf.n_iterations += 1;

                let converged = perf.check_convergence(c.tolerance, c.rel_tol);
                if !((perf.n_iterations < c.max_iter && !converged) || perf.n_iterations < c.min_iter) {
                    break;
                }
            }
        }

        Ok(perf)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
