//! Iterative solver built from repeated smoothing sweeps.

use super::{new_smoother, norm_factor, LduSolver, LinearSystem, Smoother, SolverControls, SolverPerformance};
use crate::error::Result;
use crate::ldu::LduMatrix;

/// Applies `n_sweeps` of the configured smoother between residual checks.
pub struct SmoothSolver {
    controls: SolverControls,
    smoother: Box<dyn Smoother>,
}

impl SmoothSolver {
    pub fn new(controls: SolverControls, matrix: &LduMatrix) -> Result<Self> {
        let smoother = new_smoother(&controls.smoother, matrix)?;
        Ok(Self { controls, smoother })
    }
}

impl LduSolver for SmoothSolver {
    fn solve(&self, system: &LinearSystem<'_>, psi: &mut [f64], source: &[f64]) -> Result<SolverPerformance> {
        let c = &self.controls;
        let mut perf = SolverPerformance::new(self.name(), system.field_name);

        let mut a_psi = vec![0.0; psi.len()];
        system.amul(psi, &mut a_psi)?;
        let nf = norm_factor(system, psi, source, &a_psi)?;
        let r_a: Vec<f64> = source.iter().zip(&a_psi).map(|(b, a)| b - a).collect();
        perf.initial_residual = system.normalised_residual(&r_a, nf)?;
        perf.final_residual = perf.initial_residual;

        if c.min_iter > 0 || !perf.check_convergence(c.tolerance, c.rel_tol) {
            loop {
                self.smoother.smooth(system, psi, source, c.n_sweeps)?;
                let r_a = system.residual(psi, source)?;
                perf.final_residual = system.normalised_residual(&r_a, nf)?;
                perf.n_iterations += c.n_sweeps;

                let converged = perf.check_convergence(c.tolerance, c.rel_tol);
                if !((perf.n_iterations < c.max_iter && !converged) || perf.n_iterations < c.min_iter) {
                    break;
                }
            }
        }

        Ok(perf)
    }

    fn name(&self) -> &str {
        "smoothSolver"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_mesh::BlockMesh;
    use crate::ldu::LduInterfaces;
    use crate::parallel::SerialComm;
    use std::sync::Arc;

    #[test]
    fn test_sweeps_count_as_iterations() {
        let mesh = BlockMesh::new([10, 1, 1], [1.0, 1.0, 1.0]).build().unwrap();
        let mut m = LduMatrix::new(Arc::clone(mesh.ldu_addressing()));
        m.upper_mut().fill(-1.0);
        m.neg_sum_diag();
        m.diag_mut().iter_mut().for_each(|d| *d += 0.1);
        let interfaces = LduInterfaces::default();
        let comm = SerialComm::new();
        let system = LinearSystem::new("T", &m, &[], &[], &interfaces, &comm);

        let controls = SolverControls::new("smoothSolver")
            .with_smoother("GaussSeidel")
            .with_n_sweeps(3)
            .with_tolerance(1e-30)
            .with_max_iter(10);
        let solver = SmoothSolver::new(controls, &m).unwrap();
        let mut psi = vec![0.0; 10];
        let perf = solver.solve(&system, &mut psi, &[1.0; 10]).unwrap();
        // 3 + 3 + 3 < 10, one more pass overshoots
        assert_eq!(perf.n_iterations, 12);
        assert!(!perf.converged);
        assert!(perf.final_residual < perf.initial_residual);
    }
}
