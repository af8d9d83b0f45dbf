//! Preconditioned stabilised bi-conjugate gradient.

use super::{norm_factor, new_preconditioner, LduSolver, LinearSystem, Preconditioner, SolverControls, SolverPerformance};
use crate::error::Result;
use crate::ldu::LduMatrix;
use crate::types::VSMALL;

/// BiCGStab with right preconditioning; handles symmetric and asymmetric matrices.
pub struct PBiCgStab {
    controls: SolverControls,
    preconditioner: Box<dyn Preconditioner>,
    name: String,
}

impl PBiCgStab {
    pub fn new(controls: SolverControls, matrix: &LduMatrix) -> Result<Self> {
        let preconditioner = new_preconditioner(&controls.preconditioner, matrix)?;
        let name = format!("{}PBiCGStab", preconditioner.name());
        Ok(Self {
            controls,
            preconditioner,
            name,
        })
    }
}

impl LduSolver for PBiCgStab {
    fn solve(&self, system: &LinearSystem<'_>, psi: &mut [f64], source: &[f64]) -> Result<SolverPerformance> {
        let n = psi.len();
        let c = &self.controls;
        let mut perf = SolverPerformance::new(self.name(), system.field_name);

        let mut y_a = vec![0.0; n];
        system.amul(psi, &mut y_a)?;
        let mut r_a: Vec<f64> = source.iter().zip(&y_a).map(|(b, y)| b - y).collect();

        let nf = norm_factor(system, psi, source, &y_a)?;
        perf.initial_residual = system.normalised_residual(&r_a, nf)?;
        perf.final_residual = perf.initial_residual;

        if c.min_iter == 0 && perf.check_convergence(c.tolerance, c.rel_tol) {
            return Ok(perf);
        }

        let mut a_y_a = vec![0.0; n];
        let mut p_a = vec![0.0; n];
        let mut s_a = vec![0.0; n];
        let mut z_a = vec![0.0; n];
        let mut t_a = vec![0.0; n];

        let r_a0 = r_a.clone();
        let mut r_a0_r_a: f64 = 0.0;
        let mut alpha: f64 = 0.0;
        let mut omega: f64 = 0.0;

        loop {
            let r_a0_r_a_old = r_a0_r_a;
            r_a0_r_a = system.g_sum_prod(&r_a0, &r_a)?;
            if perf.check_singularity(r_a0_r_a.abs()) {
                break;
            }

            if perf.n_iterations == 0 {
                p_a.copy_from_slice(&r_a);
            } else {
                if perf.check_singularity(omega.abs()) {
                    break;
                }
                let beta = (r_a0_r_a / r_a0_r_a_old) * (alpha / omega);
                for ((p, r), ay) in p_a.iter_mut().zip(&r_a).zip(&a_y_a) {
                    *p = r + beta * (*p - omega * ay);
                }
            }

            self.preconditioner.precondition(&mut y_a, &p_a);
            system.amul(&y_a, &mut a_y_a)?;
            let r_a0_a_y_a = system.g_sum_prod(&r_a0, &a_y_a)?;
            alpha = r_a0_r_a / r_a0_a_y_a;

            for ((s, r), ay) in s_a.iter_mut().zip(&r_a).zip(&a_y_a) {
                *s = r - alpha * ay;
            }
            perf.final_residual = system.normalised_residual(&s_a, nf)?;

            if perf.check_convergence(c.tolerance, c.rel_tol) && perf.n_iterations + 1 >= c.min_iter {
                for (x, y) in psi.iter_mut().zip(&y_a) {
                    *x += alpha * y;
                }
                perf.n_iterations += 1;
                return Ok(perf);
            }

            self.preconditioner.precondition(&mut z_a, &s_a);
            system.amul(&z_a, &mut t_a)?;
            let t_a_t_a = system.g_sum_prod(&t_a, &t_a)?;
            omega = system.g_sum_prod(&t_a, &s_a)? / t_a_t_a.max(VSMALL);

            for i in 0..n {
                psi[i] += alpha * y_a[i] + omega * z_a[i];
                r_a[i] = s_a[i] - omega * t_a[i];
            }
            perf.final_residual = system.normalised_residual(&r_a, nf)?;
            perf.n_iterations += 1;

            let converged = perf.check_convergence(c.tolerance, c.rel_tol);
            if !((perf.n_iterations < c.max_iter && !converged) || perf.n_iterations < c.min_iter) {
                break;
            }
        }

        Ok(perf)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_mesh::BlockMesh;
    use crate::ldu::LduInterfaces;
    use crate::parallel::SerialComm;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    /// Upwind convection-diffusion operator on a line of cells.
    fn convection_diffusion(n: usize) -> LduMatrix {
        let mesh = BlockMesh::new([n, 1, 1], [1.0, 1.0, 1.0]).build().unwrap();
        let mut m = LduMatrix::new(Arc::clone(mesh.ldu_addressing()));
        m.upper_mut().fill(-1.0);
        m.lower_mut().fill(-3.0);
        m.neg_sum_diag();
        m.diag_mut().iter_mut().for_each(|d| *d += 1.0);
        m
    }

    #[test]
    fn test_asymmetric_solve() {
        let m = convection_diffusion(12);
        let interfaces = LduInterfaces::default();
        let comm = SerialComm::new();
        let system = LinearSystem::new("T", &m, &[], &[], &interfaces, &comm);
        let exact: Vec<f64> = (0..12).map(|i| 1.0 + 0.1 * i as f64).collect();
        let b = m.amul(&exact, &[], &interfaces).unwrap();

        for pre in ["DILU", "diagonal", "none"] {
            let solver = PBiCgStab::new(
                SolverControls::new("PBiCGStab")
                    .with_preconditioner(pre)
                    .with_tolerance(1e-12)
                    .with_max_iter(500),
                &m,
            )
            .unwrap();
            let mut psi = vec![0.0; 12];
            let perf = solver.solve(&system, &mut psi, &b).unwrap();
            assert!(perf.converged, "{}", perf);
            for (p, e) in psi.iter().zip(&exact) {
                assert_relative_eq!(p, e, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn test_name() {
        let m = convection_diffusion(3);
        let solver = PBiCgStab::new(SolverControls::new("PBiCGStab"), &m).unwrap();
        assert_eq!(solver.name(), "DILUPBiCGStab");
    }
}
