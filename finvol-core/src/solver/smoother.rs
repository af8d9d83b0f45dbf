//! Smoothers used by [`SmoothSolver`](super::smooth_solver::SmoothSolver).

use super::preconditioner::{DicPreconditioner, DiluPreconditioner, Preconditioner};
use super::LinearSystem;
use crate::error::{Error, Result};
use crate::ldu::LduMatrix;

/// Names accepted by [`new_smoother`].
pub const SMOOTHERS: [&str; 4] = ["GaussSeidel", "symGaussSeidel", "DIC", "DILU"];

/// In-place relaxation of `psi` towards the solution of `A psi = source`.
pub trait Smoother: Send + Sync {
    fn name(&self) -> &str;

    fn smooth(&self, system: &LinearSystem<'_>, psi: &mut [f64], source: &[f64], n_sweeps: usize) -> Result<()>;
}

/// Build a smoother by name. `DIC` requires a symmetric matrix.
pub fn new_smoother(name: &str, matrix: &LduMatrix) -> Result<Box<dyn Smoother>> {
    match name {
        "GaussSeidel" => Ok(Box::new(GaussSeidelSmoother { symmetric: false })),
        "symGaussSeidel" => Ok(Box::new(GaussSeidelSmoother { symmetric: true })),
        "DIC" if matrix.asymmetric() => Err(Error::Solver(
            "DIC smoother requires a symmetric matrix, use DILU".into(),
        )),
        "DIC" => Ok(Box::new(FactorisedSmoother {
            name: "DIC",
            factor: Box::new(DicPreconditioner::new(matrix)?),
        })),
        "DILU" if matrix.asymmetric() => Ok(Box::new(FactorisedSmoother {
            name: "DILU",
            factor: Box::new(DiluPreconditioner::new(matrix)?),
        })),
        "DILU" => Ok(Box::new(FactorisedSmoother {
            name: "DIC",
            factor: Box::new(DicPreconditioner::new(matrix)?),
        })),
        other => Err(Error::Solver(format!(
            "unknown smoother {}, valid smoothers are: {}",
            other,
            SMOOTHERS.join(", ")
        ))),
    }
}

/// Gauss-Seidel over the owner-ordered faces, optionally followed by a reverse sweep.
///
/// Coupled interfaces are treated explicitly (Jacobi) with the values at the start of each
/// sweep.
#[derive(Debug, Clone, Copy)]
pub struct GaussSeidelSmoother {
    symmetric: bool,
}

impl Smoother for GaussSeidelSmoother {
    fn name(&self) -> &str {
        if self.symmetric {
            "symGaussSeidel"
        } else {
            "GaussSeidel"
        }
    }

    fn smooth(&self, system: &LinearSystem<'_>, psi: &mut [f64], source: &[f64], n_sweeps: usize) -> Result<()> {
        let matrix = system.matrix;
        let diag = matrix.diag();
        let upper = matrix.upper();
        let lower = matrix.lower();
        let addr = matrix.addressing();
        let u = addr.upper();
        let own_start = addr.owner_start();
        let n_cells = matrix.n_cells();

        // Interface coefficients enter the source with the opposite sign
        let neg_bou_coeffs: Vec<Vec<f64>> = system
            .interface_bou_coeffs
            .iter()
            .map(|c| c.iter().map(|v| -v).collect())
            .collect();

        let mut b_prime = vec![0.0; n_cells];
        for _ in 0..n_sweeps {
            b_prime.copy_from_slice(source);
            system.interfaces.init(psi)?;
            system.interfaces.update(&neg_bou_coeffs, psi, &mut b_prime)?;

            for c in 0..n_cells {
                let faces = own_start[c]..own_start[c + 1];
                let mut psi_c = b_prime[c];
                for f in faces.clone() {
                    psi_c -= upper[f] * psi[u[f]];
                }
                psi_c /= diag[c];
                for f in faces {
                    b_prime[u[f]] -= lower[f] * psi_c;
                }
                psi[c] = psi_c;
            }

            if self.symmetric {
                for c in (0..n_cells).rev() {
                    let mut psi_c = b_prime[c];
                    for f in own_start[c]..own_start[c + 1] {
                        psi_c -= upper[f] * psi[u[f]];
                    }
                    psi[c] = psi_c / diag[c];
                }
            }
        }
        Ok(())
    }
}

/// Preconditioned Richardson iteration with an incomplete factorisation.
struct FactorisedSmoother {
    name: &'static str,
    factor: Box<dyn Preconditioner>,
}

impl Smoother for FactorisedSmoother {
    fn name(&self) -> &str {
        self.name
    }

    fn smooth(&self, system: &LinearSystem<'_>, psi: &mut [f64], source: &[f64], n_sweeps: usize) -> Result<()> {
        let mut correction = vec![0.0; psi.len()];
        for _ in 0..n_sweeps {
            let r_a = system.residual(psi, source)?;
            self.factor.precondition(&mut correction, &r_a);
            for (p, c) in psi.iter_mut().zip(&correction) {
                *p += c;
            }
        }
        Ok(())
    }
}
