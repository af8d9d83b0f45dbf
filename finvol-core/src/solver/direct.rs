//! Direct solves of the assembled LDU system.
//!
//! The diagonal, face coefficients and in-process interface coefficients are gathered into
//! one column-sorted coefficient list. Symmetric systems are factorised with faer's sparse
//! Cholesky, with the sign flipped first when the diagonal is negative (diffusion operators
//! assemble that way). Asymmetric systems, and symmetric ones Cholesky rejects, use
//! nalgebra's dense LU.
//!
//! Interfaces to other subdomains have no local column, so the direct solver is serial only.

use super::{norm_factor, LduSolver, LinearSystem, SolverPerformance};
use crate::error::{Error, Result};
use crate::ldu::LduMatrix;
use faer::linalg::cholesky::llt::factor::LltError;
use faer::prelude::*;
use faer::sparse::linalg::solvers::{Llt, SymbolicLlt};
use faer::sparse::linalg::LltError as SparseLltError;
use faer::sparse::{SparseColMat, SymbolicSparseColMat};

/// Coefficients of an LDU system in compressed column order.
#[derive(Debug, Clone)]
struct AssembledSystem {
    n: usize,
    col_offsets: Vec<usize>,
    row_indices: Vec<usize>,
    values: Vec<f64>,
}

impl AssembledSystem {
    /// Gather the coefficients of `system`, scaled by `sign`.
    fn new(system: &LinearSystem<'_>, sign: f64) -> Result<Self> {
        let n = system.matrix.n_cells();
        let mut entries = Vec::with_capacity(n + 2 * system.matrix.addressing().n_faces());
        system
            .matrix
            .for_each_coefficient(system.interface_bou_coeffs, system.interfaces, |row, col, v| {
                entries.push((col, row, sign * v))
            })?;
        entries.sort_unstable_by_key(|&(col, row, _)| (col, row));

        let mut col_offsets = vec![0usize; n + 1];
        let mut row_indices = Vec::with_capacity(entries.len());
        let mut values: Vec<f64> = Vec::with_capacity(entries.len());
        let mut last = None;
        for (col, row, v) in entries {
            // Cyclic faces can repeat a face coefficient between the same two cells
            if last == Some((col, row)) {
                if let Some(value) = values.last_mut() {
                    *value += v;
                }
                continue;
            }
            last = Some((col, row));
            col_offsets[col + 1] += 1;
            row_indices.push(row);
            values.push(v);
        }
        for c in 0..n {
            col_offsets[c + 1] += col_offsets[c];
        }

        Ok(Self {
            n,
            col_offsets,
            row_indices,
            values,
        })
    }

    fn to_faer(&self) -> SparseColMat<usize, f64> {
        // SAFETY: offsets are monotone and rows within each column are sorted and unique
        unsafe {
            SparseColMat::new(
                SymbolicSparseColMat::new_unchecked(
                    self.n,
                    self.n,
                    self.col_offsets.clone(),
                    None,
                    self.row_indices.clone(),
                ),
                self.values.clone(),
            )
        }
    }

    /// Sparse LLᵀ; the system must be symmetric positive definite.
    fn cholesky(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        let csc = self.to_faer();
        let csc_ref = csc.as_ref();

        let symbolic = SymbolicLlt::try_new(csc_ref.symbolic(), faer::Side::Lower)
            .map_err(|_| Error::Solver("symbolic Cholesky analysis failed".into()))?;
        let llt = Llt::try_new_with_symbolic(symbolic, csc_ref, faer::Side::Lower).map_err(|e| match e {
            SparseLltError::Generic(err) => Error::Solver(format!("sparse Cholesky error: {:?}", err)),
            SparseLltError::Numeric(LltError::NonPositivePivot { index }) => {
                Error::SingularMatrix(format!("matrix is not positive definite at cell {}", index))
            }
        })?;

        let mut x = faer::Mat::from_fn(self.n, 1, |i, _| rhs[i]);
        llt.solve_in_place(x.as_mut());
        Ok((0..self.n).map(|i| x[(i, 0)]).collect())
    }

    fn lu(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        use nalgebra::{DMatrix, DVector};

        let mut dense = DMatrix::<f64>::zeros(self.n, self.n);
        for col in 0..self.n {
            for k in self.col_offsets[col]..self.col_offsets[col + 1] {
                dense[(self.row_indices[k], col)] = self.values[k];
            }
        }
        let solution = dense
            .lu()
            .solve(&DVector::from_column_slice(rhs))
            .ok_or_else(|| Error::SingularMatrix("LU factorization failed".into()))?;
        Ok(solution.as_slice().to_vec())
    }
}

/// Direct solve of an LDU system, registered as `direct`.
#[derive(Debug, Clone, Copy)]
pub struct DirectSolver {
    symmetric: bool,
}

impl DirectSolver {
    pub fn new(matrix: &LduMatrix) -> Self {
        Self {
            symmetric: !matrix.asymmetric(),
        }
    }

    fn solve_assembled(&self, system: &LinearSystem<'_>, source: &[f64]) -> Result<Vec<f64>> {
        if source.len() != system.matrix.n_cells() {
            return Err(Error::Solver(format!(
                "source size mismatch: {} cells, {} values",
                system.matrix.n_cells(),
                source.len()
            )));
        }

        if self.symmetric {
            let negative = system.matrix.diag().iter().all(|d| *d < 0.0);
            let sign = if negative { -1.0 } else { 1.0 };
            let rhs: Vec<f64> = source.iter().map(|b| sign * b).collect();
            match AssembledSystem::new(system, sign)?.cholesky(&rhs) {
                Ok(x) => return Ok(x),
                Err(Error::SingularMatrix(msg)) => {
                    log::debug!("Cholesky rejected {} ({}), using LU", system.field_name, msg);
                }
                Err(e) => return Err(e),
            }
        }
        AssembledSystem::new(system, 1.0)?.lu(source)
    }
}

impl LduSolver for DirectSolver {
    fn solve(&self, system: &LinearSystem<'_>, psi: &mut [f64], source: &[f64]) -> Result<SolverPerformance> {
        let mut perf = SolverPerformance::new(self.name(), system.field_name);

        let mut a_psi = vec![0.0; psi.len()];
        system.amul(psi, &mut a_psi)?;
        let nf = norm_factor(system, psi, source, &a_psi)?;
        let r_a: Vec<f64> = source.iter().zip(&a_psi).map(|(b, a)| b - a).collect();
        perf.initial_residual = system.normalised_residual(&r_a, nf)?;

        let solution = self.solve_assembled(system, source)?;
        psi.copy_from_slice(&solution);

        let r_a = system.residual(psi, source)?;
        perf.final_residual = system.normalised_residual(&r_a, nf)?;
        perf.n_iterations = 1;
        // Round-off is the only error left
        perf.converged = true;
        Ok(perf)
    }

    fn name(&self) -> &str {
        "direct"
    }
}
