//! Compressed sparse row form of cell-to-cell systems.
//!
//! The iterative solvers work on the face-addressed LDU storage. Direct solves and matrix
//! checks need the assembled matrix instead, built here from coordinate entries.

use crate::error::{Error, Result};
use nalgebra_sparse::coo::CooMatrix;
use nalgebra_sparse::csr::CsrMatrix as NalgebraCsr;

/// Compressed Sparse Row matrix.
pub type CsrMatrix = NalgebraCsr<f64>;

/// Coordinate-format builder for a square cell-to-cell matrix.
///
/// Repeated entries accumulate. Zero coefficients are stored so the sparsity pattern
/// always matches the mesh connectivity.
#[derive(Debug, Clone)]
pub struct TripletMatrix {
    n: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<f64>,
}

impl TripletMatrix {
    /// Builder for an `n` by `n` matrix.
    pub fn new(n: usize) -> Self {
        Self::with_capacity(n, 0)
    }

    pub fn with_capacity(n: usize, nnz: usize) -> Self {
        Self {
            n,
            rows: Vec::with_capacity(nnz),
            cols: Vec::with_capacity(nnz),
            values: Vec::with_capacity(nnz),
        }
    }

    /// Dense rows, skipping zeros.
    pub fn from_rows<const N: usize>(rows: &[[f64; N]]) -> Self {
        let mut triplets = Self::new(N);
        for (r, row) in rows.iter().enumerate() {
            for (c, &v) in row.iter().enumerate().filter(|(_, v)| **v != 0.0) {
                triplets.add(r, c, v);
            }
        }
        triplets
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.n && col < self.n, "entry ({}, {}) outside {}x{}", row, col, self.n, self.n);
        self.rows.push(row);
        self.cols.push(col);
        self.values.push(value);
    }

    /// Number of stored entries before accumulation.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn to_csr(self) -> Result<CsrMatrix> {
        let coo = CooMatrix::try_from_triplets(self.n, self.n, self.rows, self.cols, self.values)
            .map_err(|e| Error::Matrix(format!("cannot assemble {}x{} matrix: {}", self.n, self.n, e)))?;
        Ok(CsrMatrix::from(&coo))
    }
}

/// `A x` for a CSR matrix.
pub fn csr_mul(a: &CsrMatrix, x: &[f64]) -> Vec<f64> {
    a.row_iter()
        .map(|row| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .map(|(&c, v)| v * x[c])
                .sum()
        })
        .collect()
}

/// `b - A x` for a CSR matrix.
pub fn csr_residual(a: &CsrMatrix, x: &[f64], b: &[f64]) -> Vec<f64> {
    csr_mul(a, x).iter().zip(b).map(|(ax, bi)| bi - ax).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_entries_accumulate() {
        // Two faces of a 3-cell chain, each adding -1 to both off-diagonals and +1 to both diagonals
        let mut triplets = TripletMatrix::with_capacity(3, 9);
        for (l, u) in [(0, 1), (1, 2)] {
            triplets.add(l, u, -1.0);
            triplets.add(u, l, -1.0);
            triplets.add(l, l, 1.0);
            triplets.add(u, u, 1.0);
        }
        assert_eq!(triplets.nnz(), 8);

        let csr = triplets.to_csr().unwrap();
        assert_eq!(csr.nnz(), 7);
        let dense = nalgebra::DMatrix::from(&csr);
        assert_eq!(dense[(1, 1)], 2.0);
        assert_eq!(dense[(0, 2)], 0.0);
    }

    #[test]
    fn test_zero_coefficients_keep_pattern() {
        let mut triplets = TripletMatrix::new(2);
        triplets.add(0, 0, 1.0);
        triplets.add(1, 1, 1.0);
        triplets.add(0, 1, 0.0);
        triplets.add(1, 0, 0.0);
        assert_eq!(triplets.to_csr().unwrap().nnz(), 4);
    }

    #[test]
    fn test_residual() {
        let csr = TripletMatrix::from_rows(&[[2.0, -1.0], [0.0, 4.0]]).to_csr().unwrap();
        assert_eq!(csr.nnz(), 3);
        assert_eq!(csr_mul(&csr, &[1.0, 2.0]), vec![0.0, 8.0]);
        assert_eq!(csr_residual(&csr, &[1.0, 2.0], &[1.0, 8.0]), vec![1.0, 0.0]);
    }
}
