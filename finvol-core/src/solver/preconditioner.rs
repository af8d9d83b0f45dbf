//! Preconditioners for the Krylov solvers.
//!
//! The incomplete factorisations work on the face-ordered LDU storage: the forward
//! substitution walks the faces in increasing order (every face reaching cell `c` from a
//! lower cell comes before any face leaving `c`), the backward substitution in reverse.
//! Coupled interfaces are not part of the factorisation.

use crate::error::{Error, Result};
use crate::ldu::LduMatrix;
use crate::mesh::LduAddressing;
use crate::types::VSMALL;
use rayon::prelude::*;
use std::sync::Arc;

/// Approximate inverse applied to residual vectors.
pub trait Preconditioner: Send + Sync {
    fn name(&self) -> &str;

    /// `w_a = M^-1 r_a`.
    fn precondition(&self, w_a: &mut [f64], r_a: &[f64]);

    /// Transposed application, `w_t = M^-T r_t`.
    fn precondition_t(&self, w_t: &mut [f64], r_t: &[f64]) {
        self.precondition(w_t, r_t);
    }
}

/// Names accepted by [`new_preconditioner`].
pub const PRECONDITIONERS: [&str; 4] = ["none", "diagonal", "DIC", "DILU"];

/// Build a preconditioner by name.
///
/// `DIC` requires a symmetric matrix; `DILU` on a symmetric matrix reduces to `DIC`.
pub fn new_preconditioner(name: &str, matrix: &LduMatrix) -> Result<Box<dyn Preconditioner>> {
    match name {
        "none" => Ok(Box::new(NoPreconditioner)),
        "diagonal" => Ok(Box::new(DiagonalPreconditioner::new(matrix)?)),
        "DIC" if matrix.asymmetric() => Err(Error::Solver(
            "DIC preconditioner requires a symmetric matrix, use DILU".into(),
        )),
        "DIC" => Ok(Box::new(DicPreconditioner::new(matrix)?)),
        "DILU" if !matrix.asymmetric() => Ok(Box::new(DicPreconditioner::new(matrix)?)),
        "DILU" => Ok(Box::new(DiluPreconditioner::new(matrix)?)),
        other => Err(Error::Solver(format!(
            "unknown preconditioner {}, valid preconditioners are: {}",
            other,
            PRECONDITIONERS.join(", ")
        ))),
    }
}

/// Identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPreconditioner;

impl Preconditioner for NoPreconditioner {
    fn name(&self) -> &str {
        "none"
    }

    fn precondition(&self, w_a: &mut [f64], r_a: &[f64]) {
        w_a.copy_from_slice(r_a);
    }
}

/// Jacobi preconditioning: `w = r / diag`.
#[derive(Debug, Clone)]
pub struct DiagonalPreconditioner {
    r_d: Vec<f64>,
}

impl DiagonalPreconditioner {
    pub fn new(matrix: &LduMatrix) -> Result<Self> {
        Ok(Self {
            r_d: reciprocal(matrix.diag().into_owned())?,
        })
    }
}

impl Preconditioner for DiagonalPreconditioner {
    fn name(&self) -> &str {
        "diagonal"
    }

    fn precondition(&self, w_a: &mut [f64], r_a: &[f64]) {
        w_a.par_iter_mut()
            .zip(r_a.par_iter().zip(self.r_d.par_iter()))
            .for_each(|(w, (r, d))| *w = r * d);
    }
}

/// Diagonal incomplete Cholesky.
#[derive(Debug, Clone)]
pub struct DicPreconditioner {
    r_d: Vec<f64>,
    upper: Vec<f64>,
    addr: Arc<LduAddressing>,
}

impl DicPreconditioner {
    pub fn new(matrix: &LduMatrix) -> Result<Self> {
        let addr = Arc::clone(matrix.addressing());
        let upper = matrix.upper().into_owned();
        let mut r_d = matrix.diag().into_owned();
        for f in 0..upper.len() {
            let (l, u) = (addr.lower()[f], addr.upper()[f]);
            r_d[u] -= upper[f] * upper[f] / r_d[l];
        }
        Ok(Self {
            r_d: reciprocal(r_d)?,
            upper,
            addr,
        })
    }

    /// Reciprocal of the factorised diagonal.
    pub fn r_d(&self) -> &[f64] {
        &self.r_d
    }
}

impl Preconditioner for DicPreconditioner {
    fn name(&self) -> &str {
        "DIC"
    }

    fn precondition(&self, w_a: &mut [f64], r_a: &[f64]) {
        let (lo, up) = (self.addr.lower(), self.addr.upper());
        for ((w, r), d) in w_a.iter_mut().zip(r_a).zip(&self.r_d) {
            *w = r * d;
        }
        for f in 0..self.upper.len() {
            w_a[up[f]] -= self.r_d[up[f]] * self.upper[f] * w_a[lo[f]];
        }
        for f in (0..self.upper.len()).rev() {
            w_a[lo[f]] -= self.r_d[lo[f]] * self.upper[f] * w_a[up[f]];
        }
    }
}

/// Diagonal incomplete LU for asymmetric matrices.
#[derive(Debug, Clone)]
pub struct DiluPreconditioner {
    r_d: Vec<f64>,
    upper: Vec<f64>,
    lower: Vec<f64>,
    addr: Arc<LduAddressing>,
}

impl DiluPreconditioner {
    pub fn new(matrix: &LduMatrix) -> Result<Self> {
        let addr = Arc::clone(matrix.addressing());
        let upper = matrix.upper().into_owned();
        let lower = matrix.lower().into_owned();
        let mut r_d = matrix.diag().into_owned();
        for f in 0..upper.len() {
            let (l, u) = (addr.lower()[f], addr.upper()[f]);
            r_d[u] -= upper[f] * lower[f] / r_d[l];
        }
        Ok(Self {
            r_d: reciprocal(r_d)?,
            upper,
            lower,
            addr,
        })
    }
}

impl Preconditioner for DiluPreconditioner {
    fn name(&self) -> &str {
        "DILU"
    }

    fn precondition(&self, w_a: &mut [f64], r_a: &[f64]) {
        let (lo, up, losort) = (self.addr.lower(), self.addr.upper(), self.addr.losort());
        for ((w, r), d) in w_a.iter_mut().zip(r_a).zip(&self.r_d) {
            *w = r * d;
        }
        for &f in losort {
            w_a[up[f]] -= self.r_d[up[f]] * self.lower[f] * w_a[lo[f]];
        }
        for f in (0..self.upper.len()).rev() {
            w_a[lo[f]] -= self.r_d[lo[f]] * self.upper[f] * w_a[up[f]];
        }
    }

    fn precondition_t(&self, w_t: &mut [f64], r_t: &[f64]) {
        let (lo, up, losort) = (self.addr.lower(), self.addr.upper(), self.addr.losort());
        for ((w, r), d) in w_t.iter_mut().zip(r_t).zip(&self.r_d) {
            *w = r * d;
        }
        for f in 0..self.upper.len() {
            w_t[up[f]] -= self.r_d[up[f]] * self.upper[f] * w_t[lo[f]];
        }
        for &f in losort.iter().rev() {
            w_t[lo[f]] -= self.r_d[lo[f]] * self.lower[f] * w_t[up[f]];
        }
    }
}

fn reciprocal(mut d: Vec<f64>) -> Result<Vec<f64>> {
    if let Some(c) = d.iter().position(|v| v.abs() < VSMALL || !v.is_finite()) {
        return Err(Error::SingularMatrix(format!(
            "zero or invalid pivot {} at cell {} in preconditioner",
            d[c], c
        )));
    }
    d.iter_mut().for_each(|v| *v = 1.0 / *v);
    Ok(d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_mesh::BlockMesh;
    use approx::assert_relative_eq;

    fn chain(n: usize) -> LduMatrix {
        let mesh = BlockMesh::new([n, 1, 1], [1.0, 1.0, 1.0]).build().unwrap();
        let mut m = LduMatrix::new(Arc::clone(mesh.ldu_addressing()));
        m.upper_mut().fill(-1.0);
        m.neg_sum_diag();
        m.diag_mut().iter_mut().for_each(|d| *d += 1.0);
        m
    }

    #[test]
    fn test_dic_is_exact_on_tridiagonal() {
        // Incomplete Cholesky of a tridiagonal matrix has no fill-in, so it is exact
        let m = chain(5);
        let pre = new_preconditioner("DIC", &m).unwrap();
        let x = [1.0, -2.0, 3.0, 0.5, 2.0];
        let b = m
            .amul(&x, &[], &crate::ldu::LduInterfaces::default())
            .unwrap();
        let mut w = vec![0.0; 5];
        pre.precondition(&mut w, &b);
        for (a, e) in w.iter().zip(&x) {
            assert_relative_eq!(a, e, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_dilu_is_exact_on_bidiagonal_coupling() {
        let mut m = chain(4);
        m.lower_mut().copy_from_slice(&[-0.5, -0.25, -2.0]);
        let pre = new_preconditioner("DILU", &m).unwrap();
        assert_eq!(pre.name(), "DILU");
        let interfaces = crate::ldu::LduInterfaces::default();

        let x = [1.0, 2.0, -1.0, 4.0];
        let b = m.amul(&x, &[], &interfaces).unwrap();
        let mut w = vec![0.0; 4];
        pre.precondition(&mut w, &b);
        for (a, e) in w.iter().zip(&x) {
            assert_relative_eq!(a, e, epsilon = 1e-12);
        }

        let bt = m.tmul(&x, &[], &interfaces).unwrap();
        pre.precondition_t(&mut w, &bt);
        for (a, e) in w.iter().zip(&x) {
            assert_relative_eq!(a, e, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_selection() {
        let m = chain(3);
        assert_eq!(new_preconditioner("DILU", &m).unwrap().name(), "DIC");
        assert_eq!(new_preconditioner("none", &m).unwrap().name(), "none");
        let mut asym = m.clone();
        asym.lower_mut()[0] = 0.0;
        assert!(new_preconditioner("DIC", &asym).is_err());
        let err = new_preconditioner("GAMG", &m).err().unwrap().to_string();
        assert!(err.contains("DILU"));
    }

    #[test]
    fn test_diagonal_and_singular() {
        let m = chain(3);
        let pre = new_preconditioner("diagonal", &m).unwrap();
        let mut w = vec![0.0; 3];
        pre.precondition(&mut w, &[2.0, 3.0, 2.0]);
        assert_eq!(w, vec![1.0, 1.0, 1.0]);

        let mut zero = m.clone();
        zero.diag_mut()[1] = 0.0;
        assert!(matches!(
            DiagonalPreconditioner::new(&zero),
            Err(Error::SingularMatrix(_))
        ));
    }
}
