//! Linear solver controls.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Controls for one linear solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SolverControls {
    /// Solver name (`PCG`, `PBiCGStab`, `smoothSolver`, `diagonal`, `direct`).
    pub solver: String,
    /// Preconditioner for the Krylov solvers.
    pub preconditioner: String,
    /// Smoother for `smoothSolver`.
    pub smoother: String,
    /// Absolute tolerance on the normalised residual.
    pub tolerance: f64,
    /// Tolerance relative to the initial residual; 0 disables it.
    pub rel_tol: f64,
    pub max_iter: usize,
    pub min_iter: usize,
    /// Sweeps per smoothing pass.
    pub n_sweeps: usize,
    /// Turn non-convergence into an error instead of a warning.
    pub fail_on_non_convergence: bool,
}

impl Default for SolverControls {
    fn default() -> Self {
        Self {
            solver: "PBiCGStab".into(),
            preconditioner: "DILU".into(),
            smoother: "GaussSeidel".into(),
            tolerance: 1e-6,
            rel_tol: 0.0,
            max_iter: 1000,
            min_iter: 0,
            n_sweeps: 1,
            fail_on_non_convergence: false,
        }
    }
}

impl SolverControls {
    /// Controls for a named solver with default settings.
    pub fn new(solver: impl Into<String>) -> Self {
        Self {
            solver: solver.into(),
            ..Default::default()
        }
    }

    pub fn with_preconditioner(mut self, preconditioner: impl Into<String>) -> Self {
        self.preconditioner = preconditioner.into();
        self
    }

    pub fn with_smoother(mut self, smoother: impl Into<String>) -> Self {
        self.smoother = smoother.into();
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_rel_tol(mut self, rel_tol: f64) -> Self {
        self.rel_tol = rel_tol;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_min_iter(mut self, min_iter: usize) -> Self {
        self.min_iter = min_iter;
        self
    }

    pub fn with_n_sweeps(mut self, n_sweeps: usize) -> Self {
        self.n_sweeps = n_sweeps;
        self
    }

    pub fn fail_on_non_convergence(mut self, fail: bool) -> Self {
        self.fail_on_non_convergence = fail;
        self
    }

    /// Reject settings no solver can honour.
    pub fn validate(&self) -> Result<()> {
        if self.tolerance.is_nan() || self.tolerance < 0.0 {
            return Err(Error::Config(format!(
                "tolerance must be non-negative, got {}",
                self.tolerance
            )));
        }
        if !(0.0..=1.0).contains(&self.rel_tol) {
            return Err(Error::Config(format!(
                "relTol must lie in [0, 1], got {}",
                self.rel_tol
            )));
        }
        if self.min_iter > self.max_iter {
            return Err(Error::Config(format!(
                "minIter {} exceeds maxIter {}",
                self.min_iter, self.max_iter
            )));
        }
        if self.n_sweeps == 0 {
            return Err(Error::Config("nSweeps must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = SolverControls::default();
        assert_eq!(c.tolerance, 1e-6);
        assert_eq!(c.rel_tol, 0.0);
        assert_eq!(c.max_iter, 1000);
        assert_eq!(c.min_iter, 0);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_builder_and_validation() {
        let c = SolverControls::new("PCG")
            .with_preconditioner("DIC")
            .with_tolerance(1e-8)
            .with_rel_tol(0.01)
            .with_max_iter(5)
            .with_min_iter(10);
        assert_eq!(c.solver, "PCG");
        assert!(c.validate().is_err());
        assert!(SolverControls::default().with_rel_tol(2.0).validate().is_err());
        assert!(SolverControls::default().with_n_sweeps(0).validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let c: SolverControls =
            serde_json::from_str(r#"{"solver": "PCG", "preconditioner": "DIC", "relTol": 0.05}"#)
                .unwrap();
        assert_eq!(c.solver, "PCG");
        assert_eq!(c.rel_tol, 0.05);
        assert_eq!(c.max_iter, 1000);
    }
}
