//! Solver performance records.

use crate::types::VSMALL;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `relTol` at or below this disables the relative criterion.
const REL_TOL_SMALL: f64 = 1e-20;

/// Outcome of one linear solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverPerformance {
    pub solver_name: String,
    pub field_name: String,
    pub initial_residual: f64,
    pub final_residual: f64,
    pub n_iterations: usize,
    pub converged: bool,
    pub singular: bool,
}

impl SolverPerformance {
    pub fn new(solver_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            solver_name: solver_name.into(),
            field_name: field_name.into(),
            initial_residual: 0.0,
            final_residual: 0.0,
            n_iterations: 0,
            converged: false,
            singular: false,
        }
    }

    /// Update and return the converged flag.
    pub fn check_convergence(&mut self, tolerance: f64, rel_tol: f64) -> bool {
        log::trace!(
            "{}:  Iteration {} residual = {:e}",
            self.solver_name,
            self.n_iterations,
            self.final_residual
        );

        self.converged = self.final_residual < tolerance
            || (rel_tol > REL_TOL_SMALL && self.final_residual < rel_tol * self.initial_residual);
        self.converged
    }

    /// Update and return the singular flag.
    pub fn check_singularity(&mut self, residual: f64) -> bool {
        self.singular = residual < VSMALL;
        self.singular
    }

    /// Merge the record of a later solve of the same field within a time step: keeps the
    /// first initial residual and the latest final residual.
    pub fn merge(&mut self, later: &SolverPerformance) {
        self.final_residual = later.final_residual;
        self.n_iterations += later.n_iterations;
        self.converged = later.converged;
        self.singular |= later.singular;
    }
}

impl fmt::Display for SolverPerformance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:  Solving for {}, Initial residual = {:e}, Final residual = {:e}, No Iterations {}",
            self.solver_name,
            self.field_name,
            self.initial_residual,
            self.final_residual,
            self.n_iterations
        )
    }
}
