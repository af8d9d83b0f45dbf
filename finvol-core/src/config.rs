//! Solution controls: linear solver settings per field, relaxation factors and the
//! settings of the pressure-velocity style outer loops.

use crate::error::{Error, Result};
use crate::solver::SolverControls;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Suffix selecting the controls of the final outer iteration.
pub const FINAL_SUFFIX: &str = "Final";

/// Key matching any field in the relaxation tables.
const DEFAULT_KEY: &str = "default";

/// Convergence target of one field in an outer loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResidualTarget {
    /// Absolute tolerance on the initial residual.
    pub tolerance: f64,
    /// Tolerance relative to the initial residual of the first outer iteration; 0 disables it.
    pub rel_tol: f64,
}

impl Default for ResidualTarget {
    fn default() -> Self {
        Self {
            tolerance: 1e-5,
            rel_tol: 0.0,
        }
    }
}

/// PIMPLE outer-loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PimpleSettings {
    pub n_outer_correctors: usize,
    pub n_correctors: usize,
    pub n_non_orthogonal_correctors: usize,
    /// Per-field outer-loop convergence targets.
    pub residual_control: BTreeMap<String, ResidualTarget>,
}

impl Default for PimpleSettings {
    fn default() -> Self {
        Self {
            n_outer_correctors: 1,
            n_correctors: 1,
            n_non_orthogonal_correctors: 0,
            residual_control: BTreeMap::new(),
        }
    }
}

/// SIMPLE steady-state settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimpleSettings {
    pub n_non_orthogonal_correctors: usize,
    /// Per-field absolute tolerances on the initial residual.
    pub residual_control: BTreeMap<String, f64>,
}

/// Under-relaxation factors for fields (explicit) and equations (implicit).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaxationFactors {
    pub fields: BTreeMap<String, f64>,
    pub equations: BTreeMap<String, f64>,
}

/// Solution controls of a case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FvSolution {
    pub solvers: BTreeMap<String, SolverControls>,
    pub relaxation_factors: RelaxationFactors,
    pub pimple: PimpleSettings,
    pub simple: SimpleSettings,
}

impl FvSolution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_solver(mut self, field: impl Into<String>, controls: SolverControls) -> Self {
        self.solvers.insert(field.into(), controls);
        self
    }

    pub fn with_field_relaxation(mut self, field: impl Into<String>, factor: f64) -> Self {
        self.relaxation_factors.fields.insert(field.into(), factor);
        self
    }

    pub fn with_equation_relaxation(mut self, field: impl Into<String>, factor: f64) -> Self {
        self.relaxation_factors.equations.insert(field.into(), factor);
        self
    }

    pub fn with_pimple(mut self, pimple: PimpleSettings) -> Self {
        self.pimple = pimple;
        self
    }

    pub fn with_simple(mut self, simple: SimpleSettings) -> Self {
        self.simple = simple;
        self
    }

    /// Linear solver controls for `field`.
    ///
    /// On the final outer iteration `<field>Final` is used when present; otherwise the
    /// regular controls with `relTol` forced to 0 so the final solve is converged fully.
    pub fn solver_controls(&self, field: &str, final_iter: bool) -> Result<SolverControls> {
        if final_iter {
            if let Some(controls) = self.solvers.get(&format!("{}{}", field, FINAL_SUFFIX)) {
                return Ok(controls.clone());
            }
        }
        let controls = self.solvers.get(field).ok_or_else(|| {
            Error::Config(format!(
                "no solver controls for field {}, available: {}",
                field,
                self.solvers.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })?;
        if final_iter {
            Ok(controls.clone().with_rel_tol(0.0))
        } else {
            Ok(controls.clone())
        }
    }

    /// Explicit relaxation factor for a field, if relaxation is requested.
    pub fn field_relaxation_factor(&self, field: &str, final_iter: bool) -> Option<f64> {
        relaxation_factor(&self.relaxation_factors.fields, field, final_iter)
    }

    /// Implicit relaxation factor for the equation of a field, if relaxation is requested.
    pub fn equation_relaxation_factor(&self, field: &str, final_iter: bool) -> Option<f64> {
        relaxation_factor(&self.relaxation_factors.equations, field, final_iter)
    }

    /// Check every solver entry and relaxation factor.
    pub fn validate(&self) -> Result<()> {
        for (field, controls) in &self.solvers {
            controls
                .validate()
                .map_err(|e| Error::Config(format!("solver controls for {}: {}", field, e)))?;
        }
        let factors = self
            .relaxation_factors
            .fields
            .iter()
            .chain(&self.relaxation_factors.equations);
        for (name, &factor) in factors {
            if factor.is_nan() || factor <= 0.0 || factor > 1.0 {
                return Err(Error::Config(format!(
                    "relaxation factor for {} must lie in (0, 1], got {}",
                    name, factor
                )));
            }
        }
        if self.pimple.n_outer_correctors == 0 {
            return Err(Error::Config("nOuterCorrectors must be at least 1".into()));
        }
        Ok(())
    }
}

/// Final iterations relax only with an explicit `<name>Final` entry.
fn relaxation_factor(table: &BTreeMap<String, f64>, name: &str, final_iter: bool) -> Option<f64> {
    if final_iter {
        return table.get(&format!("{}{}", name, FINAL_SUFFIX)).copied();
    }
    table
        .get(name)
        .or_else(|| table.get(DEFAULT_KEY))
        .copied()
}
