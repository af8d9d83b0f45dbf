//! Solution control: residual bookkeeping and the outer loops of transient (PIMPLE) and
//! steady-state (SIMPLE) solution algorithms.
//!
//! Every [`FvMatrix`](crate::fv_matrix::FvMatrix) solve appends its [`SolverPerformance`] to a
//! [`Residuals`] record. The loop controls read the record back to decide whether the outer
//! iterations have converged.

use crate::config::{PimpleSettings, SimpleSettings};
use crate::solver::SolverPerformance;
use crate::time::Time;
use crate::types::VSMALL;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Merged solver performance of every field solved during one time step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeStepResiduals {
    pub time_index: usize,
    pub time: f64,
    pub fields: BTreeMap<String, SolverPerformance>,
}

/// Solver performance of the current time step plus the history of completed steps.
#[derive(Debug, Clone, Default)]
pub struct Residuals {
    time_index: usize,
    time: f64,
    solves: BTreeMap<String, Vec<SolverPerformance>>,
    history: Vec<TimeStepResiduals>,
}

impl Residuals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the current time step and start recording the next one.
    pub fn begin_time_step(&mut self, time_index: usize, time: f64) {
        self.flush();
        self.time_index = time_index;
        self.time = time;
    }

    /// Close the current time step.
    pub fn finish(&mut self) {
        self.flush();
    }

    fn flush(&mut self) {
        if !self.solves.is_empty() {
            let step = self.current();
            self.history.push(step);
            self.solves.clear();
        }
    }

    /// Record one linear solve.
    pub fn record(&mut self, perf: SolverPerformance) {
        self.solves
            .entry(perf.field_name.clone())
            .or_default()
            .push(perf);
    }

    /// All solves of a field in the current time step, in order.
    pub fn solves(&self, field: &str) -> &[SolverPerformance] {
        self.solves.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn n_solves(&self, field: &str) -> usize {
        self.solves(field).len()
    }

    /// Initial residual of the first solve of a field in the current time step.
    pub fn initial_residual(&self, field: &str) -> Option<f64> {
        self.solves(field).first().map(|p| p.initial_residual)
    }

    /// Performance of a field merged over the current time step.
    pub fn merged(&self, field: &str) -> Option<SolverPerformance> {
        let (first, rest) = self.solves(field).split_first()?;
        let mut merged = first.clone();
        for later in rest {
            merged.merge(later);
        }
        Some(merged)
    }

    /// Snapshot of the current time step.
    pub fn current(&self) -> TimeStepResiduals {
        TimeStepResiduals {
            time_index: self.time_index,
            time: self.time,
            fields: self
                .solves
                .keys()
                .filter_map(|field| self.merged(field).map(|p| (field.clone(), p)))
                .collect(),
        }
    }

    /// Completed time steps.
    pub fn history(&self) -> &[TimeStepResiduals] {
        &self.history
    }

    /// Number of solves of every field so far in the current time step.
    fn counts(&self) -> BTreeMap<String, usize> {
        self.solves
            .iter()
            .map(|(field, solves)| (field.clone(), solves.len()))
            .collect()
    }
}

/// Iterate `(index, is_final)` over `n_non_orthogonal_correctors + 1` corrector passes.
fn non_orthogonal_passes(n_non_orth: usize) -> impl Iterator<Item = (usize, bool)> {
    (0..=n_non_orth).map(move |i| (i, i == n_non_orth))
}

/// Transient outer-corrector loop.
///
/// ```ignore
/// while time.loop_step() {
///     residuals.begin_time_step(time.time_index(), time.value());
///     while pimple.loop_step(&residuals) {
///         let final_iter = pimple.final_iter();
///         // assemble and solve with solution.solver_controls(field, final_iter)
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct PimpleControl {
    settings: PimpleSettings,
    corr: usize,
    converged: bool,
    final_iter: bool,
    /// Solve counts per field at the start of the current outer iteration.
    markers: BTreeMap<String, usize>,
}

impl PimpleControl {
    pub fn new(settings: PimpleSettings) -> Self {
        Self {
            settings,
            corr: 0,
            converged: false,
            final_iter: false,
            markers: BTreeMap::new(),
        }
    }

    pub fn settings(&self) -> &PimpleSettings {
        &self.settings
    }

    /// Start the next outer iteration; false once the loop of this time step is done.
    ///
    /// With residual control, one more iteration runs after the criteria are satisfied and
    /// that iteration is flagged final.
    pub fn loop_step(&mut self, residuals: &Residuals) -> bool {
        let n_outer = self.settings.n_outer_correctors;

        if self.converged {
            log::info!("PIMPLE: converged in {} iterations", self.corr.saturating_sub(1));
            self.reset();
            return false;
        }
        if self.corr >= n_outer {
            if !self.settings.residual_control.is_empty() && n_outer > 1 {
                log::info!("PIMPLE: not converged within {} iterations", self.corr);
            }
            self.reset();
            return false;
        }

        if self.corr > 0 && !self.settings.residual_control.is_empty() {
            self.converged = self.criteria_satisfied(residuals);
        }

        self.corr += 1;
        self.markers = residuals.counts();
        self.final_iter = self.converged || self.corr >= n_outer;
        log::debug!("PIMPLE: iteration {}{}", self.corr, if self.final_iter { " (final)" } else { "" });
        true
    }

    fn reset(&mut self) {
        self.corr = 0;
        self.converged = false;
        self.final_iter = false;
        self.markers.clear();
    }

    /// Check the first solve of each controlled field in the previous outer iteration.
    fn criteria_satisfied(&self, residuals: &Residuals) -> bool {
        let mut checked = false;
        let mut achieved = true;

        for (field, target) in &self.settings.residual_control {
            let solves = residuals.solves(field);
            let marker = self.markers.get(field).copied().unwrap_or(0);
            let (Some(first), Some(current)) = (solves.first(), solves.get(marker)) else {
                continue;
            };
            checked = true;

            let residual = current.initial_residual;
            let relative = residual / first.initial_residual.max(VSMALL);
            let abs_check = residual < target.tolerance;
            let rel_check = target.rel_tol > 0.0 && relative < target.rel_tol;
            achieved &= abs_check || rel_check;

            log::debug!(
                "PIMPLE: {} residual {:e} (tolerance {:e}), relative {:e} (relTol {:e})",
                field,
                residual,
                target.tolerance,
                relative,
                target.rel_tol
            );
        }

        checked && achieved
    }

    /// 1-based index of the current outer iteration.
    pub fn corr(&self) -> usize {
        self.corr
    }

    pub fn first_iter(&self) -> bool {
        self.corr == 1
    }

    /// True on the last outer iteration; selects the `<field>Final` solver controls.
    pub fn final_iter(&self) -> bool {
        self.final_iter
    }

    /// Iterate `(index, is_final)` over the pressure correctors.
    pub fn correctors(&self) -> impl Iterator<Item = (usize, bool)> {
        let n = self.settings.n_correctors.max(1);
        (0..n).map(move |i| (i, i + 1 == n))
    }

    /// Iterate `(index, is_final)` over the non-orthogonal correctors.
    pub fn non_orth_correctors(&self) -> impl Iterator<Item = (usize, bool)> {
        non_orthogonal_passes(self.settings.n_non_orthogonal_correctors)
    }

    /// True on the last non-orthogonal pass of the last corrector of the final outer iteration.
    pub fn final_inner_iter(&self, final_corrector: bool, final_non_orth: bool) -> bool {
        self.final_iter && final_corrector && final_non_orth
    }
}

/// Steady-state iteration loop with residual-based termination.
#[derive(Debug, Clone)]
pub struct SimpleControl {
    settings: SimpleSettings,
    converged: bool,
}

impl SimpleControl {
    pub fn new(settings: SimpleSettings) -> Self {
        Self {
            settings,
            converged: false,
        }
    }

    pub fn settings(&self) -> &SimpleSettings {
        &self.settings
    }

    /// Advance to the next iteration; false when the residual criteria of the last
    /// iteration are satisfied or the end time is reached.
    pub fn loop_step(&mut self, time: &mut Time, residuals: &mut Residuals) -> bool {
        if time.time_index() > 0 && self.criteria_satisfied(residuals) {
            log::info!(
                "SIMPLE solution converged in {} iterations",
                time.time_index()
            );
            self.converged = true;
            residuals.finish();
            return false;
        }
        if !time.loop_step() {
            residuals.finish();
            return false;
        }
        residuals.begin_time_step(time.time_index(), time.value());
        true
    }

    /// True once the loop stopped on the residual criteria.
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Iterate `(index, is_final)` over the non-orthogonal correctors.
    pub fn non_orth_correctors(&self) -> impl Iterator<Item = (usize, bool)> {
        non_orthogonal_passes(self.settings.n_non_orthogonal_correctors)
    }

    fn criteria_satisfied(&self, residuals: &Residuals) -> bool {
        let mut checked = false;
        let mut achieved = true;
        for (field, &tolerance) in &self.settings.residual_control {
            if let Some(residual) = residuals.initial_residual(field) {
                checked = true;
                achieved &= residual < tolerance;
            }
        }
        checked && achieved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResidualTarget;
    use crate::time::TimeConfig;

    fn perf(field: &str, initial: f64, final_residual: f64, iterations: usize) -> SolverPerformance {
        let mut p = SolverPerformance::new("smoothSolver", field);
        p.initial_residual = initial;
        p.final_residual = final_residual;
        p.n_iterations = iterations;
        p.converged = true;
        p
    }

    #[test]
    fn test_residuals_merge_per_time_step() {
        let mut residuals = Residuals::new();
        residuals.begin_time_step(1, 0.1);
        residuals.record(perf("T", 1.0, 0.1, 3));
        residuals.record(perf("T", 0.2, 0.01, 2));
        residuals.record(perf("p", 0.5, 0.05, 7));
        assert_eq!(residuals.n_solves("T"), 2);
        assert_eq!(residuals.initial_residual("T"), Some(1.0));

        let t = residuals.merged("T").unwrap();
        assert_eq!(t.initial_residual, 1.0);
        assert_eq!(t.final_residual, 0.01);
        assert_eq!(t.n_iterations, 5);

        residuals.begin_time_step(2, 0.2);
        assert_eq!(residuals.n_solves("T"), 0);
        assert!(residuals.merged("T").is_none());
        residuals.record(perf("T", 0.3, 0.03, 1));
        residuals.finish();

        let history = residuals.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].time_index, 1);
        assert_eq!(history[0].fields.len(), 2);
        assert_eq!(history[1].fields["T"].initial_residual, 0.3);
    }

    #[test]
    fn test_pimple_fixed_outer_iterations() {
        let mut pimple = PimpleControl::new(PimpleSettings {
            n_outer_correctors: 3,
            ..Default::default()
        });
        let residuals = Residuals::new();
        let mut finals = Vec::new();
        while pimple.loop_step(&residuals) {
            finals.push(pimple.final_iter());
        }
        assert_eq!(finals, vec![false, false, true]);

        // The next time step starts over
        assert!(pimple.loop_step(&residuals));
        assert!(pimple.first_iter());
    }

    #[test]
    fn test_pimple_residual_control() {
        let mut settings = PimpleSettings {
            n_outer_correctors: 10,
            ..Default::default()
        };
        settings.residual_control.insert(
            "T".into(),
            ResidualTarget {
                tolerance: 1e-3,
                rel_tol: 0.0,
            },
        );
        let mut pimple = PimpleControl::new(settings);
        let mut residuals = Residuals::new();
        residuals.begin_time_step(1, 1.0);

        let initials = [1.0, 1e-4, 1e-5, 1e-6];
        let mut finals = Vec::new();
        while pimple.loop_step(&residuals) {
            finals.push(pimple.final_iter());
            let r = initials[pimple.corr() - 1];
            residuals.record(perf("T", r, 0.1 * r, 1));
        }
        // Converged after the second iteration, then one final iteration
        assert_eq!(finals, vec![false, false, true]);
    }

    #[test]
    fn test_pimple_relative_control() {
        let mut settings = PimpleSettings {
            n_outer_correctors: 10,
            ..Default::default()
        };
        settings.residual_control.insert(
            "T".into(),
            ResidualTarget {
                tolerance: 0.0,
                rel_tol: 0.1,
            },
        );
        let mut pimple = PimpleControl::new(settings);
        let mut residuals = Residuals::new();

        let initials = [1.0, 0.5, 0.05, 0.01];
        let mut iterations = 0;
        while pimple.loop_step(&residuals) {
            iterations += 1;
            let r = initials[pimple.corr() - 1];
            // Two solves per outer iteration: only the first counts
            residuals.record(perf("T", r, 0.1 * r, 1));
            residuals.record(perf("T", 1e-9, 1e-10, 1));
        }
        assert_eq!(iterations, 4);
    }

    #[test]
    fn test_correctors() {
        let pimple = PimpleControl::new(PimpleSettings {
            n_correctors: 2,
            n_non_orthogonal_correctors: 2,
            ..Default::default()
        });
        let correctors: Vec<_> = pimple.correctors().collect();
        assert_eq!(correctors, vec![(0, false), (1, true)]);
        let passes: Vec<_> = pimple.non_orth_correctors().collect();
        assert_eq!(passes, vec![(0, false), (1, false), (2, true)]);
        assert!(!pimple.final_inner_iter(true, true));
    }

    #[test]
    fn test_simple_control_stops_on_residual() {
        let mut settings = SimpleSettings::default();
        settings.residual_control.insert("T".into(), 1e-3);
        let mut simple = SimpleControl::new(settings);
        let mut time = Time::new(TimeConfig::new(0.0, 100.0, 1.0)).unwrap();
        let mut residuals = Residuals::new();

        while simple.loop_step(&mut time, &mut residuals) {
            let r = [1e-1, 1e-2, 2e-3, 1e-4][time.time_index() - 1];
            residuals.record(perf("T", r, 0.1 * r, 1));
        }
        assert!(simple.converged());
        assert_eq!(time.time_index(), 4);
        assert_eq!(residuals.history().len(), 4);
    }

    #[test]
    fn test_simple_control_runs_to_end_time() {
        let mut simple = SimpleControl::new(SimpleSettings::default());
        let mut time = Time::new(TimeConfig::new(0.0, 5.0, 1.0)).unwrap();
        let mut residuals = Residuals::new();
        let mut iterations = 0;
        while simple.loop_step(&mut time, &mut residuals) {
            iterations += 1;
        }
        assert_eq!(iterations, 5);
        assert!(!simple.converged());
    }
}
