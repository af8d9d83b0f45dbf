//! Simulation time: step size history, write scheduling and Courant-number based time-step
//! adjustment.

use crate::error::{Error, Result};
use crate::field::SurfaceScalarField;
use crate::mesh::FvMesh;
use crate::types::SMALL;
use serde::{Deserialize, Serialize};

/// Decimal places kept in time directory names.
const TIME_NAME_PRECISION: usize = 6;

/// When field snapshots are due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteControl {
    /// Every `write_interval` time steps.
    TimeStep,
    /// Every `write_interval` units of simulated time.
    RunTime,
}

/// Time settings of a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeConfig {
    pub start_time: f64,
    pub end_time: f64,
    pub delta_t: f64,
    pub write_control: WriteControl,
    pub write_interval: f64,
    /// Adapt the step to keep the Courant number at `max_co`.
    pub adjust_time_step: bool,
    pub max_co: f64,
    pub max_delta_t: f64,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            end_time: 1.0,
            delta_t: 0.01,
            write_control: WriteControl::TimeStep,
            write_interval: 10.0,
            adjust_time_step: false,
            max_co: 1.0,
            max_delta_t: f64::MAX,
        }
    }
}

impl TimeConfig {
    pub fn new(start_time: f64, end_time: f64, delta_t: f64) -> Self {
        Self {
            start_time,
            end_time,
            delta_t,
            ..Default::default()
        }
    }

    pub fn with_write(mut self, control: WriteControl, interval: f64) -> Self {
        self.write_control = control;
        self.write_interval = interval;
        self
    }

    pub fn with_adjustable_time_step(mut self, max_co: f64, max_delta_t: f64) -> Self {
        self.adjust_time_step = true;
        self.max_co = max_co;
        self.max_delta_t = max_delta_t;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.delta_t.is_nan() || self.delta_t <= 0.0 {
            return Err(Error::Config(format!("deltaT must be positive, got {}", self.delta_t)));
        }
        if self.end_time < self.start_time {
            return Err(Error::Config(format!(
                "endTime {} precedes startTime {}",
                self.end_time, self.start_time
            )));
        }
        if self.write_interval.is_nan() || self.write_interval <= 0.0 {
            return Err(Error::Config(format!(
                "writeInterval must be positive, got {}",
                self.write_interval
            )));
        }
        if self.adjust_time_step && (self.max_co.is_nan() || self.max_co <= 0.0 || self.max_delta_t <= 0.0) {
            return Err(Error::Config(
                "adjustable time stepping needs positive maxCo and maxDeltaT".into(),
            ));
        }
        Ok(())
    }
}

/// Run-time state of the time loop.
#[derive(Debug, Clone)]
pub struct Time {
    config: TimeConfig,
    value: f64,
    delta_t: f64,
    delta_t0: f64,
    delta_t_save: f64,
    time_index: usize,
    write_index: usize,
    write_due: bool,
}

impl Time {
    pub fn new(config: TimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            value: config.start_time,
            delta_t: config.delta_t,
            delta_t0: config.delta_t,
            delta_t_save: config.delta_t,
            time_index: 0,
            write_index: 0,
            write_due: false,
            config,
        })
    }

    pub fn config(&self) -> &TimeConfig {
        &self.config
    }

    /// Current time.
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn delta_t(&self) -> f64 {
        self.delta_t
    }

    /// Size of the previous time step.
    pub fn delta_t0(&self) -> f64 {
        self.delta_t0
    }

    pub fn time_index(&self) -> usize {
        self.time_index
    }

    /// True while another step fits before the end time.
    pub fn run(&self) -> bool {
        self.value < self.config.end_time - 0.5 * self.delta_t
    }

    /// Change the step size of the next step.
    pub fn set_delta_t(&mut self, delta_t: f64) -> Result<()> {
        if delta_t.is_nan() || delta_t <= 0.0 {
            return Err(Error::Config(format!("deltaT must be positive, got {}", delta_t)));
        }
        self.delta_t = delta_t;
        Ok(())
    }

    /// Start the next time step.
    pub fn advance(&mut self) {
        self.delta_t0 = self.delta_t_save;
        self.delta_t_save = self.delta_t;
        self.value += self.delta_t;
        self.time_index += 1;

        self.write_due = match self.config.write_control {
            WriteControl::TimeStep => {
                let interval = (self.config.write_interval.round() as usize).max(1);
                self.time_index % interval == 0
            }
            WriteControl::RunTime => {
                let index = ((self.value - self.config.start_time + 0.5 * self.delta_t)
                    / self.config.write_interval)
                    .floor() as usize;
                let due = index > self.write_index;
                if due {
                    self.write_index = index;
                }
                due
            }
        };
        if !self.run() {
            self.write_due = true;
        }
        log::debug!("Time = {:e}, deltaT = {:e}", self.value, self.delta_t);
    }

    /// `run()` followed by `advance()` when it returns true.
    pub fn loop_step(&mut self) -> bool {
        let running = self.run();
        if running {
            self.advance();
        }
        running
    }

    /// Name of the current time for output directories: fixed point with trailing zeros
    /// dropped, so `0.30000000000000004` becomes `0.3`.
    pub fn time_name(&self) -> String {
        let fixed = format!("{:.*}", TIME_NAME_PRECISION, self.value);
        match fixed.trim_end_matches('0').trim_end_matches('.') {
            "" | "-" | "-0" => "0".to_string(),
            name => name.to_string(),
        }
    }

    /// True when fields should be written at the current time.
    pub fn write_time(&self) -> bool {
        self.write_due
    }

    /// Adapt the step to the Courant number of the last step.
    ///
    /// Growth is damped to 10% of the allowed factor and capped at 20% per step; reduction
    /// is immediate.
    pub fn adjust_delta_t(&mut self, courant: f64) -> Result<()> {
        if !self.config.adjust_time_step {
            return Ok(());
        }
        let max_delta_fact = self.config.max_co / (courant + SMALL);
        let factor = max_delta_fact.min(1.0 + 0.1 * max_delta_fact).min(1.2);
        let delta_t = (factor * self.delta_t).min(self.config.max_delta_t);
        log::info!("deltaT = {:e}", delta_t);
        self.set_delta_t(delta_t)
    }
}

/// Maximum Courant number `0.5 * max(sum|phi| / V) * deltaT` over the whole domain.
pub fn courant_number(mesh: &FvMesh, phi: &SurfaceScalarField, delta_t: f64) -> Result<f64> {
    phi.check_mesh(mesh)?;
    let mut sum_phi = vec![0.0; mesh.n_cells()];
    for (f, p) in phi.internal().iter().enumerate() {
        sum_phi[mesh.owner()[f]] += p.abs();
        sum_phi[mesh.neighbour()[f]] += p.abs();
    }
    for (index, patch) in mesh.patches().iter().enumerate() {
        for (&c, p) in patch.face_cells().iter().zip(phi.boundary(index)) {
            sum_phi[c] += p.abs();
        }
    }
    let local = sum_phi
        .iter()
        .zip(mesh.cell_volumes())
        .map(|(s, v)| s / v)
        .fold(0.0, f64::max);
    Ok(0.5 * mesh.comm().max(local)? * delta_t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_mesh::BlockMesh;
    use approx::assert_relative_eq;

    #[test]
    fn test_time_loop() {
        let mut time = Time::new(TimeConfig::new(0.0, 1.0, 0.25).with_write(WriteControl::TimeStep, 2.0)).unwrap();
        let mut steps = 0;
        let mut writes = Vec::new();
        while time.loop_step() {
            steps += 1;
            if time.write_time() {
                writes.push(time.time_index());
            }
        }
        assert_eq!(steps, 4);
        assert_relative_eq!(time.value(), 1.0);
        assert_eq!(writes, vec![2, 4]);
    }

    #[test]
    fn test_time_name() {
        let mut time = Time::new(TimeConfig::new(0.0, 1.0, 0.1)).unwrap();
        assert_eq!(time.time_name(), "0");
        let mut names = Vec::new();
        while time.loop_step() {
            names.push(time.time_name());
        }
        assert_eq!(names[2], "0.3");
        assert_eq!(names.last().map(String::as_str), Some("1"));

        let time = Time::new(TimeConfig::new(12.5, 20.0, 1.0)).unwrap();
        assert_eq!(time.time_name(), "12.5");
    }

    #[test]
    fn test_run_time_write_control() {
        let config = TimeConfig::new(0.0, 1.0, 0.1).with_write(WriteControl::RunTime, 0.3);
        let mut time = Time::new(config).unwrap();
        let mut writes = Vec::new();
        while time.loop_step() {
            if time.write_time() {
                writes.push(time.time_index());
            }
        }
        // Every 0.3 in simulated time, plus the final step
        assert_eq!(writes, vec![3, 6, 9, 10]);
    }

    #[test]
    fn test_delta_t0_tracks_previous_step() {
        let mut time = Time::new(TimeConfig::new(0.0, 10.0, 1.0)).unwrap();
        time.advance();
        assert_eq!(time.delta_t0(), 1.0);
        time.set_delta_t(0.5).unwrap();
        time.advance();
        assert_eq!(time.delta_t(), 0.5);
        assert_eq!(time.delta_t0(), 1.0);
        time.advance();
        assert_eq!(time.delta_t0(), 0.5);
    }

    #[test]
    fn test_adjust_delta_t() {
        let config = TimeConfig::new(0.0, 10.0, 1.0).with_adjustable_time_step(0.5, 1.1);
        let mut time = Time::new(config).unwrap();
        // Courant number far below the target: growth capped at 1.2, then at maxDeltaT
        time.adjust_delta_t(0.01).unwrap();
        assert_relative_eq!(time.delta_t(), 1.1);

        time.set_delta_t(0.5).unwrap();
        time.adjust_delta_t(0.01).unwrap();
        assert_relative_eq!(time.delta_t(), 0.6);

        // Courant number twice the target halves the step
        time.adjust_delta_t(1.0).unwrap();
        assert_relative_eq!(time.delta_t(), 0.3, max_relative = 1e-12);
    }

    #[test]
    fn test_courant_number() {
        let mesh = BlockMesh::new([4, 1, 1], [1.0, 1.0, 1.0]).build().unwrap();
        // Uniform flux 0.5 through faces of area 1, cell volume 0.25
        let mut phi = SurfaceScalarField::uniform("phi", &mesh, 0.0);
        phi.internal_mut().fill(0.5);
        let left = mesh.find_patch("left").unwrap();
        let right = mesh.find_patch("right").unwrap();
        phi.boundary_mut(left).fill(-0.5);
        phi.boundary_mut(right).fill(0.5);
        let co = courant_number(&mesh, &phi, 0.1).unwrap();
        assert_relative_eq!(co, 0.5 * (1.0 / 0.25) * 0.1, max_relative = 1e-12);
    }

    #[test]
    fn test_invalid_config() {
        assert!(Time::new(TimeConfig::new(0.0, 1.0, 0.0)).is_err());
        assert!(Time::new(TimeConfig::new(1.0, 0.0, 0.1)).is_err());
    }
}
