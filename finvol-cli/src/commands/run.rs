//! Run a transient scalar transport case.

use crate::case::Case;
use anyhow::{Context, Result};
use clap::Args;
use finvol_core::control::TimeStepResiduals;
use finvol_core::time::courant_number;
use finvol_core::{
    decompose, fvc, fvm, run_parallel, FvMesh, PimpleControl, Residuals, SurfaceScalarField, Time,
    VolScalarField, VolVectorField,
};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Run arguments
#[derive(Args)]
pub struct RunArgs {
    /// Case description (JSON)
    #[arg(short, long)]
    pub case: PathBuf,

    /// Number of subdomains solved in parallel
    #[arg(short = 'n', long, default_value = "1")]
    pub procs: usize,

    /// Write the residual history to this file (JSON)
    #[arg(short, long)]
    pub residuals: Option<PathBuf>,

    /// Directory for field snapshots [default: directory of the case file]
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Field values at one write time, on the undecomposed mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSnapshot {
    pub field: String,
    pub time_name: String,
    pub time: f64,
    pub time_index: usize,
    pub internal_field: Vec<f64>,
    /// Face values keyed by patch name.
    pub boundary_field: BTreeMap<String, Vec<f64>>,
}

impl FieldSnapshot {
    fn new(mesh: &FvMesh, written: &WrittenField, field: &VolScalarField) -> Self {
        Self {
            field: field.name().to_string(),
            time_name: written.time_name.clone(),
            time: written.time,
            time_index: written.time_index,
            internal_field: field.internal().to_vec(),
            boundary_field: mesh
                .patches()
                .iter()
                .enumerate()
                .map(|(i, patch)| (patch.name().to_string(), field.boundary_values(i).to_vec()))
                .collect(),
        }
    }

    /// `<dir>/<time name>/<field>.json`
    pub fn path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.time_name).join(format!("{}.json", self.field))
    }
}

/// Final field, residual history and snapshots of a run.
pub struct RunOutput {
    pub field: VolScalarField,
    pub history: Vec<TimeStepResiduals>,
    pub snapshots: Vec<FieldSnapshot>,
}

/// Field state of one (sub)domain at a write time.
struct WrittenField {
    time_name: String,
    time: f64,
    time_index: usize,
    field: VolScalarField,
}

/// Result of the time loop on one (sub)domain.
struct Transported {
    field: VolScalarField,
    history: Vec<TimeStepResiduals>,
    written: Vec<WrittenField>,
}

pub fn execute(args: RunArgs) -> Result<()> {
    let case = Case::load(&args.case)?;
    let start = Instant::now();

    let output = solve(&case, args.procs)?;

    info!(
        "Finished in {:.2} s: {} time steps",
        start.elapsed().as_secs_f64(),
        output.history.len()
    );

    let dir = match &args.output {
        Some(dir) => dir.clone(),
        None => args.case.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    let written = write_snapshots(&dir, &output.snapshots)?;
    info!("{} field snapshots written under {}", written.len(), dir.display());

    if let Some(path) = &args.residuals {
        let json = serde_json::to_string_pretty(&output.history)?;
        std::fs::write(path, json)
            .with_context(|| format!("cannot write residual history {}", path.display()))?;
        info!("Residual history written to {}", path.display());
    }
    Ok(())
}

/// Solve `case` on `procs` subdomains; the returned field is on the undecomposed mesh.
pub fn solve(case: &Case, procs: usize) -> Result<RunOutput> {
    let mesh = case.mesh.build()?;
    info!(
        "Mesh: {} cells, {} faces, {} patches",
        mesh.n_cells(),
        mesh.n_faces(),
        mesh.patches().len()
    );
    let report = mesh.check();
    if !report.ok() {
        log::warn!("Mesh check failed:\n{}", report);
    }

    let t0 = case.initial_field(&mesh)?;
    let u = VolVectorField::uniform("U", &mesh, case.velocity());
    let phi = fvc::flux(&mesh, &u)?;

    if procs <= 1 {
        let run = transport(case, &mesh, t0, &phi)?;
        let snapshots = run
            .written
            .iter()
            .map(|w| FieldSnapshot::new(&mesh, w, &w.field))
            .collect();
        return Ok(RunOutput {
            field: run.field,
            history: run.history,
            snapshots,
        });
    }

    let method = case.decomposition();
    let decomposed = decompose(&mesh, procs, &method)?;
    let outputs = run_parallel(procs, |rank, comm| {
        let local = decomposed.mesh(rank, comm)?;
        let mut t = decomposed.distribute(&local, &t0)?;
        t.correct_boundary_conditions(&local)?;
        let phi = decomposed.distribute_surface(&local, &phi)?;
        transport(case, &local, t, &phi)
    })?;

    let fields: Vec<VolScalarField> = outputs.iter().map(|run| run.field.clone()).collect();
    let field = decomposed.reconstruct(&mesh, &fields)?;

    // Every rank shares the time loop, so write times line up across ranks
    let mut snapshots = Vec::new();
    for (i, written) in outputs[0].written.iter().enumerate() {
        let parts = outputs
            .iter()
            .map(|run| run.written.get(i).map(|w| w.field.clone()))
            .collect::<Option<Vec<_>>>()
            .with_context(|| format!("subdomains disagree on write time {}", written.time_name))?;
        let global = decomposed.reconstruct(&mesh, &parts)?;
        snapshots.push(FieldSnapshot::new(&mesh, written, &global));
    }

    // Every rank records the same globally reduced residuals
    let history = outputs.into_iter().next().map(|run| run.history).unwrap_or_default();
    Ok(RunOutput {
        field,
        history,
        snapshots,
    })
}

/// Write each snapshot to `<dir>/<time name>/<field>.json`; returns the written paths.
pub fn write_snapshots(dir: &Path, snapshots: &[FieldSnapshot]) -> Result<Vec<PathBuf>> {
    snapshots
        .iter()
        .map(|snapshot| {
            let path = snapshot.path(dir);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("cannot create time directory {}", parent.display()))?;
            }
            let json = serde_json::to_string_pretty(snapshot)?;
            std::fs::write(&path, json)
                .with_context(|| format!("cannot write field snapshot {}", path.display()))?;
            log::debug!("Wrote {}", path.display());
            Ok(path)
        })
        .collect()
}

/// Time loop of `ddt(T) + div(phi,T) - laplacian(DT,T) == 0` on one (sub)domain.
fn transport(
    case: &Case,
    mesh: &FvMesh,
    mut t: VolScalarField,
    phi: &SurfaceScalarField,
) -> finvol_core::Result<Transported> {
    let master = mesh.comm().is_master();
    let dt_field = SurfaceScalarField::uniform("DT", mesh, case.diffusivity);
    let mut time = Time::new(case.time.clone())?;
    let mut pimple = PimpleControl::new(case.solution.pimple.clone());
    let mut residuals = Residuals::new();
    let mut written = Vec::new();

    while time.run() {
        let courant = courant_number(mesh, phi, time.delta_t())?;
        time.adjust_delta_t(courant)?;
        time.advance();
        if master {
            info!("Time = {}  Courant Number max: {:.4}", time.value(), courant);
        }

        residuals.begin_time_step(time.time_index(), time.value());
        t.store_old_times(time.time_index());

        while pimple.loop_step(&residuals) {
            let final_iter = pimple.final_iter();
            t.store_prev_iter();
            t.update_coeffs(phi)?;

            for (_, final_non_orth) in pimple.non_orth_correctors() {
                let mut eqn = fvm::ddt(mesh, &time, &case.schemes, &t)?
                    .try_add(fvm::div(mesh, &case.schemes, phi, &t)?)?
                    .try_sub(fvm::laplacian(mesh, &case.schemes, &dt_field, &t)?)?;
                eqn.relax_from(&t, &case.solution, final_iter)?;
                let final_solve = pimple.final_inner_iter(true, final_non_orth);
                eqn.solve_with(&mut t, &case.solution, final_solve, &mut residuals)?;
            }

            if let Some(alpha) = case.solution.field_relaxation_factor(t.name(), final_iter) {
                t.relax(mesh, alpha)?;
            }
        }

        if time.write_time() {
            let (min, max, avg) = (t.gmin(mesh)?, t.gmax(mesh)?, t.weighted_average(mesh)?);
            if master {
                info!(
                    "{} at time {}: min {:.6}, max {:.6}, average {:.6}",
                    t.name(),
                    time.value(),
                    min,
                    max,
                    avg
                );
            }
            written.push(WrittenField {
                time_name: time.time_name(),
                time: time.value(),
                time_index: time.time_index(),
                field: t.clone(),
            });
        }
    }
    residuals.finish();

    Ok(Transported {
        field: t,
        history: residuals.history().to_vec(),
        written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn case(cyclic: bool) -> Case {
        let mesh = if cyclic {
            r#""cells": [12, 4, 1], "lengths": [1.0, 0.4, 0.1], "twoDimensional": true, "cyclic": "y""#
        } else {
            r#""cells": [12, 4, 1], "lengths": [1.0, 0.4, 0.1], "twoDimensional": true"#
        };
        let json = format!(
            r#"{{
                "mesh": {{
                    {},
                    "sides": [
                        {{"side": "left", "name": "inlet"}},
                        {{"side": "right", "name": "outlet"}}
                    ]
                }},
                "velocity": [1.0, 0.0, 0.0],
                "diffusivity": 0.05,
                "boundaryConditions": {{
                    "inlet": {{"type": "fixedValue", "value": 1.0}},
                    "outlet": {{"type": "inletOutlet", "inletValue": 0.0}}
                }},
                "time": {{"endTime": 0.2, "deltaT": 0.02, "writeInterval": 5}},
                "schemes": {{"divSchemes": {{"default": "Gauss vanLeer"}}}},
                "solution": {{
                    "solvers": {{"T": {{"solver": "PBiCGStab", "preconditioner": "DILU", "tolerance": 1e-12}}}},
                    "pimple": {{"nOuterCorrectors": 2}}
                }}
            }}"#,
            mesh
        );
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_serial_run_records_history() {
        let output = solve(&case(false), 1).unwrap();
        assert_eq!(output.history.len(), 10);
        assert!(output.history.iter().all(|step| step.fields.contains_key("T")));
        assert!(output.history[0].fields["T"].n_iterations > 0);
        let t = output.field.internal();
        assert!(t.iter().all(|&v| (-1e-6..=1.0 + 1e-6).contains(&v)));
        assert!(t[0] > t[11]);
    }

    #[test]
    fn test_parallel_run_matches_serial() {
        let case = case(true);
        let serial = solve(&case, 1).unwrap();
        let parallel = solve(&case, 3).unwrap();
        for (s, p) in serial.field.internal().iter().zip(parallel.field.internal()) {
            assert_relative_eq!(*s, *p, epsilon = 1e-8);
        }
        assert_eq!(serial.history.len(), parallel.history.len());

        assert_eq!(parallel.snapshots.len(), serial.snapshots.len());
        for (s, p) in serial.snapshots.iter().zip(&parallel.snapshots) {
            assert_eq!(s.time_name, p.time_name);
            for (a, b) in s.internal_field.iter().zip(&p.internal_field) {
                assert_relative_eq!(*a, *b, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn test_snapshots_written_at_write_times() {
        let output = solve(&case(false), 1).unwrap();
        // writeInterval 5 over 10 steps
        let names: Vec<&str> = output.snapshots.iter().map(|s| s.time_name.as_str()).collect();
        assert_eq!(names, vec!["0.1", "0.2"]);
        let last = output.snapshots.last().unwrap();
        assert_eq!(last.internal_field, output.field.internal());
        assert_eq!(last.boundary_field["inlet"], vec![1.0; 4]);

        let dir = std::env::temp_dir().join(format!("finvol-run-{}", std::process::id()));
        let paths = write_snapshots(&dir, &output.snapshots).unwrap();
        assert_eq!(paths, vec![dir.join("0.1").join("T.json"), dir.join("0.2").join("T.json")]);
        for (path, snapshot) in paths.iter().zip(&output.snapshots) {
            let read: FieldSnapshot = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
            assert_eq!(read.field, "T");
            assert_eq!(read.time_index, snapshot.time_index);
            assert_eq!(read.boundary_field.len(), snapshot.boundary_field.len());
            for (a, b) in read.internal_field.iter().zip(&snapshot.internal_field) {
                assert_relative_eq!(*a, *b, max_relative = 1e-14);
            }
        }
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
