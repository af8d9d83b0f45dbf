//! Time-derivative schemes.
//!
//! Old-time levels come from [`VolScalarField::old_time`] and
//! [`VolScalarField::old_old_time`]; callers store them once per step with
//! [`VolScalarField::store_old_times`] before assembling.

use crate::error::{Error, Result};
use crate::field::VolScalarField;
use crate::fv_matrix::FvMatrix;
use crate::mesh::FvMesh;
use crate::time::Time;
use crate::types::GREAT;
use std::fmt;
use std::str::FromStr;

/// Time scheme names.
pub const DDT_SCHEMES: [&str; 3] = ["Euler", "backward", "steadyState"];

/// Time-derivative scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdtScheme {
    /// First-order implicit.
    Euler,
    /// Second-order implicit over three time levels; first order until two old levels exist.
    Backward,
    /// Zero time derivative.
    SteadyState,
}

/// Coefficients of the three time levels: `ddt = (c psi - c0 psi0 + c00 psi00) / dt`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LevelCoeffs {
    coefft: f64,
    coefft0: f64,
    coefft00: f64,
}

impl DdtScheme {
    fn level_coeffs(&self, time: &Time, vf: &VolScalarField) -> LevelCoeffs {
        match self {
            DdtScheme::Backward => {
                let dt = time.delta_t();
                let dt0 = if vf.n_old_times() < 2 { GREAT } else { time.delta_t0() };
                let coefft = 1.0 + dt / (dt + dt0);
                let coefft00 = dt * dt / (dt0 * (dt + dt0));
                LevelCoeffs {
                    coefft,
                    coefft0: coefft + coefft00,
                    coefft00,
                }
            }
            _ => LevelCoeffs {
                coefft: 1.0,
                coefft0: 1.0,
                coefft00: 0.0,
            },
        }
    }

    /// Implicit `ddt(vf)`.
    pub fn fvm_ddt<'a>(&self, mesh: &'a FvMesh, time: &Time, vf: &VolScalarField) -> Result<FvMatrix<'a>> {
        let mut fvm = FvMatrix::new(mesh, vf);
        if *self == DdtScheme::SteadyState {
            return Ok(fvm);
        }
        let r_delta_t = 1.0 / time.delta_t();
        let c = self.level_coeffs(time, vf);
        let v = mesh.cell_volumes();

        let diag: Vec<f64> = v.iter().map(|vol| c.coefft * r_delta_t * vol).collect();
        *fvm.ldu_mut().diag_mut() = diag;

        let old = vf.old_time().internal();
        let old_old = vf.old_old_time().internal();
        for (i, s) in fvm.source_mut().iter_mut().enumerate() {
            *s = r_delta_t * v[i] * (c.coefft0 * old[i] - c.coefft00 * old_old[i]);
        }
        Ok(fvm)
    }

    /// Implicit `ddt(rho, vf)` with a time-varying coefficient.
    pub fn fvm_ddt_rho<'a>(
        &self,
        mesh: &'a FvMesh,
        time: &Time,
        rho: &VolScalarField,
        vf: &VolScalarField,
    ) -> Result<FvMatrix<'a>> {
        if rho.internal().len() != mesh.n_cells() {
            return Err(Error::Field(format!(
                "ddt coefficient {} has {} values for {} cells",
                rho.name(),
                rho.internal().len(),
                mesh.n_cells()
            )));
        }
        let mut fvm = FvMatrix::new(mesh, vf);
        if *self == DdtScheme::SteadyState {
            return Ok(fvm);
        }
        let r_delta_t = 1.0 / time.delta_t();
        let c = self.level_coeffs(time, vf);
        let v = mesh.cell_volumes();
        let r = rho.internal();

        let diag: Vec<f64> = (0..mesh.n_cells())
            .map(|i| c.coefft * r_delta_t * r[i] * v[i])
            .collect();
        *fvm.ldu_mut().diag_mut() = diag;

        let (r0, r00) = (rho.old_time().internal(), rho.old_old_time().internal());
        let (old, old_old) = (vf.old_time().internal(), vf.old_old_time().internal());
        for (i, s) in fvm.source_mut().iter_mut().enumerate() {
            *s = r_delta_t * v[i] * (c.coefft0 * r0[i] * old[i] - c.coefft00 * r00[i] * old_old[i]);
        }
        Ok(fvm)
    }

    /// Explicit `ddt(vf)` from the stored time levels.
    pub fn fvc_ddt(&self, mesh: &FvMesh, time: &Time, vf: &VolScalarField) -> Result<VolScalarField> {
        let name = format!("ddt({})", vf.name());
        if *self == DdtScheme::SteadyState {
            return VolScalarField::calculated(name, mesh, vec![0.0; mesh.n_cells()]);
        }
        let r_delta_t = 1.0 / time.delta_t();
        let c = self.level_coeffs(time, vf);
        let (cur, old, old_old) = (
            vf.internal(),
            vf.old_time().internal(),
            vf.old_old_time().internal(),
        );
        let values = (0..mesh.n_cells())
            .map(|i| r_delta_t * (c.coefft * cur[i] - c.coefft0 * old[i] + c.coefft00 * old_old[i]))
            .collect();
        VolScalarField::calculated(name, mesh, values)
    }
}

impl FromStr for DdtScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "Euler" => Ok(DdtScheme::Euler),
            "backward" => Ok(DdtScheme::Backward),
            "steadyState" => Ok(DdtScheme::SteadyState),
            other => Err(Error::Scheme(format!(
                "unknown ddt scheme {}, valid schemes are: {}",
                other,
                DDT_SCHEMES.join(", ")
            ))),
        }
    }
}

impl fmt::Display for DdtScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DdtScheme::Euler => "Euler",
            DdtScheme::Backward => "backward",
            DdtScheme::SteadyState => "steadyState",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_mesh::BlockMesh;
    use crate::time::TimeConfig;
    use approx::assert_relative_eq;

    fn setup() -> (FvMesh, Time) {
        let mesh = BlockMesh::new([2, 1, 1], [1.0, 1.0, 1.0]).build().unwrap();
        let time = Time::new(TimeConfig::new(0.0, 1.0, 0.1)).unwrap();
        (mesh, time)
    }

    #[test]
    fn test_parse() {
        assert_eq!("backward".parse::<DdtScheme>().unwrap(), DdtScheme::Backward);
        let err = "CrankNicolson 0.9".parse::<DdtScheme>().unwrap_err().to_string();
        assert!(err.contains("Euler, backward, steadyState"));
    }

    #[test]
    fn test_euler() {
        let (mesh, mut time) = setup();
        let mut t = VolScalarField::uniform("T", &mesh, 2.0);
        time.advance();
        t.store_old_times(time.time_index());
        t.internal_mut().fill(3.0);

        let m = DdtScheme::Euler.fvm_ddt(&mesh, &time, &t).unwrap();
        // V = 0.5, dt = 0.1
        assert_relative_eq!(m.ldu().diag()[0], 5.0, max_relative = 1e-12);
        assert_relative_eq!(m.source()[0], 10.0, max_relative = 1e-12);
        assert!(!m.ldu().has_upper());

        let d = DdtScheme::Euler.fvc_ddt(&mesh, &time, &t).unwrap();
        assert_relative_eq!(d.internal()[1], 10.0, max_relative = 1e-12);
    }

    #[test]
    fn test_backward_starts_as_euler() {
        let (mesh, mut time) = setup();
        let mut t = VolScalarField::uniform("T", &mesh, 2.0);
        time.advance();
        t.store_old_times(time.time_index());

        let euler = DdtScheme::Euler.fvm_ddt(&mesh, &time, &t).unwrap();
        let backward = DdtScheme::Backward.fvm_ddt(&mesh, &time, &t).unwrap();
        assert_relative_eq!(euler.ldu().diag()[0], backward.ldu().diag()[0], max_relative = 1e-12);
        assert_relative_eq!(euler.source()[0], backward.source()[0], max_relative = 1e-12);
    }

    #[test]
    fn test_backward_second_order_coefficients() {
        let (mesh, mut time) = setup();
        let mut t = VolScalarField::uniform("T", &mesh, 0.0);
        // T = t^2 sampled at 0.1, 0.2; derivative at 0.3 is exactly 0.6
        for value in [0.01, 0.04] {
            time.advance();
            t.store_old_times(time.time_index());
            t.internal_mut().fill(value);
        }
        time.advance();
        t.store_old_times(time.time_index());
        t.internal_mut().fill(0.09);

        let d = DdtScheme::Backward.fvc_ddt(&mesh, &time, &t).unwrap();
        assert_relative_eq!(d.internal()[0], 0.6, max_relative = 1e-10);

        let m = DdtScheme::Backward.fvm_ddt(&mesh, &time, &t).unwrap();
        // Equal steps: 1.5 V / dt on the diagonal
        assert_relative_eq!(m.ldu().diag()[0], 1.5 * 0.5 / 0.1, max_relative = 1e-12);
    }

    #[test]
    fn test_rho_and_steady_state() {
        let (mesh, mut time) = setup();
        let mut rho = VolScalarField::uniform("rho", &mesh, 2.0);
        let mut t = VolScalarField::uniform("T", &mesh, 1.0);
        time.advance();
        rho.store_old_times(time.time_index());
        t.store_old_times(time.time_index());
        rho.internal_mut().fill(4.0);

        let m = DdtScheme::Euler.fvm_ddt_rho(&mesh, &time, &rho, &t).unwrap();
        assert_relative_eq!(m.ldu().diag()[0], 4.0 * 0.5 / 0.1, max_relative = 1e-12);
        assert_relative_eq!(m.source()[0], 2.0 * 0.5 / 0.1, max_relative = 1e-12);

        let steady = DdtScheme::SteadyState.fvm_ddt(&mesh, &time, &t).unwrap();
        assert!(!steady.ldu().has_diag());
        assert!(steady.source().iter().all(|s| *s == 0.0));
    }
}
