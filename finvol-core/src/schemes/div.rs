//! Gauss convection scheme: `div(phi, vf)` as a sum of face fluxes times interpolated values.

use super::interpolation::{interpolate_with, InterpolationScheme};
use crate::error::{Error, Result};
use crate::field::{SurfaceScalarField, VolScalarField};
use crate::fv_matrix::FvMatrix;
use crate::fvc;
use crate::mesh::FvMesh;
use std::fmt;
use std::str::FromStr;

/// Gauss convection scheme.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvectionScheme {
    /// Subtract `div(phi) vf` so the operator stays bounded while the flux is not yet
    /// conservative (steady-state outer iterations).
    pub bounded: bool,
    pub interpolation: InterpolationScheme,
}

impl ConvectionScheme {
    pub fn new(interpolation: InterpolationScheme) -> Self {
        Self {
            bounded: false,
            interpolation,
        }
    }

    pub fn bounded(mut self) -> Self {
        self.bounded = true;
        self
    }

    /// Implicit convection of `vf` by the face flux `phi`.
    ///
    /// Flux-dependent boundary conditions (inletOutlet) should be updated with
    /// [`VolScalarField::update_coeffs`] before assembling.
    pub fn fvm_div<'a>(
        &self,
        mesh: &'a FvMesh,
        phi: &SurfaceScalarField,
        vf: &VolScalarField,
    ) -> Result<FvMatrix<'a>> {
        phi.check_mesh(mesh)?;
        let weights = self.interpolation.weights(mesh, vf, Some(phi))?;
        let w = weights.internal();
        let f = phi.internal();

        let mut fvm = FvMatrix::new(mesh, vf);
        let lower: Vec<f64> = (0..mesh.n_internal_faces()).map(|i| -w[i] * f[i]).collect();
        let upper: Vec<f64> = lower.iter().zip(f).map(|(l, f)| l + f).collect();
        *fvm.ldu_mut().lower_mut() = lower;
        *fvm.ldu_mut().upper_mut() = upper;
        fvm.ldu_mut().neg_sum_diag();

        for (index, patch) in mesh.patches().iter().enumerate() {
            let pf = phi.boundary(index);
            let (internal, boundary): (Vec<f64>, Vec<f64>) = if patch.coupled() {
                let pw = weights.boundary(index);
                (0..patch.size())
                    .map(|i| (pf[i] * pw[i], -pf[i] * (1.0 - pw[i])))
                    .unzip()
            } else {
                let bf = vf.boundary_field(index);
                let vic = bf.value_internal_coeffs(patch)?;
                let vbc = bf.value_boundary_coeffs(patch)?;
                (0..patch.size())
                    .map(|i| (pf[i] * vic[i], -pf[i] * vbc[i]))
                    .unzip()
            };
            fvm.internal_coeffs_mut()[index] = internal;
            fvm.boundary_coeffs_mut()[index] = boundary;
        }

        if self.bounded {
            let div_phi = fvc::surface_integrate(mesh, phi)?;
            let v = mesh.cell_volumes();
            let diag = fvm.ldu_mut().diag_mut();
            for i in 0..diag.len() {
                diag[i] -= v[i] * div_phi[i];
            }
        }
        Ok(fvm)
    }

    /// Explicit convection of `vf` by the face flux `phi`.
    pub fn fvc_div(&self, mesh: &FvMesh, phi: &SurfaceScalarField, vf: &VolScalarField) -> Result<VolScalarField> {
        let weights = self.interpolation.weights(mesh, vf, Some(phi))?;
        let face_values = interpolate_with(mesh, vf, &weights)?;
        let mut div = fvc::surface_integrate(mesh, &phi.mul(&face_values))?;
        if self.bounded {
            let div_phi = fvc::surface_integrate(mesh, phi)?;
            for ((d, dp), v) in div.iter_mut().zip(div_phi).zip(vf.internal()) {
                *d -= dp * v;
            }
        }
        VolScalarField::calculated(format!("div({},{})", phi.name(), vf.name()), mesh, div)
    }
}

impl FromStr for ConvectionScheme {
    type Err = Error;

    /// `[bounded] Gauss <interpolation>`, e.g. `Gauss limitedLinear 1`.
    fn from_str(s: &str) -> Result<Self> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        let (bounded, rest) = match tokens.split_first() {
            Some((&"bounded", rest)) => (true, rest),
            _ => (false, tokens.as_slice()),
        };
        match rest.split_first() {
            Some((&"Gauss", interpolation)) => Ok(Self {
                bounded,
                interpolation: InterpolationScheme::from_tokens(interpolation)?,
            }),
            _ => Err(Error::Scheme(format!(
                "div scheme {} should read [bounded] Gauss <interpolation>",
                s
            ))),
        }
    }
}

impl fmt::Display for ConvectionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bounded {
            write!(f, "bounded ")?;
        }
        write!(f, "Gauss {}", self.interpolation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_mesh::{BlockMesh, Side};
    use crate::boundary::PatchFieldConfig;
    use crate::mesh::PatchKind;
    use crate::solver::SolverControls;
    use approx::assert_relative_eq;

    fn channel(n: usize) -> (FvMesh, SurfaceScalarField) {
        let mesh = BlockMesh::new([n, 1, 1], [1.0, 1.0, 1.0])
            .side(Side::Left, "inlet", PatchKind::Patch)
            .side(Side::Right, "outlet", PatchKind::Patch)
            .build()
            .unwrap();
        let mut phi = SurfaceScalarField::uniform("phi", &mesh, 0.0);
        phi.internal_mut().fill(1.0);
        let inlet = mesh.find_patch("inlet").unwrap();
        let outlet = mesh.find_patch("outlet").unwrap();
        phi.boundary_mut(inlet).fill(-1.0);
        phi.boundary_mut(outlet).fill(1.0);
        (mesh, phi)
    }

    #[test]
    fn test_parse() {
        let s: ConvectionScheme = "bounded Gauss vanLeer".parse().unwrap();
        assert!(s.bounded);
        assert_eq!(s.interpolation, InterpolationScheme::VanLeer);
        assert_eq!(s.to_string(), "bounded Gauss vanLeer");
        assert!("Gauss".parse::<ConvectionScheme>().is_err());
        assert!("upwind".parse::<ConvectionScheme>().is_err());
    }

    #[test]
    fn test_upwind_coefficients() {
        let (mesh, phi) = channel(3);
        let t = VolScalarField::uniform("T", &mesh, 0.0);
        let m = ConvectionScheme::new(InterpolationScheme::Upwind)
            .fvm_div(&mesh, &phi, &t)
            .unwrap();
        assert_eq!(m.ldu().lower().as_ref(), &[-1.0, -1.0]);
        assert_eq!(m.ldu().upper().as_ref(), &[0.0, 0.0]);
        // Owner rows gain the outflow, neighbour rows lose nothing from upwind faces
        assert_eq!(m.ldu().diag().as_ref(), &[1.0, 1.0, 0.0]);
        let outlet = mesh.find_patch("outlet").unwrap();
        assert_eq!(m.internal_coeffs()[outlet], vec![1.0]);
    }

    #[test]
    fn test_upwind_transport_reaches_inlet_value() {
        let (mesh, phi) = channel(5);
        let mut t = VolScalarField::uniform("T", &mesh, 0.0)
            .with_patch(&mesh, "inlet", &PatchFieldConfig::FixedValue { value: 2.0 })
            .unwrap();
        let mut eqn = ConvectionScheme::new(InterpolationScheme::Upwind)
            .fvm_div(&mesh, &phi, &t)
            .unwrap();
        let controls = SolverControls::new("PBiCGStab")
            .with_preconditioner("DILU")
            .with_tolerance(1e-12);
        eqn.solve(&mut t, &controls).unwrap();
        assert!(t.internal().iter().all(|v| (v - 2.0).abs() < 1e-9));

        let div = ConvectionScheme::new(InterpolationScheme::Upwind)
            .fvc_div(&mesh, &phi, &t)
            .unwrap();
        assert!(div.internal().iter().all(|v| v.abs() < 1e-8));
    }

    #[test]
    fn test_bounded_removes_flux_imbalance() {
        let (mesh, mut phi) = channel(3);
        // Non-conservative flux: extra outflow through the last face
        let outlet = mesh.find_patch("outlet").unwrap();
        phi.boundary_mut(outlet).fill(2.0);
        let t = VolScalarField::uniform("T", &mesh, 1.0);
        let plain = ConvectionScheme::new(InterpolationScheme::Upwind);
        let div = plain.fvc_div(&mesh, &phi, &t).unwrap();
        assert_relative_eq!(div.internal()[2], 1.0 / (1.0 / 3.0), max_relative = 1e-12);
        let div = plain.bounded().fvc_div(&mesh, &phi, &t).unwrap();
        assert!(div.internal().iter().all(|v| v.abs() < 1e-12));
    }
}
