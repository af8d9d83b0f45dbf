//! Gauss Laplacian scheme: `div(gamma grad(vf))` as a sum of face-normal gradients.

use super::interpolation::InterpolationScheme;
use super::sn_grad::SnGradScheme;
use crate::error::{Error, Result};
use crate::field::{SurfaceScalarField, VolScalarField};
use crate::fv_matrix::FvMatrix;
use crate::fvc;
use crate::mesh::FvMesh;
use std::fmt;
use std::str::FromStr;

/// Gauss Laplacian: interpolation for the diffusivity plus a surface-normal gradient scheme.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaplacianScheme {
    pub interpolation: InterpolationScheme,
    pub sn_grad: SnGradScheme,
}

impl LaplacianScheme {
    pub fn new(interpolation: InterpolationScheme, sn_grad: SnGradScheme) -> Self {
        Self { interpolation, sn_grad }
    }

    /// `gamma_f |Sf|` on every face.
    fn gamma_mag_sf(mesh: &FvMesh, gamma: &SurfaceScalarField) -> Result<SurfaceScalarField> {
        gamma.check_mesh(mesh)?;
        let internal = gamma
            .internal()
            .iter()
            .zip(mesh.mag_face_areas())
            .map(|(g, a)| g * a)
            .collect();
        let boundary = (0..mesh.patches().len())
            .map(|index| {
                gamma
                    .boundary(index)
                    .iter()
                    .zip(mesh.patch_mag_face_areas(index))
                    .map(|(g, a)| g * a)
                    .collect()
            })
            .collect();
        Ok(SurfaceScalarField::new(
            format!("{}*magSf", gamma.name()),
            internal,
            boundary,
        ))
    }

    /// Implicit Laplacian with a face diffusivity.
    pub fn fvm_laplacian<'a>(
        &self,
        mesh: &'a FvMesh,
        gamma: &SurfaceScalarField,
        vf: &VolScalarField,
    ) -> Result<FvMatrix<'a>> {
        let g = Self::gamma_mag_sf(mesh, gamma)?;
        let (dc, patch_dc) = self.sn_grad.delta_coeffs(mesh);

        let mut fvm = FvMatrix::new(mesh, vf);
        *fvm.ldu_mut().upper_mut() = dc.iter().zip(g.internal()).map(|(d, g)| d * g).collect();
        fvm.ldu_mut().neg_sum_diag();

        for (index, patch) in mesh.patches().iter().enumerate() {
            let pg = g.boundary(index);
            let (internal, boundary): (Vec<f64>, Vec<f64>) = if patch.coupled() {
                let pdc = patch_dc[index];
                (0..patch.size())
                    .map(|i| (-pg[i] * pdc[i], -pg[i] * pdc[i]))
                    .unzip()
            } else {
                let pf = vf.boundary_field(index);
                let gic = pf.gradient_internal_coeffs(patch)?;
                let gbc = pf.gradient_boundary_coeffs(patch)?;
                (0..patch.size())
                    .map(|i| (pg[i] * gic[i], -pg[i] * gbc[i]))
                    .unzip()
            };
            fvm.internal_coeffs_mut()[index] = internal;
            fvm.boundary_coeffs_mut()[index] = boundary;
        }

        if let Some(correction) = self.sn_grad.correction(mesh, vf)? {
            let flux = g.mul(&correction);
            let div = fvc::surface_integrate(mesh, &flux)?;
            for ((s, d), v) in fvm.source_mut().iter_mut().zip(&div).zip(mesh.cell_volumes()) {
                *s -= v * d;
            }
            fvm.set_face_flux_correction(Some(flux));
        }
        Ok(fvm)
    }

    /// Implicit Laplacian with a cell diffusivity interpolated to the faces.
    pub fn fvm_laplacian_vol<'a>(
        &self,
        mesh: &'a FvMesh,
        gamma: &VolScalarField,
        vf: &VolScalarField,
    ) -> Result<FvMatrix<'a>> {
        let gamma_f = self.interpolation.interpolate(mesh, gamma, None)?;
        self.fvm_laplacian(mesh, &gamma_f, vf)
    }

    /// Explicit Laplacian.
    pub fn fvc_laplacian(
        &self,
        mesh: &FvMesh,
        gamma: &SurfaceScalarField,
        vf: &VolScalarField,
    ) -> Result<VolScalarField> {
        let g = Self::gamma_mag_sf(mesh, gamma)?;
        let flux = g.mul(&self.sn_grad.sn_grad(mesh, vf)?);
        VolScalarField::calculated(
            format!("laplacian({},{})", gamma.name(), vf.name()),
            mesh,
            fvc::surface_integrate(mesh, &flux)?,
        )
    }
}

impl FromStr for LaplacianScheme {
    type Err = Error;

    /// `Gauss <interpolation> <snGrad>`, e.g. `Gauss linear corrected`.
    fn from_str(s: &str) -> Result<Self> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        match tokens.as_slice() {
            ["Gauss", interpolation @ .., sn_grad] if !interpolation.is_empty() => Ok(Self {
                interpolation: InterpolationScheme::from_tokens(interpolation)?,
                sn_grad: sn_grad.parse()?,
            }),
            _ => Err(Error::Scheme(format!(
                "laplacian scheme {} should read Gauss <interpolation> <snGrad>",
                s
            ))),
        }
    }
}

impl fmt::Display for LaplacianScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gauss {} {}", self.interpolation, self.sn_grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_mesh::{BlockMesh, Side};
    use crate::boundary::PatchFieldConfig;
    use crate::mesh::PatchKind;
    use crate::solver::SolverControls;
    use crate::types::Axis;
    use approx::assert_relative_eq;

    fn scheme() -> LaplacianScheme {
        "Gauss linear corrected".parse().unwrap()
    }

    #[test]
    fn test_parse() {
        let s = scheme();
        assert_eq!(s.interpolation, InterpolationScheme::Linear);
        assert_eq!(s.sn_grad, SnGradScheme::Corrected);
        assert_eq!(s.to_string(), "Gauss linear corrected");
        assert!("Gauss corrected".parse::<LaplacianScheme>().is_err());
        assert!("linear corrected".parse::<LaplacianScheme>().is_err());
        assert!("Gauss linear limited".parse::<LaplacianScheme>().is_err());
    }

    #[test]
    fn test_coefficients() {
        let mesh = BlockMesh::new([3, 1, 1], [3.0, 1.0, 1.0]).build().unwrap();
        let t = VolScalarField::uniform("T", &mesh, 0.0);
        let gamma = SurfaceScalarField::uniform("DT", &mesh, 2.0);
        let m = scheme().fvm_laplacian(&mesh, &gamma, &t).unwrap();
        assert!(m.ldu().symmetric());
        assert_eq!(m.ldu().upper().as_ref(), &[2.0, 2.0]);
        assert_eq!(m.ldu().diag().as_ref(), &[-2.0, -4.0, -2.0]);
        assert!(m.face_flux_correction().is_some());
    }

    #[test]
    fn test_steady_conduction() {
        let mesh = BlockMesh::new([10, 1, 1], [1.0, 1.0, 1.0])
            .side(Side::Left, "hot", PatchKind::Patch)
            .side(Side::Right, "cold", PatchKind::Patch)
            .build()
            .unwrap();
        let mut t = VolScalarField::uniform("T", &mesh, 0.0)
            .with_patch(&mesh, "hot", &PatchFieldConfig::FixedValue { value: 1.0 })
            .unwrap()
            .with_patch(&mesh, "cold", &PatchFieldConfig::FixedValue { value: 0.0 })
            .unwrap();
        let gamma = SurfaceScalarField::uniform("DT", &mesh, 1.0);
        let mut eqn = -scheme().fvm_laplacian(&mesh, &gamma, &t).unwrap();
        let controls = SolverControls::new("PCG")
            .with_preconditioner("DIC")
            .with_tolerance(1e-12);
        eqn.solve(&mut t, &controls).unwrap();
        for (c, centre) in mesh.cell_centres().iter().enumerate() {
            assert_relative_eq!(t.internal()[c], 1.0 - centre.x, epsilon = 1e-8);
        }

        let lap = scheme().fvc_laplacian(&mesh, &gamma, &t).unwrap();
        assert!(lap.internal().iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_cyclic_coefficients() {
        let mesh = BlockMesh::new([4, 1, 1], [1.0, 1.0, 1.0]).cyclic(Axis::X).build().unwrap();
        let t = VolScalarField::uniform("T", &mesh, 1.0);
        let gamma = SurfaceScalarField::uniform("DT", &mesh, 1.0);
        let m = scheme().fvm_laplacian(&mesh, &gamma, &t).unwrap();
        let left = mesh.find_patch("left").unwrap();
        // Coupled patches contribute like an internal face of spacing 0.25
        assert_relative_eq!(m.internal_coeffs()[left][0], -4.0, epsilon = 1e-12);
        assert_relative_eq!(m.boundary_coeffs()[left][0], -4.0, epsilon = 1e-12);
    }
}
