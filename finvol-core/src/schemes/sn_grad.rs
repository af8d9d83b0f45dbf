//! Face-normal gradient schemes.

use super::gradient::gauss_grad;
use crate::error::{Error, Result};
use crate::field::{coupled_neighbour_vectors, SurfaceScalarField, VolScalarField};
use crate::mesh::FvMesh;
use std::fmt;
use std::str::FromStr;

/// Surface-normal gradient scheme names.
pub const SN_GRAD_SCHEMES: [&str; 3] = ["corrected", "uncorrected", "orthogonal"];

/// Surface-normal gradient scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnGradScheme {
    /// Non-orthogonal delta coefficients plus an explicit correction.
    Corrected,
    /// Non-orthogonal delta coefficients, no correction.
    Uncorrected,
    /// Plain `1 / |d|` delta coefficients.
    Orthogonal,
}

impl SnGradScheme {
    pub fn corrected(&self) -> bool {
        matches!(self, SnGradScheme::Corrected)
    }

    /// Delta coefficients of the internal faces and of each patch.
    pub fn delta_coeffs<'m>(&self, mesh: &'m FvMesh) -> (&'m [f64], Vec<&'m [f64]>) {
        match self {
            SnGradScheme::Orthogonal => (
                mesh.delta_coeffs(),
                mesh.patches().iter().map(|p| p.delta_coeffs()).collect(),
            ),
            _ => (
                mesh.non_orth_delta_coeffs(),
                mesh.patches().iter().map(|p| p.non_orth_delta_coeffs()).collect(),
            ),
        }
    }

    /// Explicit non-orthogonal correction `k . (grad vf)_f`, when the scheme has one.
    pub fn correction(&self, mesh: &FvMesh, vf: &VolScalarField) -> Result<Option<SurfaceScalarField>> {
        if !self.corrected() {
            return Ok(None);
        }
        let grad = gauss_grad(mesh, vf)?;
        let g = grad.internal();
        let w = mesh.weights();
        let k = mesh.corr_vecs();
        let internal: Vec<f64> = (0..mesh.n_internal_faces())
            .map(|f| {
                let gf = g[mesh.owner()[f]] * w[f] + g[mesh.neighbour()[f]] * (1.0 - w[f]);
                k[f].dot(&gf)
            })
            .collect();

        let nbr_grads = coupled_neighbour_vectors(mesh, g)?;
        let boundary = mesh
            .patches()
            .iter()
            .enumerate()
            .map(|(index, patch)| match &nbr_grads[index] {
                Some(nbr) => {
                    let pw = patch.weights();
                    patch
                        .face_cells()
                        .iter()
                        .enumerate()
                        .map(|(i, &c)| patch.corr_vecs()[i].dot(&(g[c] * pw[i] + nbr[i] * (1.0 - pw[i]))))
                        .collect()
                }
                None => vec![0.0; patch.size()],
            })
            .collect();

        Ok(Some(SurfaceScalarField::new(
            format!("snGradCorr({})", vf.name()),
            internal,
            boundary,
        )))
    }

    /// Face-normal gradient of `vf`; boundary conditions supply the non-coupled patches.
    pub fn sn_grad(&self, mesh: &FvMesh, vf: &VolScalarField) -> Result<SurfaceScalarField> {
        let (dc, patch_dc) = self.delta_coeffs(mesh);
        let psi = vf.internal();
        let mut internal: Vec<f64> = (0..mesh.n_internal_faces())
            .map(|f| dc[f] * (psi[mesh.neighbour()[f]] - psi[mesh.owner()[f]]))
            .collect();

        let neighbours = vf.coupled_neighbour_values(mesh)?;
        let mut boundary = Vec::with_capacity(mesh.patches().len());
        for (index, patch) in mesh.patches().iter().enumerate() {
            let values = match &neighbours[index] {
                Some(nbr) => patch
                    .face_cells()
                    .iter()
                    .enumerate()
                    .map(|(i, &c)| patch_dc[index][i] * (nbr[i] - psi[c]))
                    .collect(),
                None => vf.patch_sn_grad(mesh, index, None)?,
            };
            boundary.push(values);
        }

        if let Some(correction) = self.correction(mesh, vf)? {
            for (s, c) in internal.iter_mut().zip(correction.internal()) {
                *s += c;
            }
            for (index, values) in boundary.iter_mut().enumerate() {
                for (s, c) in values.iter_mut().zip(correction.boundary(index)) {
                    *s += c;
                }
            }
        }

        Ok(SurfaceScalarField::new(format!("snGrad({})", vf.name()), internal, boundary))
    }
}

impl FromStr for SnGradScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "corrected" => Ok(SnGradScheme::Corrected),
            "uncorrected" => Ok(SnGradScheme::Uncorrected),
            "orthogonal" => Ok(SnGradScheme::Orthogonal),
            other => Err(Error::Scheme(format!(
                "unknown snGrad scheme {}, valid schemes are: {}",
                other,
                SN_GRAD_SCHEMES.join(", ")
            ))),
        }
    }
}

impl fmt::Display for SnGradScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SnGradScheme::Corrected => "corrected",
            SnGradScheme::Uncorrected => "uncorrected",
            SnGradScheme::Orthogonal => "orthogonal",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_mesh::BlockMesh;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse() {
        assert_eq!("corrected".parse::<SnGradScheme>().unwrap(), SnGradScheme::Corrected);
        let err = "limited 0.5".parse::<SnGradScheme>().unwrap_err().to_string();
        assert!(err.contains("uncorrected"));
    }

    #[test]
    fn test_sn_grad_of_linear_field() {
        let mesh = BlockMesh::new([5, 1, 1], [1.0, 1.0, 1.0]).build().unwrap();
        let values: Vec<f64> = mesh.cell_centres().iter().map(|c| 4.0 * c.x).collect();
        let t = VolScalarField::from_values("T", &mesh, values).unwrap();
        for scheme in [SnGradScheme::Corrected, SnGradScheme::Uncorrected, SnGradScheme::Orthogonal] {
            let sg = scheme.sn_grad(&mesh, &t).unwrap();
            for v in sg.internal() {
                assert_relative_eq!(*v, 4.0, epsilon = 1e-10);
            }
            // Zero-gradient walls
            assert!(sg.boundary(0).iter().all(|v| v.abs() < 1e-12));
        }
    }

    #[test]
    fn test_orthogonal_mesh_has_no_correction() {
        let mesh = BlockMesh::new([3, 2, 1], [1.0, 1.0, 1.0]).build().unwrap();
        let t = VolScalarField::from_values("T", &mesh, (0..6).map(|i| i as f64).collect()).unwrap();
        let corr = SnGradScheme::Corrected.correction(&mesh, &t).unwrap().unwrap();
        assert!(corr.internal().iter().all(|v| v.abs() < 1e-12));
        assert!(SnGradScheme::Uncorrected.correction(&mesh, &t).unwrap().is_none());
    }
}
