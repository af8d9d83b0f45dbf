//! Cell gradients by the Gauss theorem.

use crate::error::{Error, Result};
use crate::field::{coupled_neighbour_vectors, VolScalarField, VolVectorField};
use crate::mesh::FvMesh;
use crate::types::Vec3;
use std::fmt;
use std::str::FromStr;

/// Gradient scheme names.
pub const GRAD_SCHEMES: [&str; 1] = ["Gauss linear"];

/// Cell gradient scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradScheme {
    /// Surface sum of linearly interpolated face values.
    GaussLinear,
}

impl GradScheme {
    pub fn grad(&self, mesh: &FvMesh, vf: &VolScalarField) -> Result<VolVectorField> {
        match self {
            GradScheme::GaussLinear => gauss_grad(mesh, vf),
        }
    }
}

impl FromStr for GradScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        match tokens.as_slice() {
            ["Gauss", "linear"] => Ok(GradScheme::GaussLinear),
            _ => Err(Error::Scheme(format!(
                "unknown grad scheme {}, valid schemes are: {}",
                s,
                GRAD_SCHEMES.join(", ")
            ))),
        }
    }
}

impl fmt::Display for GradScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GradScheme::GaussLinear => write!(f, "Gauss linear"),
        }
    }
}

/// `sum(Sf phi_f) / V` with linear face values.
///
/// Boundary values on non-coupled patches take the patch-normal gradient from the boundary
/// condition and the tangential part from the cell; coupled patches interpolate.
pub fn gauss_grad(mesh: &FvMesh, vf: &VolScalarField) -> Result<VolVectorField> {
    let psi = vf.internal();
    let w = mesh.weights();
    let sf = mesh.face_areas();
    let mut grad = vec![Vec3::zeros(); mesh.n_cells()];

    for f in 0..mesh.n_internal_faces() {
        let (p, n) = (mesh.owner()[f], mesh.neighbour()[f]);
        let flux = sf[f] * (w[f] * psi[p] + (1.0 - w[f]) * psi[n]);
        grad[p] += flux;
        grad[n] -= flux;
    }

    let neighbours = vf.coupled_neighbour_values(mesh)?;
    for (index, patch) in mesh.patches().iter().enumerate() {
        if patch.is_empty_kind() {
            continue;
        }
        let psf = mesh.patch_face_areas(index);
        match &neighbours[index] {
            Some(nbr) => {
                let pw = patch.weights();
                for (i, &c) in patch.face_cells().iter().enumerate() {
                    grad[c] += psf[i] * (pw[i] * psi[c] + (1.0 - pw[i]) * nbr[i]);
                }
            }
            None => {
                let values = vf.boundary_values(index);
                for (i, &c) in patch.face_cells().iter().enumerate() {
                    grad[c] += psf[i] * values[i];
                }
            }
        }
    }

    for (g, v) in grad.iter_mut().zip(mesh.cell_volumes()) {
        *g /= *v;
    }

    let nbr_grads = coupled_neighbour_vectors(mesh, &grad)?;
    let mut boundary = Vec::with_capacity(mesh.patches().len());
    for (index, patch) in mesh.patches().iter().enumerate() {
        let values: Vec<Vec3> = match &nbr_grads[index] {
            Some(nbr) => {
                let pw = patch.weights();
                patch
                    .face_cells()
                    .iter()
                    .enumerate()
                    .map(|(i, &c)| grad[c] * pw[i] + nbr[i] * (1.0 - pw[i]))
                    .collect()
            }
            None if patch.is_empty_kind() => patch.face_cells().iter().map(|&c| grad[c]).collect(),
            None => {
                let sn_grad = vf.patch_sn_grad(mesh, index, None)?;
                patch
                    .face_cells()
                    .iter()
                    .zip(patch.nf())
                    .zip(sn_grad)
                    .map(|((&c, n), sg)| grad[c] + n * (sg - n.dot(&grad[c])))
                    .collect()
            }
        };
        boundary.push(values);
    }

    Ok(VolVectorField::new(format!("grad({})", vf.name()), grad, boundary))
}
