//! Cell-to-face interpolation schemes.
//!
//! Every scheme is expressed through face weights `w`: `phi_f = w phi_P + (1 - w) phi_N` where
//! `P` is the owner and `N` the neighbour cell. Flux-driven schemes take the face flux to pick
//! the upwind side.

use super::gradient::gauss_grad;
use crate::error::{Error, Result};
use crate::field::{coupled_neighbour_vectors, SurfaceScalarField, VolScalarField, VolVectorField};
use crate::mesh::FvMesh;
use crate::types::{Vec3, SMALL};
use std::fmt;
use std::str::FromStr;

/// Interpolation scheme names.
pub const INTERPOLATION_SCHEMES: [&str; 4] = ["linear", "upwind", "vanLeer", "limitedLinear"];

/// Bound on the gradient ratio used by the TVD limiters.
const MAX_GRADIENT_RATIO: f64 = 1000.0;

/// Face interpolation scheme.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InterpolationScheme {
    /// Distance-weighted central differencing.
    Linear,
    /// Upwind cell value.
    Upwind,
    /// TVD blend of linear and upwind with the van Leer limiter.
    VanLeer,
    /// TVD blend with the limitedLinear limiter; `k` in [0, 1] (0 is linear, 1 is most limited).
    LimitedLinear { k: f64 },
}

impl InterpolationScheme {
    /// True when the face flux is needed to evaluate the weights.
    pub fn needs_flux(&self) -> bool {
        !matches!(self, InterpolationScheme::Linear)
    }

    /// Parse from whitespace-separated tokens, e.g. `["limitedLinear", "1"]`.
    pub fn from_tokens(tokens: &[&str]) -> Result<Self> {
        let (name, args) = tokens
            .split_first()
            .ok_or_else(|| Error::Scheme("missing interpolation scheme".into()))?;
        let scheme = match *name {
            "linear" => InterpolationScheme::Linear,
            "upwind" => InterpolationScheme::Upwind,
            "vanLeer" => InterpolationScheme::VanLeer,
            "limitedLinear" => {
                let k: f64 = args
                    .first()
                    .ok_or_else(|| Error::Scheme("limitedLinear needs a coefficient".into()))?
                    .parse()
                    .map_err(|e| Error::Scheme(format!("limitedLinear coefficient: {}", e)))?;
                if !(0.0..=1.0).contains(&k) {
                    return Err(Error::Scheme(format!(
                        "limitedLinear coefficient = {} should be >= 0 and <= 1",
                        k
                    )));
                }
                return Ok(InterpolationScheme::LimitedLinear { k });
            }
            other => {
                return Err(Error::Scheme(format!(
                    "unknown interpolation scheme {}, valid schemes are: {}",
                    other,
                    INTERPOLATION_SCHEMES.join(", ")
                )))
            }
        };
        if !args.is_empty() {
            return Err(Error::Scheme(format!(
                "unexpected arguments {:?} for interpolation scheme {}",
                args, name
            )));
        }
        Ok(scheme)
    }

    /// Face weights for interpolating `vf`.
    pub fn weights(&self, mesh: &FvMesh, vf: &VolScalarField, phi: Option<&SurfaceScalarField>) -> Result<SurfaceScalarField> {
        let flux = || {
            phi.ok_or_else(|| Error::Scheme(format!("interpolation scheme {} needs a face flux", self)))
        };
        match *self {
            InterpolationScheme::Linear => Ok(linear_weights(mesh)),
            InterpolationScheme::Upwind => upwind_weights(mesh, flux()?),
            InterpolationScheme::VanLeer => limited_weights(mesh, vf, flux()?, van_leer),
            InterpolationScheme::LimitedLinear { k } => {
                let two_by_k = 2.0 / (0.5 * k).max(SMALL);
                limited_weights(mesh, vf, flux()?, move |r| (two_by_k * r).min(1.0).max(0.0))
            }
        }
    }

    /// Face values of `vf`.
    pub fn interpolate(&self, mesh: &FvMesh, vf: &VolScalarField, phi: Option<&SurfaceScalarField>) -> Result<SurfaceScalarField> {
        let weights = self.weights(mesh, vf, phi)?;
        interpolate_with(mesh, vf, &weights)
    }
}

impl FromStr for InterpolationScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        Self::from_tokens(&tokens)
    }
}

impl fmt::Display for InterpolationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpolationScheme::Linear => write!(f, "linear"),
            InterpolationScheme::Upwind => write!(f, "upwind"),
            InterpolationScheme::VanLeer => write!(f, "vanLeer"),
            InterpolationScheme::LimitedLinear { k } => write!(f, "limitedLinear {}", k),
        }
    }
}

/// Geometric weights of the mesh.
pub fn linear_weights(mesh: &FvMesh) -> SurfaceScalarField {
    SurfaceScalarField::new(
        "weights",
        mesh.weights().to_vec(),
        mesh.patches().iter().map(|p| p.weights().to_vec()).collect(),
    )
}

fn pos0(v: f64) -> f64 {
    if v >= 0.0 {
        1.0
    } else {
        0.0
    }
}

fn upwind_weights(mesh: &FvMesh, phi: &SurfaceScalarField) -> Result<SurfaceScalarField> {
    phi.check_mesh(mesh)?;
    let boundary = mesh
        .patches()
        .iter()
        .enumerate()
        .map(|(index, patch)| {
            if patch.coupled() {
                phi.boundary(index).iter().map(|&f| pos0(f)).collect()
            } else {
                patch.weights().to_vec()
            }
        })
        .collect();
    Ok(SurfaceScalarField::new(
        "upwindWeights",
        phi.internal().iter().map(|&f| pos0(f)).collect(),
        boundary,
    ))
}

fn van_leer(r: f64) -> f64 {
    (r + r.abs()) / (1.0 + r.abs())
}

/// Gradient ratio of the TVD limiters.
fn gradient_ratio(face_flux: f64, phi_p: f64, phi_n: f64, grad_p: &Vec3, grad_n: &Vec3, d: &Vec3) -> f64 {
    let gradf = phi_n - phi_p;
    let gradcf = if face_flux > 0.0 { d.dot(grad_p) } else { d.dot(grad_n) };
    if gradcf.abs() >= MAX_GRADIENT_RATIO * gradf.abs() {
        2.0 * MAX_GRADIENT_RATIO * gradcf.signum() * signum(gradf) - 1.0
    } else {
        2.0 * (gradcf / gradf) - 1.0
    }
}

/// Sign with `sign(0) = 1`.
fn signum(v: f64) -> f64 {
    if v >= 0.0 {
        1.0
    } else {
        -1.0
    }
}

/// `limiter * linear + (1 - limiter) * upwind`; the limiter is 1 on non-coupled patches.
fn limited_weights(
    mesh: &FvMesh,
    vf: &VolScalarField,
    phi: &SurfaceScalarField,
    limiter: impl Fn(f64) -> f64,
) -> Result<SurfaceScalarField> {
    phi.check_mesh(mesh)?;
    let grad = gauss_grad(mesh, vf)?;
    let psi = vf.internal();
    let gc = grad.internal();
    let centres = mesh.cell_centres();

    let internal: Vec<f64> = (0..mesh.n_internal_faces())
        .map(|f| {
            let (p, n) = (mesh.owner()[f], mesh.neighbour()[f]);
            let d = centres[n] - centres[p];
            let r = gradient_ratio(phi.internal()[f], psi[p], psi[n], &gc[p], &gc[n], &d);
            let lim = limiter(r);
            lim * mesh.weights()[f] + (1.0 - lim) * pos0(phi.internal()[f])
        })
        .collect();

    let nbr_values = vf.coupled_neighbour_values(mesh)?;
    let nbr_grads = coupled_neighbour_vectors(mesh, gc)?;
    let mut boundary = Vec::with_capacity(mesh.patches().len());
    for (index, patch) in mesh.patches().iter().enumerate() {
        let pphi = phi.boundary(index);
        let weights = match (&nbr_values[index], &nbr_grads[index]) {
            (Some(pn), Some(gn)) => patch
                .face_cells()
                .iter()
                .enumerate()
                .map(|(i, &c)| {
                    let r = gradient_ratio(pphi[i], psi[c], pn[i], &gc[c], &gn[i], &patch.delta()[i]);
                    let lim = limiter(r);
                    lim * patch.weights()[i] + (1.0 - lim) * pos0(pphi[i])
                })
                .collect(),
            _ => patch.weights().to_vec(),
        };
        boundary.push(weights);
    }

    Ok(SurfaceScalarField::new("limitedWeights", internal, boundary))
}

/// Face values of `vf` for given weights. Non-coupled patches take the boundary values.
pub fn interpolate_with(mesh: &FvMesh, vf: &VolScalarField, weights: &SurfaceScalarField) -> Result<SurfaceScalarField> {
    weights.check_mesh(mesh)?;
    let psi = vf.internal();
    let w = weights.internal();
    let internal: Vec<f64> = (0..mesh.n_internal_faces())
        .map(|f| w[f] * psi[mesh.owner()[f]] + (1.0 - w[f]) * psi[mesh.neighbour()[f]])
        .collect();

    let neighbours = vf.coupled_neighbour_values(mesh)?;
    let boundary = mesh
        .patches()
        .iter()
        .enumerate()
        .map(|(index, patch)| match &neighbours[index] {
            Some(nbr) => {
                let pw = weights.boundary(index);
                patch
                    .face_cells()
                    .iter()
                    .enumerate()
                    .map(|(i, &c)| pw[i] * psi[c] + (1.0 - pw[i]) * nbr[i])
                    .collect()
            }
            None => vf.boundary_values(index).to_vec(),
        })
        .collect();

    Ok(SurfaceScalarField::new(
        format!("interpolate({})", vf.name()),
        internal,
        boundary,
    ))
}

/// Linear interpolation of a vector field. Non-coupled patches take the patch values.
pub fn interpolate_vector(mesh: &FvMesh, vf: &VolVectorField) -> Result<Vec<Vec3>> {
    let u = vf.internal();
    let w = mesh.weights();
    let mut faces: Vec<Vec3> = (0..mesh.n_internal_faces())
        .map(|f| u[mesh.owner()[f]] * w[f] + u[mesh.neighbour()[f]] * (1.0 - w[f]))
        .collect();

    let neighbours = coupled_neighbour_vectors(mesh, u)?;
    for (index, patch) in mesh.patches().iter().enumerate() {
        match &neighbours[index] {
            Some(nbr) => {
                let pw = patch.weights();
                faces.extend(
                    patch
                        .face_cells()
                        .iter()
                        .enumerate()
                        .map(|(i, &c)| u[c] * pw[i] + nbr[i] * (1.0 - pw[i])),
                );
            }
            None => faces.extend_from_slice(vf.boundary(index)),
        }
    }
    Ok(faces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_mesh::BlockMesh;
    use approx::assert_relative_eq;

    fn line(n: usize) -> FvMesh {
        BlockMesh::new([n, 1, 1], [1.0, 1.0, 1.0]).build().unwrap()
    }

    #[test]
    fn test_parse() {
        assert_eq!("linear".parse::<InterpolationScheme>().unwrap(), InterpolationScheme::Linear);
        assert_eq!(
            "limitedLinear 0.5".parse::<InterpolationScheme>().unwrap(),
            InterpolationScheme::LimitedLinear { k: 0.5 }
        );
        let err = "quick".parse::<InterpolationScheme>().unwrap_err().to_string();
        assert!(err.contains("vanLeer"));
        assert!("limitedLinear 2".parse::<InterpolationScheme>().is_err());
        assert!("limitedLinear".parse::<InterpolationScheme>().is_err());
        assert!("upwind phi".parse::<InterpolationScheme>().is_err());
    }

    #[test]
    fn test_linear_interpolation_of_linear_field() {
        let mesh = line(5);
        let values: Vec<f64> = mesh.cell_centres().iter().map(|c| 2.0 * c.x).collect();
        let t = VolScalarField::from_values("T", &mesh, values).unwrap();
        let tf = InterpolationScheme::Linear.interpolate(&mesh, &t, None).unwrap();
        for f in 0..mesh.n_internal_faces() {
            assert_relative_eq!(tf.internal()[f], 2.0 * mesh.face_centres()[f].x, epsilon = 1e-12);
        }
        assert!(InterpolationScheme::Upwind.interpolate(&mesh, &t, None).is_err());
    }

    #[test]
    fn test_upwind_follows_flux() {
        let mesh = line(3);
        let t = VolScalarField::from_values("T", &mesh, vec![1.0, 2.0, 3.0]).unwrap();
        let mut phi = SurfaceScalarField::uniform("phi", &mesh, 0.0);
        phi.internal_mut().copy_from_slice(&[1.0, -1.0]);
        let tf = InterpolationScheme::Upwind.interpolate(&mesh, &t, Some(&phi)).unwrap();
        assert_eq!(tf.internal(), &[1.0, 3.0]);
    }

    #[test]
    fn test_limiters() {
        assert_relative_eq!(van_leer(1.0), 1.0);
        assert_relative_eq!(van_leer(-1.0), 0.0);
        assert_relative_eq!(van_leer(3.0), 1.5);
        // Smooth profile: r = 1 at uniform gradient
        let d = Vec3::new(1.0, 0.0, 0.0);
        let g = Vec3::new(2.0, 0.0, 0.0);
        assert_relative_eq!(gradient_ratio(1.0, 0.0, 2.0, &g, &g, &d), 1.0);
        // Flat face difference is capped
        assert_relative_eq!(gradient_ratio(1.0, 0.0, 0.0, &g, &g, &d), 1999.0);
    }

    #[test]
    fn test_tvd_is_linear_on_smooth_and_upwind_at_extrema() {
        let mesh = line(6);
        let phi = SurfaceScalarField::uniform("phi", &mesh, 1.0);

        let smooth: Vec<f64> = mesh.cell_centres().iter().map(|c| c.x).collect();
        let t = VolScalarField::from_values("T", &mesh, smooth).unwrap();
        let w = InterpolationScheme::VanLeer.weights(&mesh, &t, Some(&phi)).unwrap();
        // Interior faces away from the boundaries see r = 1
        for f in 1..mesh.n_internal_faces() - 1 {
            assert_relative_eq!(w.internal()[f], mesh.weights()[f], epsilon = 1e-12);
        }

        let spike = VolScalarField::from_values("T", &mesh, vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0]).unwrap();
        let w = InterpolationScheme::LimitedLinear { k: 1.0 }
            .weights(&mesh, &spike, Some(&phi))
            .unwrap();
        // Face downstream of the peak: upwind
        assert_relative_eq!(w.internal()[2], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_interpolate_vector() {
        let mesh = line(4);
        let u = VolVectorField::uniform("U", &mesh, Vec3::new(1.0, 2.0, 3.0));
        let faces = interpolate_vector(&mesh, &u).unwrap();
        assert_eq!(faces.len(), mesh.n_faces());
        assert!(faces.iter().all(|f| (f - Vec3::new(1.0, 2.0, 3.0)).norm() < 1e-12));
    }
}
