//! Explicit finite-volume calculus: operators evaluated from current field values.
//!
//! Scheme-dependent operators look their scheme up in [`FvSchemes`] under the usual
//! operator key, e.g. `grad(T)` or `div(phi,T)`.

use crate::error::Result;
use crate::field::{SurfaceScalarField, VolScalarField, VolVectorField};
use crate::mesh::FvMesh;
use crate::schemes::{interpolation, FvSchemes};
use crate::time::Time;

/// Signed sum of face values per cell divided by the cell volume (the discrete divergence).
///
/// Owner cells gain, neighbour cells lose the face value; empty patches are skipped.
pub fn surface_integrate(mesh: &FvMesh, ssf: &SurfaceScalarField) -> Result<Vec<f64>> {
    ssf.check_mesh(mesh)?;
    let mut result = vec![0.0; mesh.n_cells()];
    for (f, v) in ssf.internal().iter().enumerate() {
        result[mesh.owner()[f]] += v;
        result[mesh.neighbour()[f]] -= v;
    }
    for (index, patch) in mesh.patches().iter().enumerate() {
        if patch.is_empty_kind() {
            continue;
        }
        for (&c, v) in patch.face_cells().iter().zip(ssf.boundary(index)) {
            result[c] += v;
        }
    }
    for (r, v) in result.iter_mut().zip(mesh.cell_volumes()) {
        *r /= v;
    }
    Ok(result)
}

/// Unsigned sum of face values per cell.
pub fn surface_sum(mesh: &FvMesh, ssf: &SurfaceScalarField) -> Result<Vec<f64>> {
    ssf.check_mesh(mesh)?;
    let mut result = vec![0.0; mesh.n_cells()];
    for (f, v) in ssf.internal().iter().enumerate() {
        result[mesh.owner()[f]] += v;
        result[mesh.neighbour()[f]] += v;
    }
    for (index, patch) in mesh.patches().iter().enumerate() {
        if patch.is_empty_kind() {
            continue;
        }
        for (&c, v) in patch.face_cells().iter().zip(ssf.boundary(index)) {
            result[c] += v;
        }
    }
    Ok(result)
}

/// Divergence of a face flux.
pub fn div_flux(mesh: &FvMesh, phi: &SurfaceScalarField) -> Result<VolScalarField> {
    VolScalarField::calculated(format!("div({})", phi.name()), mesh, surface_integrate(mesh, phi)?)
}

/// Face values of `vf`; flux-driven schemes need `phi`.
pub fn interpolate(
    mesh: &FvMesh,
    schemes: &FvSchemes,
    vf: &VolScalarField,
    phi: Option<&SurfaceScalarField>,
) -> Result<SurfaceScalarField> {
    schemes
        .interpolation(&format!("interpolate({})", vf.name()))?
        .interpolate(mesh, vf, phi)
}

/// Face-normal gradient of `vf`.
pub fn sn_grad(mesh: &FvMesh, schemes: &FvSchemes, vf: &VolScalarField) -> Result<SurfaceScalarField> {
    schemes
        .sn_grad(&format!("snGrad({})", vf.name()))?
        .sn_grad(mesh, vf)
}

/// Cell gradient of `vf`.
pub fn grad(mesh: &FvMesh, schemes: &FvSchemes, vf: &VolScalarField) -> Result<VolVectorField> {
    schemes.grad(&format!("grad({})", vf.name()))?.grad(mesh, vf)
}

/// Volumetric face flux `Sf . U_f` of a velocity field.
pub fn flux(mesh: &FvMesh, u: &VolVectorField) -> Result<SurfaceScalarField> {
    let uf = interpolation::interpolate_vector(mesh, u)?;
    let n_internal = mesh.n_internal_faces();
    let internal = (0..n_internal)
        .map(|f| mesh.face_areas()[f].dot(&uf[f]))
        .collect();
    let boundary = mesh
        .patches()
        .iter()
        .enumerate()
        .map(|(index, patch)| {
            if patch.is_empty_kind() {
                return vec![0.0; patch.size()];
            }
            mesh.patch_face_areas(index)
                .iter()
                .zip(&uf[patch.range()])
                .map(|(sf, u)| sf.dot(u))
                .collect()
        })
        .collect();
    Ok(SurfaceScalarField::new("phi", internal, boundary))
}

/// Global sum of `vf V`.
pub fn domain_integrate(mesh: &FvMesh, vf: &VolScalarField) -> Result<f64> {
    let local = vf
        .internal()
        .iter()
        .zip(mesh.cell_volumes())
        .map(|(v, vol)| v * vol)
        .sum();
    mesh.comm().sum(local)
}

/// Explicit time derivative of `vf`.
pub fn ddt(mesh: &FvMesh, time: &Time, schemes: &FvSchemes, vf: &VolScalarField) -> Result<VolScalarField> {
    schemes
        .ddt(&format!("ddt({})", vf.name()))?
        .fvc_ddt(mesh, time, vf)
}

/// Explicit Laplacian with a face diffusivity.
pub fn laplacian(
    mesh: &FvMesh,
    schemes: &FvSchemes,
    gamma: &SurfaceScalarField,
    vf: &VolScalarField,
) -> Result<VolScalarField> {
    schemes
        .laplacian(&format!("laplacian({},{})", gamma.name(), vf.name()))?
        .fvc_laplacian(mesh, gamma, vf)
}

/// Explicit convection of `vf` by `phi`.
pub fn div(
    mesh: &FvMesh,
    schemes: &FvSchemes,
    phi: &SurfaceScalarField,
    vf: &VolScalarField,
) -> Result<VolScalarField> {
    schemes
        .div(&format!("div({},{})", phi.name(), vf.name()))?
        .fvc_div(mesh, phi, vf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_mesh::BlockMesh;
    use crate::types::Vec3;
    use approx::assert_relative_eq;

    #[test]
    fn test_flux_of_uniform_velocity_is_divergence_free() {
        let mesh = BlockMesh::new([3, 2, 1], [3.0, 1.0, 1.0]).two_dimensional().build().unwrap();
        let u = VolVectorField::uniform("U", &mesh, Vec3::new(1.0, 0.5, 0.0));
        let phi = flux(&mesh, &u).unwrap();
        // x faces have area 0.5, y faces area 1
        for v in phi.internal() {
            assert_relative_eq!(*v, 0.5, max_relative = 1e-12);
        }
        let div = div_flux(&mesh, &phi).unwrap();
        assert!(div.internal().iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_surface_sum_and_integrate() {
        let mesh = BlockMesh::new([2, 1, 1], [2.0, 1.0, 1.0]).build().unwrap();
        let mut ssf = SurfaceScalarField::uniform("s", &mesh, 0.0);
        ssf.internal_mut()[0] = 3.0;
        assert_eq!(surface_sum(&mesh, &ssf).unwrap(), vec![3.0, 3.0]);
        assert_eq!(surface_integrate(&mesh, &ssf).unwrap(), vec![3.0, -3.0]);
    }

    #[test]
    fn test_domain_integrate_and_named_lookup() {
        let mesh = BlockMesh::new([2, 2, 1], [1.0, 1.0, 2.0]).build().unwrap();
        let t = VolScalarField::uniform("T", &mesh, 3.0);
        assert_relative_eq!(domain_integrate(&mesh, &t).unwrap(), 6.0, max_relative = 1e-12);

        let schemes = FvSchemes::new().with_grad("grad(T)", "leastSquares");
        assert!(grad(&mesh, &schemes, &t).is_err());
        let g = grad(&mesh, &FvSchemes::new(), &t).unwrap();
        assert!(g.internal().iter().all(|v| v.norm() < 1e-12));

        let tf = interpolate(&mesh, &FvSchemes::new(), &t, None).unwrap();
        assert!(tf.internal().iter().all(|v| (v - 3.0).abs() < 1e-12));
        let sg = sn_grad(&mesh, &FvSchemes::new(), &t).unwrap();
        assert!(sg.internal().iter().all(|v| v.abs() < 1e-12));
    }
}
