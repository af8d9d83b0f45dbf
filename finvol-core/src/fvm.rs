//! Implicit finite-volume operators: each returns an [`FvMatrix`] for the field.
//!
//! Schemes are looked up in [`FvSchemes`] under `ddt(T)`, `ddt(rho,T)`, `div(phi,T)` and
//! `laplacian(DT,T)` keys built from the field names.
//!
//! ```ignore
//! let eqn = fvm::ddt(&mesh, &time, &schemes, &t)?
//!     .try_add(fvm::div(&mesh, &schemes, &phi, &t)?)?
//!     .try_sub(fvm::laplacian(&mesh, &schemes, &dt, &t)?)?;
//! ```

use crate::error::Result;
use crate::field::{SurfaceScalarField, VolScalarField};
use crate::fv_matrix::FvMatrix;
use crate::mesh::FvMesh;
use crate::schemes::{sources, FvSchemes};
use crate::time::Time;

/// Implicit time derivative.
pub fn ddt<'a>(mesh: &'a FvMesh, time: &Time, schemes: &FvSchemes, vf: &VolScalarField) -> Result<FvMatrix<'a>> {
    schemes
        .ddt(&format!("ddt({})", vf.name()))?
        .fvm_ddt(mesh, time, vf)
}

/// Implicit time derivative of `rho vf`.
pub fn ddt_rho<'a>(
    mesh: &'a FvMesh,
    time: &Time,
    schemes: &FvSchemes,
    rho: &VolScalarField,
    vf: &VolScalarField,
) -> Result<FvMatrix<'a>> {
    schemes
        .ddt(&format!("ddt({},{})", rho.name(), vf.name()))?
        .fvm_ddt_rho(mesh, time, rho, vf)
}

/// Implicit convection of `vf` by the face flux `phi`.
pub fn div<'a>(
    mesh: &'a FvMesh,
    schemes: &FvSchemes,
    phi: &SurfaceScalarField,
    vf: &VolScalarField,
) -> Result<FvMatrix<'a>> {
    schemes
        .div(&format!("div({},{})", phi.name(), vf.name()))?
        .fvm_div(mesh, phi, vf)
}

/// Implicit Laplacian with a face diffusivity.
pub fn laplacian<'a>(
    mesh: &'a FvMesh,
    schemes: &FvSchemes,
    gamma: &SurfaceScalarField,
    vf: &VolScalarField,
) -> Result<FvMatrix<'a>> {
    schemes
        .laplacian(&format!("laplacian({},{})", gamma.name(), vf.name()))?
        .fvm_laplacian(mesh, gamma, vf)
}

/// Implicit Laplacian with a cell diffusivity.
pub fn laplacian_vol<'a>(
    mesh: &'a FvMesh,
    schemes: &FvSchemes,
    gamma: &VolScalarField,
    vf: &VolScalarField,
) -> Result<FvMatrix<'a>> {
    schemes
        .laplacian(&format!("laplacian({},{})", gamma.name(), vf.name()))?
        .fvm_laplacian_vol(mesh, gamma, vf)
}

/// Implicit source `sp vf`.
pub fn sp<'a>(mesh: &'a FvMesh, coeff: &[f64], vf: &VolScalarField) -> Result<FvMatrix<'a>> {
    sources::sp(mesh, coeff, vf)
}

/// Explicit source.
pub fn su<'a>(mesh: &'a FvMesh, source: &[f64], vf: &VolScalarField) -> Result<FvMatrix<'a>> {
    sources::su(mesh, source, vf)
}

/// Source that is implicit where positive.
pub fn susp<'a>(mesh: &'a FvMesh, coeff: &[f64], vf: &VolScalarField) -> Result<FvMatrix<'a>> {
    sources::susp(mesh, coeff, vf)
}
