//! Implicit and explicit cell sources.

use crate::error::{Error, Result};
use crate::field::VolScalarField;
use crate::fv_matrix::FvMatrix;
use crate::mesh::FvMesh;

fn check_len(what: &str, len: usize, mesh: &FvMesh) -> Result<()> {
    if len != mesh.n_cells() {
        return Err(Error::Field(format!(
            "{} has {} values for {} cells",
            what,
            len,
            mesh.n_cells()
        )));
    }
    Ok(())
}

/// Implicit source `sp * vf`.
pub fn sp<'a>(mesh: &'a FvMesh, coeff: &[f64], vf: &VolScalarField) -> Result<FvMatrix<'a>> {
    check_len("Sp coefficient", coeff.len(), mesh)?;
    let mut fvm = FvMatrix::new(mesh, vf);
    *fvm.ldu_mut().diag_mut() = coeff
        .iter()
        .zip(mesh.cell_volumes())
        .map(|(s, v)| s * v)
        .collect();
    Ok(fvm)
}

/// Explicit source `su`.
pub fn su<'a>(mesh: &'a FvMesh, su: &[f64], vf: &VolScalarField) -> Result<FvMatrix<'a>> {
    check_len("Su source", su.len(), mesh)?;
    let mut fvm = FvMatrix::new(mesh, vf);
    for ((s, u), v) in fvm.source_mut().iter_mut().zip(su).zip(mesh.cell_volumes()) {
        *s -= v * u;
    }
    Ok(fvm)
}

/// Source `susp * vf`, implicit where `susp > 0` and explicit elsewhere.
pub fn susp<'a>(mesh: &'a FvMesh, coeff: &[f64], vf: &VolScalarField) -> Result<FvMatrix<'a>> {
    check_len("SuSp coefficient", coeff.len(), mesh)?;
    let mut fvm = FvMatrix::new(mesh, vf);
    let v = mesh.cell_volumes();
    *fvm.ldu_mut().diag_mut() = (0..mesh.n_cells()).map(|i| v[i] * coeff[i].max(0.0)).collect();
    let psi = vf.internal();
    for (i, s) in fvm.source_mut().iter_mut().enumerate() {
        *s -= v[i] * coeff[i].min(0.0) * psi[i];
    }
    Ok(fvm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_mesh::BlockMesh;
    use crate::solver::SolverControls;
    use approx::assert_relative_eq;

    #[test]
    fn test_sources() {
        let mesh = BlockMesh::new([2, 1, 1], [1.0, 1.0, 1.0]).build().unwrap();
        let t = VolScalarField::uniform("T", &mesh, 3.0);

        let m = sp(&mesh, &[2.0, 4.0], &t).unwrap();
        assert_eq!(m.ldu().diag().as_ref(), &[1.0, 2.0]);

        let m = su(&mesh, &[2.0, 4.0], &t).unwrap();
        assert_eq!(m.source(), &[-1.0, -2.0]);

        let m = susp(&mesh, &[2.0, -4.0], &t).unwrap();
        assert_eq!(m.ldu().diag().as_ref(), &[1.0, 0.0]);
        assert_eq!(m.source(), &[0.0, 6.0]);

        assert!(sp(&mesh, &[1.0], &t).is_err());
    }

    #[test]
    fn test_balance_of_implicit_and_explicit_source() {
        // sp T = su  gives  T = su / sp
        let mesh = BlockMesh::new([3, 1, 1], [1.0, 1.0, 1.0]).build().unwrap();
        let mut t = VolScalarField::uniform("T", &mesh, 0.0);
        let mut eqn = sp(&mesh, &[2.0; 3], &t)
            .unwrap()
            .try_sub(su(&mesh, &[6.0; 3], &t).unwrap())
            .unwrap();
        eqn.solve(&mut t, &SolverControls::new("diagonal")).unwrap();
        for v in t.internal() {
            assert_relative_eq!(*v, 3.0, max_relative = 1e-12);
        }
    }
}
