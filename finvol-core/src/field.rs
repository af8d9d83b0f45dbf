//! Geometric fields: cell-centred and face-centred values with their boundary data.

use crate::boundary::{PatchField, PatchFieldConfig, PatchFieldKind};
use crate::error::{Error, Result};
use crate::mesh::{FvMesh, PatchKind};
use crate::types::{Vec3, VSMALL};

/// Maximum number of stored old-time levels.
const MAX_OLD_TIMES: usize = 2;

/// Cell-centred scalar field with boundary conditions and old-time history.
#[derive(Debug, Clone, PartialEq)]
pub struct VolScalarField {
    name: String,
    internal: Vec<f64>,
    boundary: Vec<PatchField>,
    time_index: usize,
    /// Old-time levels, most recent first.
    old_times: Vec<VolScalarField>,
    prev_iter: Option<Vec<f64>>,
}

impl VolScalarField {
    /// Uniform field; non-constraint patches get zero-gradient conditions.
    pub fn uniform(name: impl Into<String>, mesh: &FvMesh, value: f64) -> Self {
        let boundary = mesh
            .patches()
            .iter()
            .map(|p| {
                let internal = vec![value; p.size()];
                PatchField::constraint(p, &internal)
                    .unwrap_or_else(|| PatchField::zero_gradient(&internal))
            })
            .collect();
        Self {
            name: name.into(),
            internal: vec![value; mesh.n_cells()],
            boundary,
            time_index: 0,
            old_times: Vec::new(),
            prev_iter: None,
        }
    }

    /// Field with given cell values; non-constraint patches get zero-gradient conditions.
    pub fn from_values(name: impl Into<String>, mesh: &FvMesh, internal: Vec<f64>) -> Result<Self> {
        check_size("cell values", internal.len(), mesh.n_cells())?;
        let boundary = mesh
            .patches()
            .iter()
            .map(|p| {
                let pi: Vec<f64> = p.face_cells().iter().map(|&c| internal[c]).collect();
                PatchField::constraint(p, &pi).unwrap_or_else(|| PatchField::zero_gradient(&pi))
            })
            .collect();
        Ok(Self {
            name: name.into(),
            internal,
            boundary,
            time_index: 0,
            old_times: Vec::new(),
            prev_iter: None,
        })
    }

    /// Derived field whose non-constraint patch values are extrapolated from the cells.
    pub fn calculated(name: impl Into<String>, mesh: &FvMesh, internal: Vec<f64>) -> Result<Self> {
        let mut field = Self::from_values(name, mesh, internal)?;
        for (patch, pf) in mesh.patches().iter().zip(field.boundary.iter_mut()) {
            if PatchField::constraint(patch, pf.values()).is_none() {
                *pf = PatchField::calculated(pf.values().to_vec());
            }
        }
        Ok(field)
    }

    /// Replace the condition of the named patch.
    pub fn with_patch(mut self, mesh: &FvMesh, patch_name: &str, config: &PatchFieldConfig) -> Result<Self> {
        let index = mesh.find_patch(patch_name).ok_or_else(|| {
            Error::Field(format!(
                "field {} has no patch named {}",
                self.name, patch_name
            ))
        })?;
        let patch = &mesh.patches()[index];
        let internal = self.patch_internal_field(mesh, index);
        self.boundary[index] = PatchField::from_config(config, patch, &internal)?;
        Ok(self)
    }

    /// Replace the patch field of a patch.
    pub fn set_patch_field(&mut self, patch: usize, field: PatchField) -> Result<()> {
        let current = self.boundary.get(patch).ok_or_else(|| {
            Error::Field(format!("field {} has no patch {}", self.name, patch))
        })?;
        check_size("patch values", field.len(), current.len())?;
        self.boundary[patch] = field;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Cell values.
    pub fn internal(&self) -> &[f64] {
        &self.internal
    }

    pub fn internal_mut(&mut self) -> &mut [f64] {
        &mut self.internal
    }

    /// Overwrite the cell values.
    pub fn assign(&mut self, values: &[f64]) -> Result<()> {
        check_size("cell values", values.len(), self.internal.len())?;
        self.internal.copy_from_slice(values);
        Ok(())
    }

    pub fn boundary(&self) -> &[PatchField] {
        &self.boundary
    }

    pub fn boundary_field(&self, patch: usize) -> &PatchField {
        &self.boundary[patch]
    }

    pub fn boundary_field_mut(&mut self, patch: usize) -> &mut PatchField {
        &mut self.boundary[patch]
    }

    /// Face values of a patch.
    pub fn boundary_values(&self, patch: usize) -> &[f64] {
        self.boundary[patch].values()
    }

    /// Values of the cells adjacent to a patch.
    pub fn patch_internal_field(&self, mesh: &FvMesh, patch: usize) -> Vec<f64> {
        mesh.patches()[patch]
            .face_cells()
            .iter()
            .map(|&c| self.internal[c])
            .collect()
    }

    /// Values of the cells on the far side of a coupled patch.
    ///
    /// For processor patches this exchanges halo data, so every rank must call it for its
    /// matching patch.
    pub fn patch_neighbour_field(&self, mesh: &FvMesh, patch: usize) -> Result<Vec<f64>> {
        let p = &mesh.patches()[patch];
        match p.kind() {
            PatchKind::Cyclic { .. } => {
                let nbr = p.neighbour_patch().ok_or_else(|| {
                    Error::Mesh(format!("cyclic patch {} has no neighbour", p.name()))
                })?;
                Ok(self.patch_internal_field(mesh, nbr))
            }
            PatchKind::Processor { neighbour_rank, .. } => {
                let comm = mesh.comm();
                comm.send(*neighbour_rank, self.patch_internal_field(mesh, patch))?;
                let values = comm.recv(*neighbour_rank)?;
                check_size("halo values", values.len(), p.size())?;
                Ok(values)
            }
            _ => Err(Error::Field(format!(
                "patch {} of field {} is not coupled",
                p.name(),
                self.name
            ))),
        }
    }

    /// Neighbour values of every coupled patch (`None` elsewhere).
    pub fn coupled_neighbour_values(&self, mesh: &FvMesh) -> Result<Vec<Option<Vec<f64>>>> {
        coupled_neighbour_values(mesh, &self.internal)
    }

    /// Re-evaluate all boundary conditions from the current cell values.
    pub fn correct_boundary_conditions(&mut self, mesh: &FvMesh) -> Result<()> {
        let neighbours = self.coupled_neighbour_values(mesh)?;
        for (index, (patch, nbr)) in mesh.patches().iter().zip(&neighbours).enumerate() {
            let internal = self.patch_internal_field(mesh, index);
            self.boundary[index].evaluate(patch, &internal, nbr.as_deref())?;
        }
        Ok(())
    }

    /// Update flux-dependent boundary coefficients (inlet/outlet switching).
    pub fn update_coeffs(&mut self, phi: &SurfaceScalarField) -> Result<()> {
        for (index, pf) in self.boundary.iter_mut().enumerate() {
            pf.update_coeffs(phi.boundary(index))?;
        }
        Ok(())
    }

    /// Face-normal gradient on a patch.
    pub fn patch_sn_grad(&self, mesh: &FvMesh, patch: usize, neighbour: Option<&[f64]>) -> Result<Vec<f64>> {
        let internal = self.patch_internal_field(mesh, patch);
        self.boundary[patch].sn_grad(&mesh.patches()[patch], &internal, neighbour)
    }

    /// True when no patch on any rank pins the level of the solution.
    pub fn needs_reference(&self, mesh: &FvMesh) -> Result<bool> {
        let local = !self.boundary.iter().any(|pf| pf.fixes_value());
        mesh.comm().all(local)
    }

    pub fn time_index(&self) -> usize {
        self.time_index
    }

    /// Shift the old-time levels when a new time step has started.
    pub fn store_old_times(&mut self, time_index: usize) {
        if time_index == self.time_index {
            return;
        }
        let mut current = self.clone();
        current.old_times.clear();
        current.prev_iter = None;
        self.old_times.insert(0, current);
        self.old_times.truncate(MAX_OLD_TIMES);
        self.time_index = time_index;
    }

    /// Number of stored old-time levels.
    pub fn n_old_times(&self) -> usize {
        self.old_times.len()
    }

    /// Field at the previous time step (the field itself if none was stored).
    pub fn old_time(&self) -> &VolScalarField {
        self.old_times.first().unwrap_or(self)
    }

    /// Field two time steps back, falling back to [`old_time`](Self::old_time).
    pub fn old_old_time(&self) -> &VolScalarField {
        self.old_times.get(1).unwrap_or_else(|| self.old_time())
    }

    /// Remember the current cell values for under-relaxation.
    pub fn store_prev_iter(&mut self) {
        self.prev_iter = Some(self.internal.clone());
    }

    /// Explicit under-relaxation against the stored previous iteration.
    pub fn relax(&mut self, mesh: &FvMesh, alpha: f64) -> Result<()> {
        if let Some(prev) = &self.prev_iter {
            for (v, p) in self.internal.iter_mut().zip(prev) {
                *v = p + alpha * (*v - p);
            }
            self.correct_boundary_conditions(mesh)?;
        } else {
            log::debug!("No previous iteration stored for {}, relaxation skipped", self.name);
        }
        Ok(())
    }

    /// Volume-weighted average over the whole domain.
    pub fn weighted_average(&self, mesh: &FvMesh) -> Result<f64> {
        let comm = mesh.comm();
        let local: f64 = self
            .internal
            .iter()
            .zip(mesh.cell_volumes())
            .map(|(v, vol)| v * vol)
            .sum();
        let sum = comm.sum(local)?;
        let volume = comm.sum(mesh.cell_volumes().iter().sum())?;
        Ok(sum / volume.max(VSMALL))
    }

    /// Global minimum over cells.
    pub fn gmin(&self, mesh: &FvMesh) -> Result<f64> {
        mesh.comm()
            .min(self.internal.iter().cloned().fold(f64::INFINITY, f64::min))
    }

    /// Global maximum over cells.
    pub fn gmax(&self, mesh: &FvMesh) -> Result<f64> {
        mesh.comm()
            .max(self.internal.iter().cloned().fold(f64::NEG_INFINITY, f64::max))
    }

    /// True for patches whose condition is a constraint tied to the patch type.
    pub fn is_constraint(&self, patch: usize) -> bool {
        matches!(
            self.boundary[patch].kind(),
            PatchFieldKind::Empty | PatchFieldKind::Cyclic | PatchFieldKind::Processor
        )
    }
}

/// Neighbour-cell values of every coupled patch of `mesh` for the cell values `internal`.
///
/// Processor halos are sent for all patches before any is received.
pub fn coupled_neighbour_values(mesh: &FvMesh, internal: &[f64]) -> Result<Vec<Option<Vec<f64>>>> {
    let comm = mesh.comm();
    let patch_internal = |index: usize| -> Vec<f64> {
        mesh.patches()[index]
            .face_cells()
            .iter()
            .map(|&c| internal[c])
            .collect()
    };

    for (index, patch) in mesh.patches().iter().enumerate() {
        if let Some(rank) = patch.neighbour_rank() {
            comm.send(rank, patch_internal(index))?;
        }
    }

    let mut result = Vec::with_capacity(mesh.patches().len());
    for patch in mesh.patches() {
        let values = match patch.kind() {
            PatchKind::Cyclic { .. } => {
                let nbr = patch.neighbour_patch().ok_or_else(|| {
                    Error::Mesh(format!("cyclic patch {} has no neighbour", patch.name()))
                })?;
                Some(patch_internal(nbr))
            }
            PatchKind::Processor { neighbour_rank, .. } => {
                let values = comm.recv(*neighbour_rank)?;
                check_size("halo values", values.len(), patch.size())?;
                Some(values)
            }
            _ => None,
        };
        result.push(values);
    }
    Ok(result)
}

/// Vector counterpart of [`coupled_neighbour_values`].
pub fn coupled_neighbour_vectors(mesh: &FvMesh, internal: &[Vec3]) -> Result<Vec<Option<Vec<Vec3>>>> {
    let mut components: Vec<Vec<Option<Vec<f64>>>> = Vec::with_capacity(3);
    for d in 0..3 {
        let values: Vec<f64> = internal.iter().map(|v| v[d]).collect();
        components.push(coupled_neighbour_values(mesh, &values)?);
    }
    let n_patches = mesh.patches().len();
    Ok((0..n_patches)
        .map(|p| match (&components[0][p], &components[1][p], &components[2][p]) {
            (Some(x), Some(y), Some(z)) => Some(
                (0..x.len())
                    .map(|i| Vec3::new(x[i], y[i], z[i]))
                    .collect(),
            ),
            _ => None,
        })
        .collect())
}

/// Face-centred scalar field (fluxes, face diffusivities).
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceScalarField {
    name: String,
    internal: Vec<f64>,
    boundary: Vec<Vec<f64>>,
}

impl SurfaceScalarField {
    pub fn new(name: impl Into<String>, internal: Vec<f64>, boundary: Vec<Vec<f64>>) -> Self {
        Self {
            name: name.into(),
            internal,
            boundary,
        }
    }

    pub fn uniform(name: impl Into<String>, mesh: &FvMesh, value: f64) -> Self {
        Self {
            name: name.into(),
            internal: vec![value; mesh.n_internal_faces()],
            boundary: mesh.patches().iter().map(|p| vec![value; p.size()]).collect(),
        }
    }

    /// Check the field matches the face layout of `mesh`.
    pub fn check_mesh(&self, mesh: &FvMesh) -> Result<()> {
        check_size("internal face values", self.internal.len(), mesh.n_internal_faces())?;
        check_size("patches", self.boundary.len(), mesh.patches().len())?;
        for (values, patch) in self.boundary.iter().zip(mesh.patches()) {
            check_size("patch face values", values.len(), patch.size())?;
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Values on internal faces.
    pub fn internal(&self) -> &[f64] {
        &self.internal
    }

    pub fn internal_mut(&mut self) -> &mut [f64] {
        &mut self.internal
    }

    /// Values on the faces of a patch.
    pub fn boundary(&self, patch: usize) -> &[f64] {
        &self.boundary[patch]
    }

    pub fn boundary_mut(&mut self, patch: usize) -> &mut [f64] {
        &mut self.boundary[patch]
    }

    pub fn n_patches(&self) -> usize {
        self.boundary.len()
    }

    /// Apply `f` to every face value.
    pub fn map(&self, name: impl Into<String>, f: impl Fn(f64) -> f64) -> Self {
        Self {
            name: name.into(),
            internal: self.internal.iter().map(|&v| f(v)).collect(),
            boundary: self
                .boundary
                .iter()
                .map(|b| b.iter().map(|&v| f(v)).collect())
                .collect(),
        }
    }

    /// Face-by-face product.
    pub fn mul(&self, other: &SurfaceScalarField) -> Self {
        Self {
            name: format!("({}*{})", self.name, other.name),
            internal: self
                .internal
                .iter()
                .zip(&other.internal)
                .map(|(a, b)| a * b)
                .collect(),
            boundary: self
                .boundary
                .iter()
                .zip(&other.boundary)
                .map(|(a, b)| a.iter().zip(b).map(|(x, y)| x * y).collect())
                .collect(),
        }
    }

    pub fn scale(&self, factor: f64) -> Self {
        self.map(self.name.clone(), |v| v * factor)
    }
}

/// Cell-centred vector field with plain patch values.
#[derive(Debug, Clone, PartialEq)]
pub struct VolVectorField {
    name: String,
    internal: Vec<Vec3>,
    boundary: Vec<Vec<Vec3>>,
}

impl VolVectorField {
    pub fn new(name: impl Into<String>, internal: Vec<Vec3>, boundary: Vec<Vec<Vec3>>) -> Self {
        Self {
            name: name.into(),
            internal,
            boundary,
        }
    }

    pub fn uniform(name: impl Into<String>, mesh: &FvMesh, value: Vec3) -> Self {
        Self {
            name: name.into(),
            internal: vec![value; mesh.n_cells()],
            boundary: mesh.patches().iter().map(|p| vec![value; p.size()]).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn internal(&self) -> &[Vec3] {
        &self.internal
    }

    pub fn internal_mut(&mut self) -> &mut [Vec3] {
        &mut self.internal
    }

    pub fn boundary(&self, patch: usize) -> &[Vec3] {
        &self.boundary[patch]
    }

    pub fn boundary_mut(&mut self, patch: usize) -> &mut [Vec3] {
        &mut self.boundary[patch]
    }

    /// One Cartesian component of the cell values.
    pub fn component(&self, dir: usize) -> Vec<f64> {
        self.internal.iter().map(|v| v[dir]).collect()
    }

    /// Magnitude of each cell value.
    pub fn mag(&self) -> Vec<f64> {
        self.internal.iter().map(|v| v.norm()).collect()
    }
}

fn check_size(what: &str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(Error::Field(format!(
            "size mismatch for {}: got {}, expected {}",
            what, got, expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_mesh::{BlockMesh, Side};
    use crate::mesh::PatchKind;
    use crate::types::Axis;
    use approx::assert_relative_eq;

    fn channel() -> FvMesh {
        BlockMesh::new([4, 1, 1], [1.0, 1.0, 1.0]).build().unwrap()
    }

    #[test]
    fn test_uniform_field_boundaries() {
        let mesh = BlockMesh::new([2, 2, 1], [1.0, 1.0, 0.1])
            .two_dimensional()
            .build()
            .unwrap();
        let t = VolScalarField::uniform("T", &mesh, 3.0);
        assert_eq!(t.internal().len(), 4);
        let front = mesh.find_patch("front").unwrap();
        assert_eq!(t.boundary_field(front).kind(), &PatchFieldKind::Empty);
        let left = mesh.find_patch("left").unwrap();
        assert_eq!(t.boundary_field(left).kind(), &PatchFieldKind::ZeroGradient);
        assert_eq!(t.boundary_values(left), &[3.0, 3.0]);
        assert!(t.needs_reference(&mesh).unwrap());
    }

    #[test]
    fn test_with_patch_and_correct() {
        let mesh = channel();
        let mut t = VolScalarField::from_values("T", &mesh, vec![1.0, 2.0, 3.0, 4.0])
            .unwrap()
            .with_patch(&mesh, "left", &PatchFieldConfig::FixedValue { value: 0.0 })
            .unwrap();
        assert!(!t.needs_reference(&mesh).unwrap());

        t.internal_mut()[3] = 10.0;
        t.correct_boundary_conditions(&mesh).unwrap();
        let right = mesh.find_patch("right").unwrap();
        assert_eq!(t.boundary_values(right), &[10.0]);
        assert_eq!(t.boundary_values(0), &[0.0]);

        let grad = t.patch_sn_grad(&mesh, 0, None).unwrap();
        assert_relative_eq!(grad[0], -8.0, epsilon = 1e-10);

        assert!(t
            .clone()
            .with_patch(&mesh, "nowhere", &PatchFieldConfig::ZeroGradient)
            .is_err());
    }

    #[test]
    fn test_cyclic_neighbour_values() {
        let mesh = BlockMesh::new([4, 1, 1], [1.0, 1.0, 1.0])
            .cyclic(Axis::X)
            .build()
            .unwrap();
        let mut t = VolScalarField::from_values("T", &mesh, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let left = mesh.find_patch("left").unwrap();
        assert_eq!(t.patch_neighbour_field(&mesh, left).unwrap(), vec![4.0]);
        t.correct_boundary_conditions(&mesh).unwrap();
        assert_relative_eq!(t.boundary_values(left)[0], 2.5, epsilon = 1e-12);
        assert!(t
            .patch_neighbour_field(&mesh, mesh.find_patch("top").unwrap())
            .is_err());
    }

    #[test]
    fn test_old_time_levels() {
        let mesh = channel();
        let mut t = VolScalarField::uniform("T", &mesh, 1.0);
        assert_eq!(t.n_old_times(), 0);
        assert_eq!(t.old_time().internal(), t.internal());

        t.store_old_times(1);
        t.internal_mut().fill(2.0);
        // Same index again does not shift
        t.store_old_times(1);
        assert_eq!(t.n_old_times(), 1);
        assert_eq!(t.old_time().internal()[0], 1.0);
        assert_eq!(t.old_old_time().internal()[0], 1.0);

        t.store_old_times(2);
        t.internal_mut().fill(3.0);
        t.store_old_times(3);
        assert_eq!(t.n_old_times(), 2);
        assert_eq!(t.old_time().internal()[0], 3.0);
        assert_eq!(t.old_old_time().internal()[0], 2.0);
        assert_eq!(t.old_time().n_old_times(), 0);
    }

    #[test]
    fn test_relax_and_statistics() {
        let mesh = channel();
        let mut t = VolScalarField::from_values("p", &mesh, vec![0.0; 4]).unwrap();
        t.store_prev_iter();
        t.assign(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        t.relax(&mesh, 0.5).unwrap();
        assert_eq!(t.internal(), &[0.5, 1.0, 1.5, 2.0]);
        assert_relative_eq!(t.weighted_average(&mesh).unwrap(), 1.25, epsilon = 1e-12);
        assert_relative_eq!(t.gmin(&mesh).unwrap(), 0.5);
        assert_relative_eq!(t.gmax(&mesh).unwrap(), 2.0);
    }

    #[test]
    fn test_calculated_field() {
        let mesh = BlockMesh::new([2, 1, 1], [1.0, 1.0, 1.0])
            .side(Side::Top, "top", PatchKind::Symmetry)
            .build()
            .unwrap();
        let g = VolScalarField::calculated("gamma", &mesh, vec![1.0, 2.0]).unwrap();
        assert_eq!(g.boundary_field(0).kind(), &PatchFieldKind::Calculated);
        let top = mesh.find_patch("top").unwrap();
        assert_eq!(g.boundary_field(top).kind(), &PatchFieldKind::ZeroGradient);
        assert!(VolScalarField::calculated("gamma", &mesh, vec![1.0]).is_err());
    }

    #[test]
    fn test_surface_field_algebra() {
        let mesh = channel();
        let a = SurfaceScalarField::uniform("a", &mesh, 2.0);
        let b = a.map("b", |v| v + 1.0);
        let c = a.mul(&b);
        assert!(c.check_mesh(&mesh).is_ok());
        assert_eq!(c.internal(), &[6.0, 6.0, 6.0]);
        assert_eq!(c.boundary(0), &[6.0]);
        assert_eq!(c.scale(0.5).internal()[0], 3.0);
    }
}
