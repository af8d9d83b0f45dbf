//! Face-addressed sparse matrix (lower / diagonal / upper storage).
//!
//! Row `c` of the matrix holds `diag[c]` on the diagonal. Every internal face `f` with
//! `l = lower_addr[f] < u = upper_addr[f]` contributes two off-diagonal coefficients:
//! `upper[f]` at `(l, u)` and `lower[f]` at `(u, l)`. A matrix with no lower coefficients is
//! symmetric and [`LduMatrix::lower`] returns the upper ones.
//!
//! Coupled boundaries enter through [`LduInterface`]s: for each interface face the product
//! picks up `-coeff * psi_neighbour` in the row of the adjacent cell.

use crate::error::{Error, Result};
use crate::mesh::{FvMesh, LduAddressing, PatchKind};
use crate::parallel::Communicator;
use crate::sparse::{CsrMatrix, TripletMatrix};
use std::fmt;
use std::sync::Arc;

/// Coupled boundary seen by the matrix.
pub trait LduInterface: Send + Sync + fmt::Debug {
    /// Cells adjacent to the interface faces.
    fn face_cells(&self) -> &[usize];

    /// Start the exchange of `psi` (no-op for in-process interfaces).
    fn init_interface_matrix(&self, _psi: &[f64]) -> Result<()> {
        Ok(())
    }

    /// Add the coupled contribution: `result[face_cell] -= coeff * psi_neighbour`.
    fn update_interface_matrix(&self, psi: &[f64], result: &mut [f64], coeffs: &[f64]) -> Result<()>;

    /// Neighbour cells of the faces when they live in the same matrix.
    fn neighbour_cells(&self) -> Option<&[usize]> {
        None
    }
}

/// Periodic coupling between two patches of the same mesh.
#[derive(Debug, Clone)]
pub struct CyclicInterface {
    face_cells: Vec<usize>,
    neighbour_cells: Vec<usize>,
}

impl CyclicInterface {
    pub fn new(face_cells: Vec<usize>, neighbour_cells: Vec<usize>) -> Self {
        Self {
            face_cells,
            neighbour_cells,
        }
    }
}

impl LduInterface for CyclicInterface {
    fn face_cells(&self) -> &[usize] {
        &self.face_cells
    }

    fn update_interface_matrix(&self, psi: &[f64], result: &mut [f64], coeffs: &[f64]) -> Result<()> {
        for ((&fc, &nc), c) in self.face_cells.iter().zip(&self.neighbour_cells).zip(coeffs) {
            result[fc] -= c * psi[nc];
        }
        Ok(())
    }

    fn neighbour_cells(&self) -> Option<&[usize]> {
        Some(&self.neighbour_cells)
    }
}

/// Coupling to a neighbouring subdomain through halo exchange.
#[derive(Debug, Clone)]
pub struct ProcessorInterface {
    face_cells: Vec<usize>,
    neighbour_rank: usize,
    comm: Arc<dyn Communicator>,
}

impl ProcessorInterface {
    pub fn new(face_cells: Vec<usize>, neighbour_rank: usize, comm: Arc<dyn Communicator>) -> Self {
        Self {
            face_cells,
            neighbour_rank,
            comm,
        }
    }

    pub fn neighbour_rank(&self) -> usize {
        self.neighbour_rank
    }
}

impl LduInterface for ProcessorInterface {
    fn face_cells(&self) -> &[usize] {
        &self.face_cells
    }

    fn init_interface_matrix(&self, psi: &[f64]) -> Result<()> {
        let halo: Vec<f64> = self.face_cells.iter().map(|&c| psi[c]).collect();
        self.comm.send(self.neighbour_rank, halo)
    }

    fn update_interface_matrix(&self, _psi: &[f64], result: &mut [f64], coeffs: &[f64]) -> Result<()> {
        let pnf = self.comm.recv(self.neighbour_rank)?;
        if pnf.len() != self.face_cells.len() {
            return Err(Error::Communication(format!(
                "received {} halo values from rank {} for {} faces",
                pnf.len(),
                self.neighbour_rank,
                self.face_cells.len()
            )));
        }
        for ((&fc, p), c) in self.face_cells.iter().zip(&pnf).zip(coeffs) {
            result[fc] -= c * p;
        }
        Ok(())
    }
}

/// Interfaces indexed by patch; `None` for non-coupled patches.
#[derive(Debug, Default)]
pub struct LduInterfaces {
    interfaces: Vec<Option<Box<dyn LduInterface>>>,
}

impl LduInterfaces {
    /// Interfaces for the coupled patches of a mesh.
    pub fn from_mesh(mesh: &FvMesh) -> Result<Self> {
        let mut interfaces: Vec<Option<Box<dyn LduInterface>>> = Vec::new();
        for patch in mesh.patches() {
            let interface: Option<Box<dyn LduInterface>> = match patch.kind() {
                PatchKind::Cyclic { .. } => {
                    let nbr = patch.neighbour_patch().ok_or_else(|| {
                        Error::Mesh(format!("cyclic patch {} has no neighbour", patch.name()))
                    })?;
                    Some(Box::new(CyclicInterface::new(
                        patch.face_cells().to_vec(),
                        mesh.patches()[nbr].face_cells().to_vec(),
                    )))
                }
                PatchKind::Processor { neighbour_rank, .. } => Some(Box::new(ProcessorInterface::new(
                    patch.face_cells().to_vec(),
                    *neighbour_rank,
                    Arc::clone(mesh.comm()),
                ))),
                _ => None,
            };
            interfaces.push(interface);
        }
        Ok(Self { interfaces })
    }

    pub fn new(interfaces: Vec<Option<Box<dyn LduInterface>>>) -> Self {
        Self { interfaces }
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn get(&self, patch: usize) -> Option<&dyn LduInterface> {
        self.interfaces.get(patch).and_then(|i| i.as_deref())
    }

    /// Iterate over `(patch, interface)` of the coupled patches.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &dyn LduInterface)> {
        self.interfaces
            .iter()
            .enumerate()
            .filter_map(|(i, intf)| intf.as_deref().map(|intf| (i, intf)))
    }

    /// True when any interface needs the neighbour-cell values from another matrix.
    pub fn any_remote(&self) -> bool {
        self.iter().any(|(_, i)| i.neighbour_cells().is_none())
    }

    /// Start all exchanges for `psi`.
    pub fn init(&self, psi: &[f64]) -> Result<()> {
        for (_, interface) in self.iter() {
            interface.init_interface_matrix(psi)?;
        }
        Ok(())
    }

    /// Complete all exchanges and add the coupled contributions to `result`.
    pub fn update(&self, coeffs: &[Vec<f64>], psi: &[f64], result: &mut [f64]) -> Result<()> {
        for (patch, interface) in self.iter() {
            let c = coeffs.get(patch).ok_or_else(|| {
                Error::Matrix(format!("missing interface coefficients for patch {}", patch))
            })?;
            interface.update_interface_matrix(psi, result, c)?;
        }
        Ok(())
    }
}

/// Face-addressed sparse matrix.
#[derive(Clone, PartialEq)]
pub struct LduMatrix {
    addr: Arc<LduAddressing>,
    diag: Option<Vec<f64>>,
    upper: Option<Vec<f64>>,
    lower: Option<Vec<f64>>,
}

impl fmt::Debug for LduMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LduMatrix")
            .field("n_cells", &self.addr.n_cells())
            .field("n_faces", &self.addr.n_faces())
            .field("diag", &self.diag.is_some())
            .field("upper", &self.upper.is_some())
            .field("lower", &self.lower.is_some())
            .finish()
    }
}

impl LduMatrix {
    /// Empty matrix over the given addressing.
    pub fn new(addr: Arc<LduAddressing>) -> Self {
        Self {
            addr,
            diag: None,
            upper: None,
            lower: None,
        }
    }

    pub fn addressing(&self) -> &Arc<LduAddressing> {
        &self.addr
    }

    pub fn n_cells(&self) -> usize {
        self.addr.n_cells()
    }

    pub fn has_diag(&self) -> bool {
        self.diag.is_some()
    }

    pub fn has_upper(&self) -> bool {
        self.upper.is_some()
    }

    pub fn has_lower(&self) -> bool {
        self.lower.is_some()
    }

    /// Only diagonal coefficients.
    pub fn diagonal(&self) -> bool {
        self.diag.is_some() && self.upper.is_none() && self.lower.is_none()
    }

    /// Upper coefficients without separate lower ones.
    pub fn symmetric(&self) -> bool {
        self.upper.is_some() && self.lower.is_none()
    }

    pub fn asymmetric(&self) -> bool {
        self.lower.is_some()
    }

    /// Diagonal coefficients; zeros when unset.
    pub fn diag(&self) -> std::borrow::Cow<'_, [f64]> {
        match &self.diag {
            Some(d) => std::borrow::Cow::Borrowed(d),
            None => std::borrow::Cow::Owned(vec![0.0; self.addr.n_cells()]),
        }
    }

    pub fn diag_mut(&mut self) -> &mut Vec<f64> {
        let n = self.addr.n_cells();
        self.diag.get_or_insert_with(|| vec![0.0; n])
    }

    /// Upper coefficients; the lower ones for a lower-only matrix, zeros when unset.
    pub fn upper(&self) -> std::borrow::Cow<'_, [f64]> {
        match (&self.upper, &self.lower) {
            (Some(u), _) => std::borrow::Cow::Borrowed(u),
            (None, Some(l)) => std::borrow::Cow::Borrowed(l),
            (None, None) => std::borrow::Cow::Owned(vec![0.0; self.addr.n_faces()]),
        }
    }

    pub fn upper_mut(&mut self) -> &mut Vec<f64> {
        if self.upper.is_none() {
            let init = self
                .lower
                .clone()
                .unwrap_or_else(|| vec![0.0; self.addr.n_faces()]);
            self.upper = Some(init);
        }
        self.upper.get_or_insert_with(Vec::new)
    }

    /// Lower coefficients; the upper ones for a symmetric matrix, zeros when unset.
    pub fn lower(&self) -> std::borrow::Cow<'_, [f64]> {
        match (&self.lower, &self.upper) {
            (Some(l), _) => std::borrow::Cow::Borrowed(l),
            (None, Some(u)) => std::borrow::Cow::Borrowed(u),
            (None, None) => std::borrow::Cow::Owned(vec![0.0; self.addr.n_faces()]),
        }
    }

    /// Mutable lower coefficients; makes the matrix asymmetric.
    pub fn lower_mut(&mut self) -> &mut Vec<f64> {
        if self.lower.is_none() {
            let init = self
                .upper
                .clone()
                .unwrap_or_else(|| vec![0.0; self.addr.n_faces()]);
            self.lower = Some(init);
        }
        self.lower.get_or_insert_with(Vec::new)
    }

    /// Row product `A psi` including coupled interfaces.
    pub fn amul(&self, psi: &[f64], interface_bou_coeffs: &[Vec<f64>], interfaces: &LduInterfaces) -> Result<Vec<f64>> {
        let mut result = vec![0.0; self.n_cells()];
        self.amul_into(psi, &mut result, interface_bou_coeffs, interfaces)?;
        Ok(result)
    }

    /// [`amul`](Self::amul) into an existing buffer.
    pub fn amul_into(
        &self,
        psi: &[f64],
        result: &mut [f64],
        interface_bou_coeffs: &[Vec<f64>],
        interfaces: &LduInterfaces,
    ) -> Result<()> {
        interfaces.init(psi)?;
        self.amul_internal(psi, result);
        interfaces.update(interface_bou_coeffs, psi, result)
    }

    /// Product over internal faces only.
    fn amul_internal(&self, psi: &[f64], result: &mut [f64]) {
        let diag = self.diag();
        let upper = self.upper();
        let lower = self.lower();
        let l = self.addr.lower();
        let u = self.addr.upper();

        for c in 0..result.len() {
            result[c] = diag[c] * psi[c];
        }
        for f in 0..l.len() {
            result[u[f]] += lower[f] * psi[l[f]];
            result[l[f]] += upper[f] * psi[u[f]];
        }
    }

    /// Transposed product `A^T psi` including coupled interfaces.
    pub fn tmul(&self, psi: &[f64], interface_int_coeffs: &[Vec<f64>], interfaces: &LduInterfaces) -> Result<Vec<f64>> {
        let diag = self.diag();
        let upper = self.upper();
        let lower = self.lower();
        let l = self.addr.lower();
        let u = self.addr.upper();

        interfaces.init(psi)?;
        let mut result: Vec<f64> = diag.iter().zip(psi).map(|(d, p)| d * p).collect();
        for f in 0..l.len() {
            result[u[f]] += upper[f] * psi[l[f]];
            result[l[f]] += lower[f] * psi[u[f]];
        }
        interfaces.update(interface_int_coeffs, psi, &mut result)?;
        Ok(result)
    }

    /// Residual `b - A psi` including coupled interfaces.
    pub fn residual(
        &self,
        psi: &[f64],
        source: &[f64],
        interface_bou_coeffs: &[Vec<f64>],
        interfaces: &LduInterfaces,
    ) -> Result<Vec<f64>> {
        let neg_coeffs: Vec<Vec<f64>> = interface_bou_coeffs
            .iter()
            .map(|c| c.iter().map(|v| -v).collect())
            .collect();

        interfaces.init(psi)?;
        let diag = self.diag();
        let upper = self.upper();
        let lower = self.lower();
        let l = self.addr.lower();
        let u = self.addr.upper();

        let mut r: Vec<f64> = (0..self.n_cells())
            .map(|c| source[c] - diag[c] * psi[c])
            .collect();
        for f in 0..l.len() {
            r[u[f]] -= lower[f] * psi[l[f]];
            r[l[f]] -= upper[f] * psi[u[f]];
        }
        interfaces.update(&neg_coeffs, psi, &mut r)?;
        Ok(r)
    }

    /// Row sums of the matrix, interface coefficients included; equals `A * 1`.
    pub fn sum_a(&self, interface_bou_coeffs: &[Vec<f64>], interfaces: &LduInterfaces) -> Vec<f64> {
        let mut sum_a = self.diag().into_owned();
        let upper = self.upper();
        let lower = self.lower();
        let l = self.addr.lower();
        let u = self.addr.upper();
        // Row sums: `upper` sits in row `l`, `lower` in row `u`
        for f in 0..l.len() {
            sum_a[l[f]] += upper[f];
            sum_a[u[f]] += lower[f];
        }
        for (patch, interface) in interfaces.iter() {
            if let Some(coeffs) = interface_bou_coeffs.get(patch) {
                for (&fc, c) in interface.face_cells().iter().zip(coeffs) {
                    sum_a[fc] -= c;
                }
            }
        }
        sum_a
    }

    /// Set the diagonal to minus the sum of the neighbour coefficients.
    pub fn neg_sum_diag(&mut self) {
        let lower = self.lower().into_owned();
        let upper = self.upper().into_owned();
        let l = Arc::clone(&self.addr);
        let diag = self.diag_mut();
        for f in 0..l.n_faces() {
            diag[l.lower()[f]] -= lower[f];
            diag[l.upper()[f]] -= upper[f];
        }
    }

    /// Sum of the magnitudes of the off-diagonal coefficients of each row.
    pub fn sum_mag_off_diag(&self) -> Vec<f64> {
        let mut sum_off = vec![0.0; self.n_cells()];
        let upper = self.upper();
        let lower = self.lower();
        let l = self.addr.lower();
        let u = self.addr.upper();
        for f in 0..l.len() {
            sum_off[u[f]] += lower[f].abs();
            sum_off[l[f]] += upper[f].abs();
        }
        sum_off
    }

    /// `-(offdiag) psi`.
    pub fn h(&self, psi: &[f64]) -> Vec<f64> {
        let mut h = vec![0.0; self.n_cells()];
        if self.upper.is_none() && self.lower.is_none() {
            return h;
        }
        let upper = self.upper();
        let lower = self.lower();
        let l = self.addr.lower();
        let u = self.addr.upper();
        for f in 0..l.len() {
            h[u[f]] -= lower[f] * psi[l[f]];
            h[l[f]] -= upper[f] * psi[u[f]];
        }
        h
    }

    /// `-(offdiag) 1`.
    pub fn h1(&self) -> Vec<f64> {
        let mut h1 = vec![0.0; self.n_cells()];
        if self.upper.is_none() && self.lower.is_none() {
            return h1;
        }
        let upper = self.upper();
        let lower = self.lower();
        let l = self.addr.lower();
        let u = self.addr.upper();
        for f in 0..l.len() {
            h1[u[f]] -= lower[f];
            h1[l[f]] -= upper[f];
        }
        h1
    }

    /// Face flux `upper * psi_u - lower * psi_l` of the internal faces.
    pub fn face_h(&self, psi: &[f64]) -> Vec<f64> {
        let upper = self.upper();
        let lower = self.lower();
        let l = self.addr.lower();
        let u = self.addr.upper();
        (0..l.len())
            .map(|f| upper[f] * psi[u[f]] - lower[f] * psi[l[f]])
            .collect()
    }

    fn check_compatible(&self, other: &LduMatrix) -> Result<()> {
        if !Arc::ptr_eq(&self.addr, &other.addr) && *self.addr != *other.addr {
            return Err(Error::Matrix(
                "matrices are defined on different addressing".into(),
            ));
        }
        Ok(())
    }

    /// `self += other`, promoting the storage as needed.
    pub fn add(&mut self, other: &LduMatrix) -> Result<()> {
        self.combine(other, 1.0)
    }

    /// `self -= other`.
    pub fn sub(&mut self, other: &LduMatrix) -> Result<()> {
        self.combine(other, -1.0)
    }

    fn combine(&mut self, other: &LduMatrix, sign: f64) -> Result<()> {
        self.check_compatible(other)?;

        if let Some(od) = &other.diag {
            axpy(self.diag_mut(), sign, od);
        }

        if other.asymmetric() || (self.asymmetric() && other.has_upper()) {
            let ou = other.upper().into_owned();
            let ol = other.lower().into_owned();
            // Split storage before either side changes
            self.upper_mut();
            self.lower_mut();
            axpy(self.upper_mut(), sign, &ou);
            axpy(self.lower_mut(), sign, &ol);
        } else if let Some(ou) = &other.upper {
            axpy(self.upper_mut(), sign, ou);
        }
        Ok(())
    }

    /// Multiply every coefficient by `factor`.
    pub fn scale(&mut self, factor: f64) {
        for coeffs in [&mut self.diag, &mut self.upper, &mut self.lower]
            .into_iter()
            .flatten()
        {
            coeffs.iter_mut().for_each(|v| *v *= factor);
        }
    }

    /// Multiply each row by a per-cell factor.
    pub fn scale_rows(&mut self, factors: &[f64]) {
        if let Some(d) = &mut self.diag {
            for (v, s) in d.iter_mut().zip(factors) {
                *v *= s;
            }
        }
        if self.upper.is_none() && self.lower.is_none() {
            return;
        }
        // Row scaling breaks symmetry
        let addr = Arc::clone(&self.addr);
        self.upper_mut();
        self.lower_mut();
        if let Some(upper) = &mut self.upper {
            for (f, v) in upper.iter_mut().enumerate() {
                *v *= factors[addr.lower()[f]];
            }
        }
        if let Some(lower) = &mut self.lower {
            for (f, v) in lower.iter_mut().enumerate() {
                *v *= factors[addr.upper()[f]];
            }
        }
    }

    pub fn negate(&mut self) {
        self.scale(-1.0);
    }

    /// Visit every `(row, col, value)` coefficient, in-process interfaces included.
    ///
    /// Diagonal entries come first, then the two entries of each face, then one entry per
    /// interface face. Interfaces to other subdomains have no local column and are an error.
    pub fn for_each_coefficient<F>(
        &self,
        interface_bou_coeffs: &[Vec<f64>],
        interfaces: &LduInterfaces,
        mut visit: F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize, f64),
    {
        for (c, d) in self.diag().iter().enumerate() {
            visit(c, c, *d);
        }
        let upper = self.upper();
        let lower = self.lower();
        for f in 0..self.addr.n_faces() {
            let (l, u) = (self.addr.lower()[f], self.addr.upper()[f]);
            visit(l, u, upper[f]);
            visit(u, l, lower[f]);
        }

        for (patch, interface) in interfaces.iter() {
            let nbr = interface.neighbour_cells().ok_or_else(|| {
                Error::Matrix(format!(
                    "interface on patch {} couples to another subdomain and cannot be assembled",
                    patch
                ))
            })?;
            let coeffs = interface_bou_coeffs.get(patch).ok_or_else(|| {
                Error::Matrix(format!("missing interface coefficients for patch {}", patch))
            })?;
            for ((&fc, &nc), c) in interface.face_cells().iter().zip(nbr).zip(coeffs) {
                visit(fc, nc, -c);
            }
        }
        Ok(())
    }

    /// Assemble into CSR. Only in-process interfaces can be folded into the matrix.
    pub fn to_csr(&self, interface_bou_coeffs: &[Vec<f64>], interfaces: &LduInterfaces) -> Result<CsrMatrix> {
        let n = self.n_cells();
        let mut triplets = TripletMatrix::with_capacity(n, n + 2 * self.addr.n_faces());
        self.for_each_coefficient(interface_bou_coeffs, interfaces, |r, c, v| triplets.add(r, c, v))?;
        triplets.to_csr()
    }
}

fn axpy(y: &mut [f64], a: f64, x: &[f64]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += a * xi;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_mesh::BlockMesh;
    use crate::sparse::csr_mul;
    use crate::types::Axis;
    use approx::assert_relative_eq;

    /// Tridiagonal 1D Laplacian-like matrix over a 4-cell channel.
    fn tridiagonal(mesh: &FvMesh) -> LduMatrix {
        let mut m = LduMatrix::new(Arc::clone(mesh.ldu_addressing()));
        m.upper_mut().fill(-1.0);
        m.neg_sum_diag();
        m
    }

    #[test]
    fn test_states() {
        let mesh = BlockMesh::new([4, 1, 1], [1.0, 1.0, 1.0]).build().unwrap();
        let mut m = LduMatrix::new(Arc::clone(mesh.ldu_addressing()));
        assert!(!m.diagonal() && !m.symmetric() && !m.asymmetric());
        m.diag_mut().fill(1.0);
        assert!(m.diagonal());
        m.upper_mut().fill(2.0);
        assert!(m.symmetric());
        assert_eq!(&*m.lower(), &[2.0, 2.0, 2.0]);
        m.lower_mut()[0] = 3.0;
        assert!(m.asymmetric());
        assert_eq!(&*m.upper(), &[2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_amul_residual_and_sums() {
        let mesh = BlockMesh::new([4, 1, 1], [1.0, 1.0, 1.0]).build().unwrap();
        let m = tridiagonal(&mesh);
        let interfaces = LduInterfaces::from_mesh(&mesh).unwrap();
        let coeffs: Vec<Vec<f64>> = vec![Vec::new(); mesh.patches().len()];

        assert_eq!(&*m.diag(), &[1.0, 2.0, 2.0, 1.0]);
        let psi = [1.0, 2.0, 4.0, 8.0];
        let apsi = m.amul(&psi, &coeffs, &interfaces).unwrap();
        assert_eq!(apsi, vec![-1.0, -1.0, -2.0, 4.0]);

        let r = m.residual(&psi, &[0.0; 4], &coeffs, &interfaces).unwrap();
        assert_eq!(r, vec![1.0, 1.0, 2.0, -4.0]);

        assert_eq!(m.sum_a(&coeffs, &interfaces), vec![0.0; 4]);
        assert_eq!(m.sum_mag_off_diag(), vec![1.0, 2.0, 2.0, 1.0]);
        assert_eq!(m.h(&psi), vec![2.0, 5.0, 10.0, 4.0]);
        assert_eq!(m.h1(), vec![1.0, 2.0, 2.0, 1.0]);
        assert_eq!(m.face_h(&psi), vec![-1.0, -2.0, -4.0]);
    }

    #[test]
    fn test_sum_a_is_row_sum_of_upwind_matrix() {
        let mesh = BlockMesh::new([3, 1, 1], [1.0, 1.0, 1.0]).build().unwrap();
        let mut m = LduMatrix::new(Arc::clone(mesh.ldu_addressing()));
        m.lower_mut().fill(-1.0);
        m.upper_mut().fill(0.0);
        m.neg_sum_diag();
        assert!(m.asymmetric());

        let interfaces = LduInterfaces::from_mesh(&mesh).unwrap();
        let coeffs: Vec<Vec<f64>> = vec![Vec::new(); mesh.patches().len()];
        let row_sums = m.amul(&[1.0; 3], &coeffs, &interfaces).unwrap();
        assert_eq!(row_sums, vec![1.0, 0.0, -1.0]);
        assert_eq!(m.sum_a(&coeffs, &interfaces), row_sums);
    }

    #[test]
    fn test_sum_a_includes_cyclic_coefficients() {
        let mesh = BlockMesh::new([4, 1, 1], [1.0, 1.0, 1.0])
            .cyclic(Axis::X)
            .build()
            .unwrap();
        let mut m = LduMatrix::new(Arc::clone(mesh.ldu_addressing()));
        m.upper_mut().fill(-0.5);
        m.lower_mut().fill(-2.0);
        m.diag_mut().fill(4.0);

        let interfaces = LduInterfaces::from_mesh(&mesh).unwrap();
        let mut coeffs: Vec<Vec<f64>> = vec![Vec::new(); mesh.patches().len()];
        for (patch, interface) in interfaces.iter() {
            coeffs[patch] = vec![0.75; interface.face_cells().len()];
        }
        let row_sums = m.amul(&[1.0; 4], &coeffs, &interfaces).unwrap();
        for (a, b) in m.sum_a(&coeffs, &interfaces).iter().zip(&row_sums) {
            assert_relative_eq!(a, b, epsilon = 1e-14);
        }
    }

    #[test]
    fn test_cyclic_amul_of_constant_is_zero() {
        let mesh = BlockMesh::new([4, 1, 1], [1.0, 1.0, 1.0])
            .cyclic(Axis::X)
            .build()
            .unwrap();
        let mut m = LduMatrix::new(Arc::clone(mesh.ldu_addressing()));
        m.upper_mut().fill(-1.0);
        m.neg_sum_diag();

        // Periodic closure: each cyclic face couples with coefficient -1 on the neighbour
        let interfaces = LduInterfaces::from_mesh(&mesh).unwrap();
        let mut coeffs: Vec<Vec<f64>> = vec![Vec::new(); mesh.patches().len()];
        for (patch, interface) in interfaces.iter() {
            coeffs[patch] = vec![1.0; interface.face_cells().len()];
            for &fc in interface.face_cells() {
                m.diag_mut()[fc] += 1.0;
            }
        }

        let apsi = m.amul(&[3.0; 4], &coeffs, &interfaces).unwrap();
        for v in apsi {
            assert_relative_eq!(v, 0.0, epsilon = 1e-14);
        }

        let csr = m.to_csr(&coeffs, &interfaces).unwrap();
        let psi = [1.0, -2.0, 0.5, 4.0];
        let expected = m.amul(&psi, &coeffs, &interfaces).unwrap();
        let got = csr_mul(&csr, &psi);
        for (a, b) in got.iter().zip(&expected) {
            assert_relative_eq!(a, b, epsilon = 1e-14);
        }
    }

    #[test]
    fn test_add_promotes_storage() {
        let mesh = BlockMesh::new([3, 1, 1], [1.0, 1.0, 1.0]).build().unwrap();
        let mut sym = tridiagonal(&mesh);
        let mut asym = LduMatrix::new(Arc::clone(mesh.ldu_addressing()));
        asym.upper_mut().fill(1.0);
        asym.lower_mut().fill(-1.0);

        sym.add(&asym).unwrap();
        assert!(sym.asymmetric());
        assert_eq!(&*sym.upper(), &[0.0, 0.0]);
        assert_eq!(&*sym.lower(), &[-2.0, -2.0]);

        sym.sub(&asym).unwrap();
        assert_eq!(&*sym.upper(), &[-1.0, -1.0]);
        assert_eq!(&*sym.lower(), &[-1.0, -1.0]);

        sym.negate();
        assert_eq!(&*sym.diag(), &[-1.0, -2.0, -1.0]);

        let other = BlockMesh::new([4, 1, 1], [1.0, 1.0, 1.0]).build().unwrap();
        assert!(sym.add(&tridiagonal(&other)).is_err());
    }

    #[test]
    fn test_tmul_is_transpose() {
        let mesh = BlockMesh::new([3, 1, 1], [1.0, 1.0, 1.0]).build().unwrap();
        let mut m = LduMatrix::new(Arc::clone(mesh.ldu_addressing()));
        m.diag_mut().copy_from_slice(&[4.0, 5.0, 6.0]);
        m.upper_mut().copy_from_slice(&[1.0, 2.0]);
        m.lower_mut().copy_from_slice(&[-1.0, -3.0]);
        let interfaces = LduInterfaces::default();

        // A = [[4, 1, 0], [-1, 5, 2], [0, -3, 6]]
        let e0 = m.tmul(&[1.0, 0.0, 0.0], &[], &interfaces).unwrap();
        assert_eq!(e0, vec![4.0, 1.0, 0.0]);
        let a0 = m.amul(&[1.0, 0.0, 0.0], &[], &interfaces).unwrap();
        assert_eq!(a0, vec![4.0, -1.0, 0.0]);
    }
}
