//! finvol Core - finite-volume matrix assembly and LDU linear-equation engine
//!
//! Cell-centred finite-volume discretisation on unstructured polyhedral meshes with:
//! - Mesh geometry, LDU addressing and mesh quality checks
//! - Boundary conditions expressed as matrix coefficients
//! - Implicit (`fvm`) and explicit (`fvc`) operators with run-time selected schemes
//! - Preconditioned Krylov, smooth and direct linear solvers on LDU matrices
//! - Domain decomposition with processor-boundary halo exchange
//!
//! # Architecture
//!
//! The engine is organised around these core abstractions:
//!
//! - [`FvMesh`]: Geometry, patches and LDU addressing of a (sub)domain
//! - [`VolScalarField`] / [`SurfaceScalarField`]: Cell and face values with patch fields
//! - [`FvMatrix`]: One equation, built from `fvm` terms and consumed by `solve`
//! - [`LduMatrix`]: Diagonal plus upper/lower face coefficients
//! - [`LduSolver`] trait: Linear solution strategies selected by name
//! - [`Communicator`] trait: Halo exchange and global reductions between subdomains

pub mod types;
pub mod error;
pub mod parallel;
pub mod mesh;
pub mod block_mesh;
pub mod boundary;
pub mod field;
pub mod sparse;
pub mod ldu;
pub mod solver;
pub mod config;
pub mod time;
pub mod control;
pub mod fv_matrix;
pub mod schemes;
pub mod fvm;
pub mod fvc;
pub mod decompose;

pub use types::{Axis, Point3, Vec3};
pub use error::{Error, Result};
pub use parallel::{Communicator, SerialComm, ThreadComm};
pub use mesh::{FvMesh, MeshParts, PatchKind, PatchSpec};
pub use block_mesh::{BlockMesh, Side};
pub use boundary::{PatchField, PatchFieldConfig};
pub use field::{SurfaceScalarField, VolScalarField, VolVectorField};
pub use ldu::LduMatrix;
pub use solver::{LduSolver, SolverControls, SolverPerformance};
pub use config::FvSolution;
pub use time::{Time, TimeConfig};
pub use control::{PimpleControl, Residuals, SimpleControl};
pub use fv_matrix::FvMatrix;
pub use schemes::FvSchemes;
pub use decompose::{decompose, run_parallel, DecomposedCase, DecompositionMethod};
