//! Error types for finvol operations.

use thiserror::Error;

/// Result type alias using the finvol Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while assembling or solving finite-volume systems.
#[derive(Error, Debug)]
pub enum Error {
    /// Mesh topology or geometry errors.
    #[error("mesh error: {0}")]
    Mesh(String),

    /// Field size or history errors.
    #[error("field error: {0}")]
    Field(String),

    /// Boundary condition errors.
    #[error("boundary condition error: {0}")]
    Boundary(String),

    /// Unknown or malformed discretisation scheme.
    #[error("scheme error: {0}")]
    Scheme(String),

    /// Incompatible matrix operations.
    #[error("matrix error: {0}")]
    Matrix(String),

    /// Linear solver selection or setup errors.
    #[error("solver error: {0}")]
    Solver(String),

    /// Matrix singularity or conditioning issues.
    #[error("singular matrix: {0}")]
    SingularMatrix(String),

    /// The linear solver exhausted its iteration budget.
    #[error(
        "{solver} failed to converge for {field} after {iterations} iterations \
         (initial residual {initial_residual:e}, final residual {final_residual:e})"
    )]
    NonConvergence {
        field: String,
        solver: String,
        iterations: usize,
        initial_residual: f64,
        final_residual: f64,
    },

    /// Halo exchange or reduction failures between subdomains.
    #[error("communication error: {0}")]
    Communication(String),

    /// Invalid configuration values.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
