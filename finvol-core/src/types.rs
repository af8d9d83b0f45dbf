//! Core numeric types and tolerances.

use nalgebra::Vector3;

/// A point in 3D space.
pub type Point3 = Vector3<f64>;

/// A 3D vector (area vector, gradient, velocity, etc.).
pub type Vec3 = Vector3<f64>;

/// Small number used to guard divisions by near-zero magnitudes.
pub const SMALL: f64 = 1.0e-15;

/// Very small number, close to the smallest normal double.
pub const VSMALL: f64 = 1.0e-300;

/// Square root of [`VSMALL`].
pub const ROOT_VSMALL: f64 = 1.0e-150;

/// Large number used as a stand-in for "unset" time steps.
pub const GREAT: f64 = 1.0e15;

/// Coordinate axis of a structured block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// Component index of the axis.
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Sum of magnitudes, evaluated serially so the result is reproducible.
pub fn sum_mag(values: &[f64]) -> f64 {
    values.iter().map(|v| v.abs()).sum()
}

/// Inner product, evaluated serially so the result is reproducible.
pub fn sum_prod(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
