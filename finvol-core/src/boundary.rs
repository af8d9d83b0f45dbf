//! Boundary conditions (patch fields).
//!
//! Each patch of a [`VolScalarField`](crate::field::VolScalarField) carries a [`PatchField`]:
//! the face values on the patch plus the rule that produces them. Discretisation operators
//! linearise a boundary condition through four coefficient sets:
//!
//! - value coefficients: `phi_f = vic * phi_P + vbc`,
//! - gradient coefficients: `snGrad = gic * phi_P + gbc`.
//!
//! On coupled patches `vbc` and `gbc` multiply the neighbour-cell value instead of a constant.

use crate::error::{Error, Result};
use crate::mesh::{Patch, PatchKind};
use serde::{Deserialize, Serialize};

/// Boundary condition variants.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchFieldKind {
    /// Prescribed face value.
    FixedValue,
    /// Face value equals the adjacent cell value.
    ZeroGradient,
    /// Prescribed normal gradient.
    FixedGradient { gradient: Vec<f64> },
    /// Blend of fixed value (fraction 1) and fixed gradient (fraction 0).
    Mixed {
        ref_value: Vec<f64>,
        ref_grad: Vec<f64>,
        value_fraction: Vec<f64>,
    },
    /// Fixed value on inflow faces, zero gradient on outflow faces.
    InletOutlet {
        inlet_value: Vec<f64>,
        value_fraction: Vec<f64>,
    },
    /// Values set by the owner of the field; cannot be used to linearise an equation.
    Calculated,
    /// Excluded direction.
    Empty,
    /// Periodic coupling.
    Cyclic,
    /// Halo coupling across a subdomain boundary.
    Processor,
}

/// Boundary condition as written in a case description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PatchFieldConfig {
    FixedValue {
        value: f64,
    },
    ZeroGradient,
    FixedGradient {
        gradient: f64,
    },
    #[serde(rename_all = "camelCase")]
    Mixed {
        ref_value: f64,
        ref_gradient: f64,
        value_fraction: f64,
    },
    #[serde(rename_all = "camelCase")]
    InletOutlet {
        inlet_value: f64,
    },
    Calculated {
        value: f64,
    },
}

/// Face values and boundary condition of one patch.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchField {
    kind: PatchFieldKind,
    values: Vec<f64>,
}

impl PatchField {
    pub fn new(kind: PatchFieldKind, values: Vec<f64>) -> Self {
        Self { kind, values }
    }

    pub fn fixed_value(values: Vec<f64>) -> Self {
        Self::new(PatchFieldKind::FixedValue, values)
    }

    pub fn zero_gradient(internal: &[f64]) -> Self {
        Self::new(PatchFieldKind::ZeroGradient, internal.to_vec())
    }

    pub fn calculated(values: Vec<f64>) -> Self {
        Self::new(PatchFieldKind::Calculated, values)
    }

    /// Constraint condition implied by the patch type, if any.
    ///
    /// `internal` holds the values of the cells next to the patch faces.
    pub fn constraint(patch: &Patch, internal: &[f64]) -> Option<Self> {
        let kind = match patch.kind() {
            PatchKind::Empty => PatchFieldKind::Empty,
            PatchKind::Cyclic { .. } => PatchFieldKind::Cyclic,
            PatchKind::Processor { .. } => PatchFieldKind::Processor,
            PatchKind::Symmetry => PatchFieldKind::ZeroGradient,
            PatchKind::Patch | PatchKind::Wall => return None,
        };
        Some(Self::new(kind, internal.to_vec()))
    }

    /// Build the condition described by `config` on a patch.
    pub fn from_config(config: &PatchFieldConfig, patch: &Patch, internal: &[f64]) -> Result<Self> {
        if let Some(constraint) = Self::constraint(patch, internal) {
            return Err(Error::Boundary(format!(
                "patch {} of type {} only accepts the {} condition, not {:?}",
                patch.name(),
                patch.kind().type_name(),
                constraint.type_name(),
                config
            )));
        }

        let n = patch.size();
        let dc = patch.delta_coeffs();
        let field = match *config {
            PatchFieldConfig::FixedValue { value } => Self::fixed_value(vec![value; n]),
            PatchFieldConfig::ZeroGradient => Self::zero_gradient(internal),
            PatchFieldConfig::FixedGradient { gradient } => Self::new(
                PatchFieldKind::FixedGradient {
                    gradient: vec![gradient; n],
                },
                (0..n).map(|i| internal[i] + gradient / dc[i]).collect(),
            ),
            PatchFieldConfig::Mixed {
                ref_value,
                ref_gradient,
                value_fraction,
            } => {
                if !(0.0..=1.0).contains(&value_fraction) {
                    return Err(Error::Boundary(format!(
                        "value fraction {} on patch {} is outside [0, 1]",
                        value_fraction,
                        patch.name()
                    )));
                }
                let mut field = Self::new(
                    PatchFieldKind::Mixed {
                        ref_value: vec![ref_value; n],
                        ref_grad: vec![ref_gradient; n],
                        value_fraction: vec![value_fraction; n],
                    },
                    internal.to_vec(),
                );
                field.evaluate(patch, internal, None)?;
                field
            }
            PatchFieldConfig::InletOutlet { inlet_value } => Self::new(
                PatchFieldKind::InletOutlet {
                    inlet_value: vec![inlet_value; n],
                    value_fraction: vec![0.0; n],
                },
                internal.to_vec(),
            ),
            PatchFieldConfig::Calculated { value } => Self::calculated(vec![value; n]),
        };
        Ok(field)
    }

    pub fn kind(&self) -> &PatchFieldKind {
        &self.kind
    }

    /// Face values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overwrite the face values. Only meaningful for assignable conditions and for the
    /// prescribed value of a fixed-value patch.
    pub fn set_values(&mut self, values: Vec<f64>) -> Result<()> {
        if values.len() != self.values.len() {
            return Err(Error::Boundary(format!(
                "cannot assign {} values to a patch of {} faces",
                values.len(),
                self.values.len()
            )));
        }
        self.values = values;
        Ok(())
    }

    /// Face values followed by the per-face data of the condition.
    fn per_face(&self) -> Vec<&Vec<f64>> {
        let mut data = vec![&self.values];
        match &self.kind {
            PatchFieldKind::FixedGradient { gradient } => data.push(gradient),
            PatchFieldKind::Mixed {
                ref_value,
                ref_grad,
                value_fraction,
            } => data.extend([ref_value, ref_grad, value_fraction]),
            PatchFieldKind::InletOutlet {
                inlet_value,
                value_fraction,
            } => data.extend([inlet_value, value_fraction]),
            _ => {}
        }
        data
    }

    fn per_face_mut(&mut self) -> Vec<&mut Vec<f64>> {
        let mut data = vec![&mut self.values];
        match &mut self.kind {
            PatchFieldKind::FixedGradient { gradient } => data.push(gradient),
            PatchFieldKind::Mixed {
                ref_value,
                ref_grad,
                value_fraction,
            } => data.extend([ref_value, ref_grad, value_fraction]),
            PatchFieldKind::InletOutlet {
                inlet_value,
                value_fraction,
            } => data.extend([inlet_value, value_fraction]),
            _ => {}
        }
        data
    }

    /// The same condition restricted to the given faces of the patch, in that order.
    pub fn subset(&self, faces: &[usize]) -> Result<Self> {
        if let Some(&f) = faces.iter().find(|&&f| f >= self.len()) {
            return Err(Error::Boundary(format!(
                "face {} is outside a patch field of {} faces",
                f,
                self.len()
            )));
        }
        let mut sub = self.clone();
        for data in sub.per_face_mut() {
            *data = faces.iter().map(|&f| data[f]).collect();
        }
        Ok(sub)
    }

    /// Reassemble a patch field of `size` faces from pieces and the face positions each
    /// piece covers. Every non-empty piece must carry the same condition type.
    pub fn assemble(pieces: &[(&PatchField, &[usize])], size: usize) -> Result<Self> {
        let template = pieces
            .iter()
            .find(|(piece, _)| !piece.is_empty())
            .or_else(|| pieces.first())
            .ok_or_else(|| Error::Boundary("no pieces to assemble a patch field from".into()))?
            .0;
        let mut field = template.clone();
        for data in field.per_face_mut() {
            *data = vec![0.0; size];
        }
        for (piece, positions) in pieces {
            if piece.is_empty() {
                continue;
            }
            if piece.type_name() != template.type_name() || positions.len() != piece.len() {
                return Err(Error::Boundary(format!(
                    "cannot assemble {} faces of {} into a {} patch field",
                    piece.len(),
                    piece.type_name(),
                    template.type_name()
                )));
            }
            for (target, source) in field.per_face_mut().into_iter().zip(piece.per_face()) {
                for (&g, &v) in positions.iter().zip(source) {
                    if g >= size {
                        return Err(Error::Boundary(format!(
                            "face position {} is outside a patch of {} faces",
                            g, size
                        )));
                    }
                    target[g] = v;
                }
            }
        }
        Ok(field)
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            PatchFieldKind::FixedValue => "fixedValue",
            PatchFieldKind::ZeroGradient => "zeroGradient",
            PatchFieldKind::FixedGradient { .. } => "fixedGradient",
            PatchFieldKind::Mixed { .. } => "mixed",
            PatchFieldKind::InletOutlet { .. } => "inletOutlet",
            PatchFieldKind::Calculated => "calculated",
            PatchFieldKind::Empty => "empty",
            PatchFieldKind::Cyclic => "cyclic",
            PatchFieldKind::Processor => "processor",
        }
    }

    /// Coupled conditions take their neighbour values from another cell.
    pub fn coupled(&self) -> bool {
        matches!(self.kind, PatchFieldKind::Cyclic | PatchFieldKind::Processor)
    }

    /// True when the condition pins the level of the solution.
    pub fn fixes_value(&self) -> bool {
        matches!(
            self.kind,
            PatchFieldKind::FixedValue
                | PatchFieldKind::Mixed { .. }
                | PatchFieldKind::InletOutlet { .. }
        )
    }

    /// False when assignment to the patch would be overridden by the condition.
    pub fn assignable(&self) -> bool {
        !matches!(
            self.kind,
            PatchFieldKind::FixedValue
                | PatchFieldKind::Mixed { .. }
                | PatchFieldKind::InletOutlet { .. }
        )
    }

    /// Update flux-dependent coefficients. `phi` holds the face fluxes of the patch.
    pub fn update_coeffs(&mut self, phi: &[f64]) -> Result<()> {
        if let PatchFieldKind::InletOutlet { value_fraction, .. } = &mut self.kind {
            if phi.len() != value_fraction.len() {
                return Err(Error::Boundary(format!(
                    "flux has {} values for a patch of {} faces",
                    phi.len(),
                    value_fraction.len()
                )));
            }
            for (f, &p) in value_fraction.iter_mut().zip(phi) {
                *f = if p < 0.0 { 1.0 } else { 0.0 };
            }
        }
        Ok(())
    }

    /// Recompute the face values from the adjacent cell values.
    ///
    /// `neighbour` must be supplied for coupled conditions.
    pub fn evaluate(&mut self, patch: &Patch, internal: &[f64], neighbour: Option<&[f64]>) -> Result<()> {
        let dc = patch.delta_coeffs();
        match &self.kind {
            PatchFieldKind::FixedValue | PatchFieldKind::Calculated => {}
            PatchFieldKind::ZeroGradient | PatchFieldKind::Empty => {
                self.values.copy_from_slice(internal);
            }
            PatchFieldKind::FixedGradient { gradient } => {
                for i in 0..self.values.len() {
                    self.values[i] = internal[i] + gradient[i] / dc[i];
                }
            }
            PatchFieldKind::Mixed {
                ref_value,
                ref_grad,
                value_fraction,
            } => {
                for i in 0..self.values.len() {
                    let f = value_fraction[i];
                    self.values[i] =
                        f * ref_value[i] + (1.0 - f) * (internal[i] + ref_grad[i] / dc[i]);
                }
            }
            PatchFieldKind::InletOutlet {
                inlet_value,
                value_fraction,
            } => {
                for i in 0..self.values.len() {
                    let f = value_fraction[i];
                    self.values[i] = f * inlet_value[i] + (1.0 - f) * internal[i];
                }
            }
            PatchFieldKind::Cyclic | PatchFieldKind::Processor => {
                let nbr = self.require_neighbour(patch, neighbour)?;
                let w = patch.weights();
                for i in 0..self.values.len() {
                    self.values[i] = w[i] * internal[i] + (1.0 - w[i]) * nbr[i];
                }
            }
        }
        Ok(())
    }

    /// Face-normal gradient.
    pub fn sn_grad(&self, patch: &Patch, internal: &[f64], neighbour: Option<&[f64]>) -> Result<Vec<f64>> {
        let dc = patch.delta_coeffs();
        let n = self.values.len();
        let grad = match &self.kind {
            PatchFieldKind::ZeroGradient | PatchFieldKind::Empty => vec![0.0; n],
            PatchFieldKind::FixedGradient { gradient } => gradient.clone(),
            PatchFieldKind::Mixed {
                ref_value,
                ref_grad,
                value_fraction,
            } => (0..n)
                .map(|i| {
                    let f = value_fraction[i];
                    f * dc[i] * (ref_value[i] - internal[i]) + (1.0 - f) * ref_grad[i]
                })
                .collect(),
            PatchFieldKind::InletOutlet {
                inlet_value,
                value_fraction,
            } => (0..n)
                .map(|i| value_fraction[i] * dc[i] * (inlet_value[i] - internal[i]))
                .collect(),
            PatchFieldKind::Cyclic | PatchFieldKind::Processor => {
                let nbr = self.require_neighbour(patch, neighbour)?;
                (0..n).map(|i| dc[i] * (nbr[i] - internal[i])).collect()
            }
            PatchFieldKind::FixedValue | PatchFieldKind::Calculated => (0..n)
                .map(|i| dc[i] * (self.values[i] - internal[i]))
                .collect(),
        };
        Ok(grad)
    }

    /// Coefficient of the cell value in the face value.
    pub fn value_internal_coeffs(&self, patch: &Patch) -> Result<Vec<f64>> {
        let n = self.values.len();
        Ok(match &self.kind {
            PatchFieldKind::FixedValue => vec![0.0; n],
            PatchFieldKind::ZeroGradient | PatchFieldKind::FixedGradient { .. } => vec![1.0; n],
            PatchFieldKind::Mixed { value_fraction, .. }
            | PatchFieldKind::InletOutlet { value_fraction, .. } => {
                value_fraction.iter().map(|f| 1.0 - f).collect()
            }
            PatchFieldKind::Empty => vec![0.0; n],
            PatchFieldKind::Cyclic | PatchFieldKind::Processor => patch.weights().to_vec(),
            PatchFieldKind::Calculated => return Err(self.calculated_error(patch, "valueInternalCoeffs")),
        })
    }

    /// Constant (or neighbour-cell) part of the face value.
    pub fn value_boundary_coeffs(&self, patch: &Patch) -> Result<Vec<f64>> {
        let n = self.values.len();
        let dc = patch.delta_coeffs();
        Ok(match &self.kind {
            PatchFieldKind::FixedValue => self.values.clone(),
            PatchFieldKind::ZeroGradient | PatchFieldKind::Empty => vec![0.0; n],
            PatchFieldKind::FixedGradient { gradient } => {
                (0..n).map(|i| gradient[i] / dc[i]).collect()
            }
            PatchFieldKind::Mixed {
                ref_value,
                ref_grad,
                value_fraction,
            } => (0..n)
                .map(|i| {
                    let f = value_fraction[i];
                    f * ref_value[i] + (1.0 - f) * ref_grad[i] / dc[i]
                })
                .collect(),
            PatchFieldKind::InletOutlet {
                inlet_value,
                value_fraction,
            } => (0..n).map(|i| value_fraction[i] * inlet_value[i]).collect(),
            PatchFieldKind::Cyclic | PatchFieldKind::Processor => {
                patch.weights().iter().map(|w| 1.0 - w).collect()
            }
            PatchFieldKind::Calculated => return Err(self.calculated_error(patch, "valueBoundaryCoeffs")),
        })
    }

    /// Coefficient of the cell value in the face-normal gradient.
    pub fn gradient_internal_coeffs(&self, patch: &Patch) -> Result<Vec<f64>> {
        let n = self.values.len();
        let dc = patch.delta_coeffs();
        Ok(match &self.kind {
            PatchFieldKind::FixedValue | PatchFieldKind::Cyclic | PatchFieldKind::Processor => {
                dc.iter().map(|d| -d).collect()
            }
            PatchFieldKind::ZeroGradient
            | PatchFieldKind::FixedGradient { .. }
            | PatchFieldKind::Empty => vec![0.0; n],
            PatchFieldKind::Mixed { value_fraction, .. }
            | PatchFieldKind::InletOutlet { value_fraction, .. } => {
                (0..n).map(|i| -value_fraction[i] * dc[i]).collect()
            }
            PatchFieldKind::Calculated => return Err(self.calculated_error(patch, "gradientInternalCoeffs")),
        })
    }

    /// Constant (or neighbour-cell) part of the face-normal gradient.
    pub fn gradient_boundary_coeffs(&self, patch: &Patch) -> Result<Vec<f64>> {
        let n = self.values.len();
        let dc = patch.delta_coeffs();
        Ok(match &self.kind {
            PatchFieldKind::FixedValue => (0..n).map(|i| dc[i] * self.values[i]).collect(),
            PatchFieldKind::ZeroGradient | PatchFieldKind::Empty => vec![0.0; n],
            PatchFieldKind::FixedGradient { gradient } => gradient.clone(),
            PatchFieldKind::Mixed {
                ref_value,
                ref_grad,
                value_fraction,
            } => (0..n)
                .map(|i| {
                    let f = value_fraction[i];
                    f * dc[i] * ref_value[i] + (1.0 - f) * ref_grad[i]
                })
                .collect(),
            PatchFieldKind::InletOutlet {
                inlet_value,
                value_fraction,
            } => (0..n)
                .map(|i| value_fraction[i] * dc[i] * inlet_value[i])
                .collect(),
            PatchFieldKind::Cyclic | PatchFieldKind::Processor => dc.to_vec(),
            PatchFieldKind::Calculated => return Err(self.calculated_error(patch, "gradientBoundaryCoeffs")),
        })
    }

    fn require_neighbour<'a>(&self, patch: &Patch, neighbour: Option<&'a [f64]>) -> Result<&'a [f64]> {
        match neighbour {
            Some(nbr) if nbr.len() == self.values.len() => Ok(nbr),
            Some(nbr) => Err(Error::Boundary(format!(
                "coupled patch {} has {} faces but {} neighbour values",
                patch.name(),
                self.values.len(),
                nbr.len()
            ))),
            None => Err(Error::Boundary(format!(
                "coupled patch {} evaluated without neighbour values",
                patch.name()
            ))),
        }
    }

    fn calculated_error(&self, patch: &Patch, function: &str) -> Error {
        Error::Boundary(format!(
            "{} cannot be called for a calculated patch field (patch {}); \
             use a fixedValue, zeroGradient or mixed condition",
            function,
            patch.name()
        ))
    }
}
