//! JSON case description of a scalar transport run.

use anyhow::{bail, Context, Result};
use finvol_core::schemes::FvSchemes;
use finvol_core::{
    Axis, BlockMesh, DecompositionMethod, FvMesh, FvSolution, PatchFieldConfig, PatchKind, Point3, Side,
    TimeConfig, Vec3, VolScalarField,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Patch types available for block sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SideType {
    Patch,
    Wall,
    Empty,
    SymmetryPlane,
}

impl From<SideType> for PatchKind {
    fn from(kind: SideType) -> Self {
        match kind {
            SideType::Patch => PatchKind::Patch,
            SideType::Wall => PatchKind::Wall,
            SideType::Empty => PatchKind::Empty,
            SideType::SymmetryPlane => PatchKind::Symmetry,
        }
    }
}

/// Name and type of one block side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideConfig {
    pub side: Side,
    pub name: String,
    #[serde(rename = "type", default = "default_side_type")]
    pub kind: SideType,
}

fn default_side_type() -> SideType {
    SideType::Patch
}

/// Structured block mesh settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshConfig {
    pub cells: [usize; 3],
    pub lengths: [f64; 3],
    #[serde(default)]
    pub origin: [f64; 3],
    #[serde(default)]
    pub two_dimensional: bool,
    /// Couple the two sides normal to this axis.
    #[serde(default)]
    pub cyclic: Option<Axis>,
    #[serde(default)]
    pub sides: Vec<SideConfig>,
}

impl MeshConfig {
    pub fn block(&self) -> BlockMesh {
        let mut block = BlockMesh::new(self.cells, self.lengths)
            .origin(Point3::new(self.origin[0], self.origin[1], self.origin[2]));
        for side in &self.sides {
            block = block.side(side.side, side.name.clone(), side.kind.into());
        }
        if self.two_dimensional {
            block = block.two_dimensional();
        }
        if let Some(axis) = self.cyclic {
            block = block.cyclic(axis);
        }
        block
    }

    pub fn build(&self) -> Result<FvMesh> {
        self.block().build().context("failed to build block mesh")
    }
}

/// Complete description of a `ddt(T) + div(phi,T) - laplacian(DT,T) == 0` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Case {
    pub mesh: MeshConfig,
    /// Uniform transport velocity.
    pub velocity: [f64; 3],
    /// Uniform diffusivity `DT`.
    pub diffusivity: f64,
    #[serde(default)]
    pub initial_value: f64,
    /// Boundary conditions of `T` keyed by patch name; other patches are zero-gradient.
    #[serde(default)]
    pub boundary_conditions: BTreeMap<String, PatchFieldConfig>,
    #[serde(default)]
    pub time: TimeConfig,
    #[serde(default)]
    pub schemes: FvSchemes,
    #[serde(default)]
    pub solution: FvSolution,
    /// Decomposition used when running on more than one rank.
    #[serde(default)]
    pub decomposition: Option<DecompositionMethod>,
}

impl Case {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read case file {}", path.display()))?;
        let case: Case = serde_json::from_str(&content)
            .with_context(|| format!("cannot parse case file {}", path.display()))?;
        case.validate()?;
        Ok(case)
    }

    pub fn validate(&self) -> Result<()> {
        if self.diffusivity.is_nan() || self.diffusivity < 0.0 {
            bail!("diffusivity must be non-negative, got {}", self.diffusivity);
        }
        self.time.validate()?;
        self.schemes.validate()?;
        self.solution.validate()?;
        Ok(())
    }

    pub fn velocity(&self) -> Vec3 {
        Vec3::new(self.velocity[0], self.velocity[1], self.velocity[2])
    }

    /// Initial `T` with the configured boundary conditions.
    pub fn initial_field(&self, mesh: &FvMesh) -> Result<VolScalarField> {
        let mut t = VolScalarField::uniform("T", mesh, self.initial_value);
        for (patch, config) in &self.boundary_conditions {
            t = t
                .with_patch(mesh, patch, config)
                .with_context(|| format!("invalid boundary condition for patch {}", patch))?;
        }
        Ok(t)
    }

    pub fn decomposition(&self) -> DecompositionMethod {
        self.decomposition
            .unwrap_or(DecompositionMethod::Simple { axis: Axis::X })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CASE: &str = r#"{
        "mesh": {
            "cells": [10, 2, 1],
            "lengths": [1.0, 0.2, 0.1],
            "twoDimensional": true,
            "sides": [
                {"side": "left", "name": "inlet"},
                {"side": "right", "name": "outlet"},
                {"side": "bottom", "name": "walls", "type": "wall"}
            ]
        },
        "velocity": [1.0, 0.0, 0.0],
        "diffusivity": 0.01,
        "boundaryConditions": {
            "inlet": {"type": "fixedValue", "value": 1.0},
            "outlet": {"type": "inletOutlet", "inletValue": 0.0}
        },
        "time": {"endTime": 0.5, "deltaT": 0.05},
        "decomposition": {"method": "simple", "axis": "x"}
    }"#;

    #[test]
    fn test_parse_and_build() {
        let case: Case = serde_json::from_str(CASE).unwrap();
        case.validate().unwrap();
        let mesh = case.mesh.build().unwrap();
        assert_eq!(mesh.n_cells(), 20);
        assert!(mesh.find_patch("inlet").is_some());
        assert_eq!(
            mesh.patches()[mesh.find_patch("walls").unwrap()].kind(),
            &PatchKind::Wall
        );

        let t = case.initial_field(&mesh).unwrap();
        let inlet = mesh.find_patch("inlet").unwrap();
        assert!(t.boundary_values(inlet).iter().all(|&v| v == 1.0));
        assert_eq!(case.decomposition(), DecompositionMethod::Simple { axis: Axis::X });
    }

    #[test]
    fn test_unknown_patch_is_reported() {
        let mut case: Case = serde_json::from_str(CASE).unwrap();
        case.boundary_conditions
            .insert("nozzle".into(), PatchFieldConfig::ZeroGradient);
        let mesh = case.mesh.build().unwrap();
        let err = case.initial_field(&mesh).unwrap_err();
        assert!(format!("{:#}", err).contains("nozzle"));
    }

    #[test]
    fn test_negative_diffusivity_rejected() {
        let mut case: Case = serde_json::from_str(CASE).unwrap();
        case.diffusivity = -1.0;
        assert!(case.validate().is_err());
    }
}
