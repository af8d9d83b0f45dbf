//! Discretisation schemes and their selection by name.
//!
//! [`FvSchemes`] holds one table per operator family. Each table maps an operator key such
//! as `div(phi,T)` or `laplacian(DT,T)` to a scheme name, with `default` used for keys that
//! are not listed. Names are parsed on lookup so a misspelt scheme is reported together
//! with the valid choices.
//!
//! # Submodules
//!
//! - [`interpolation`] - cell-to-face weights (linear, upwind, TVD limiters)
//! - [`gradient`] - Gauss cell gradients
//! - [`sn_grad`] - face-normal gradients and non-orthogonal correction
//! - [`ddt`] - Euler, backward and steady-state time derivatives
//! - [`laplacian`] - Gauss Laplacian
//! - [`div`] - Gauss convection
//! - [`sources`] - implicit and explicit cell sources

pub mod ddt;
pub mod div;
pub mod gradient;
pub mod interpolation;
pub mod laplacian;
pub mod sn_grad;
pub mod sources;

pub use ddt::{DdtScheme, DDT_SCHEMES};
pub use div::ConvectionScheme;
pub use gradient::{gauss_grad, GradScheme, GRAD_SCHEMES};
pub use interpolation::{InterpolationScheme, INTERPOLATION_SCHEMES};
pub use laplacian::LaplacianScheme;
pub use sn_grad::{SnGradScheme, SN_GRAD_SCHEMES};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Key used for operators without an entry of their own.
pub const DEFAULT_KEY: &str = "default";

/// Entry that disables an operator family unless every key is listed.
const NONE_SCHEME: &str = "none";

/// Scheme tables of a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FvSchemes {
    pub ddt_schemes: BTreeMap<String, String>,
    pub grad_schemes: BTreeMap<String, String>,
    pub div_schemes: BTreeMap<String, String>,
    pub laplacian_schemes: BTreeMap<String, String>,
    pub interpolation_schemes: BTreeMap<String, String>,
    pub sn_grad_schemes: BTreeMap<String, String>,
}

fn defaults(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(DEFAULT_KEY.to_string(), name.to_string())])
}

impl Default for FvSchemes {
    fn default() -> Self {
        Self {
            ddt_schemes: defaults("Euler"),
            grad_schemes: defaults("Gauss linear"),
            div_schemes: defaults("Gauss linear"),
            laplacian_schemes: defaults("Gauss linear corrected"),
            interpolation_schemes: defaults("linear"),
            sn_grad_schemes: defaults("corrected"),
        }
    }
}

impl FvSchemes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an entry of the `ddt` table.
    pub fn with_ddt(mut self, key: impl Into<String>, scheme: impl Into<String>) -> Self {
        self.ddt_schemes.insert(key.into(), scheme.into());
        self
    }

    pub fn with_div(mut self, key: impl Into<String>, scheme: impl Into<String>) -> Self {
        self.div_schemes.insert(key.into(), scheme.into());
        self
    }

    pub fn with_laplacian(mut self, key: impl Into<String>, scheme: impl Into<String>) -> Self {
        self.laplacian_schemes.insert(key.into(), scheme.into());
        self
    }

    pub fn with_interpolation(mut self, key: impl Into<String>, scheme: impl Into<String>) -> Self {
        self.interpolation_schemes.insert(key.into(), scheme.into());
        self
    }

    pub fn with_sn_grad(mut self, key: impl Into<String>, scheme: impl Into<String>) -> Self {
        self.sn_grad_schemes.insert(key.into(), scheme.into());
        self
    }

    pub fn with_grad(mut self, key: impl Into<String>, scheme: impl Into<String>) -> Self {
        self.grad_schemes.insert(key.into(), scheme.into());
        self
    }

    pub fn ddt(&self, key: &str) -> Result<DdtScheme> {
        lookup(&self.ddt_schemes, "ddt", key)
    }

    pub fn grad(&self, key: &str) -> Result<GradScheme> {
        lookup(&self.grad_schemes, "grad", key)
    }

    pub fn div(&self, key: &str) -> Result<ConvectionScheme> {
        lookup(&self.div_schemes, "div", key)
    }

    pub fn laplacian(&self, key: &str) -> Result<LaplacianScheme> {
        lookup(&self.laplacian_schemes, "laplacian", key)
    }

    pub fn interpolation(&self, key: &str) -> Result<InterpolationScheme> {
        lookup(&self.interpolation_schemes, "interpolation", key)
    }

    pub fn sn_grad(&self, key: &str) -> Result<SnGradScheme> {
        lookup(&self.sn_grad_schemes, "snGrad", key)
    }

    /// Parse every entry of every table.
    pub fn validate(&self) -> Result<()> {
        fn check<T: FromStr<Err = Error>>(table: &BTreeMap<String, String>, family: &str) -> Result<()> {
            for (key, name) in table {
                if name.trim() == NONE_SCHEME {
                    continue;
                }
                name.parse::<T>()
                    .map_err(|e| Error::Scheme(format!("{} scheme for {}: {}", family, key, e)))?;
            }
            Ok(())
        }
        check::<DdtScheme>(&self.ddt_schemes, "ddt")?;
        check::<GradScheme>(&self.grad_schemes, "grad")?;
        check::<ConvectionScheme>(&self.div_schemes, "div")?;
        check::<LaplacianScheme>(&self.laplacian_schemes, "laplacian")?;
        check::<InterpolationScheme>(&self.interpolation_schemes, "interpolation")?;
        check::<SnGradScheme>(&self.sn_grad_schemes, "snGrad")
    }
}

fn lookup<T: FromStr<Err = Error>>(table: &BTreeMap<String, String>, family: &str, key: &str) -> Result<T> {
    let name = table
        .get(key)
        .or_else(|| table.get(DEFAULT_KEY))
        .ok_or_else(|| {
            Error::Scheme(format!(
                "no {} scheme for {} and no {} entry",
                family, key, DEFAULT_KEY
            ))
        })?;
    if name.trim() == NONE_SCHEME {
        return Err(Error::Scheme(format!(
            "{} scheme for {} is {}, add an entry for {}",
            family, key, NONE_SCHEME, key
        )));
    }
    log::debug!("{} scheme for {}: {}", family, key, name);
    name.parse()
}
