//! List the run-time selectable schemes and solvers.

use finvol_core::schemes::{DDT_SCHEMES, GRAD_SCHEMES, INTERPOLATION_SCHEMES, SN_GRAD_SCHEMES};
use finvol_core::solver::preconditioner::PRECONDITIONERS;
use finvol_core::solver::smoother::SMOOTHERS;
use finvol_core::solver::{ASYMMETRIC_SOLVERS, SYMMETRIC_SOLVERS};

/// Name lists printed by `finvol schemes`, in display order.
pub fn tables() -> Vec<(&'static str, Vec<&'static str>)> {
    vec![
        ("ddtSchemes", DDT_SCHEMES.to_vec()),
        ("gradSchemes", GRAD_SCHEMES.to_vec()),
        ("interpolationSchemes", INTERPOLATION_SCHEMES.to_vec()),
        ("snGradSchemes", SN_GRAD_SCHEMES.to_vec()),
        ("divSchemes", vec!["[bounded] Gauss <interpolationScheme>"]),
        ("laplacianSchemes", vec!["Gauss <interpolationScheme> <snGradScheme>"]),
        ("symmetric solvers", SYMMETRIC_SOLVERS.to_vec()),
        ("asymmetric solvers", ASYMMETRIC_SOLVERS.to_vec()),
        ("preconditioners", PRECONDITIONERS.to_vec()),
        ("smoothers", SMOOTHERS.to_vec()),
    ]
}

pub fn execute() -> anyhow::Result<()> {
    for (title, names) in tables() {
        println!("{}", title);
        for name in names {
            println!("    {}", name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_cover_solvers() {
        let tables = tables();
        let solvers = &tables
            .iter()
            .find(|(title, _)| *title == "symmetric solvers")
            .unwrap()
            .1;
        assert!(solvers.contains(&"PCG"));
        assert!(tables.iter().all(|(_, names)| !names.is_empty()));
    }
}
