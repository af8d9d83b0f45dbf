//! Build the mesh of a case and report its quality.

use crate::case::Case;
use anyhow::{bail, Result};
use clap::Args;
use log::info;
use std::path::PathBuf;

/// Check arguments
#[derive(Args)]
pub struct CheckArgs {
    /// Case description (JSON)
    #[arg(short, long)]
    pub case: PathBuf,
}

pub fn execute(args: CheckArgs) -> Result<()> {
    let case = Case::load(&args.case)?;
    let mesh = case.mesh.build()?;
    let report = mesh.check();
    println!("{}", report);

    println!("Patches");
    for patch in mesh.patches() {
        println!(
            "    {:<16} {:<14} {} faces",
            patch.name(),
            patch.kind().type_name(),
            patch.size()
        );
    }

    // Boundary conditions must resolve on the built mesh
    case.initial_field(&mesh)?;
    info!("Case {} is valid", args.case.display());

    if !report.ok() {
        bail!("mesh check failed for {}", args.case.display());
    }
    Ok(())
}
