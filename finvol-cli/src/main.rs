//! finvol command-line driver
//!
//! Runs scalar transport cases described in JSON on the finvol finite-volume engine.

mod case;
mod commands;

use clap::{Parser, Subcommand};

/// Finite-volume scalar transport solver
#[derive(Parser)]
#[command(name = "finvol")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Finite-volume scalar transport solver", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a case
    Run(commands::run::RunArgs),
    /// Check the mesh and boundary conditions of a case
    Check(commands::check::CheckArgs),
    /// List available schemes and solvers
    Schemes,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_target(false)
        .init();

    match cli.command {
        Commands::Run(args) => commands::run::execute(args),
        Commands::Check(args) => commands::check::execute(args),
        Commands::Schemes => commands::schemes::execute(),
    }
}
