//! Subcommands of the `finvol` driver.

pub mod check;
pub mod run;
pub mod schemes;
