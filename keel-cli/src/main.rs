//! ## keel-cli
//! **Operational interface for the memory manager**
//! Runs the on-target selftest, prints pool statistics for a sample
//! workload and validates configuration files.

use clap::Parser;

mod commands;

use commands::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let passed = commands::run_command(cli)?;
    if !passed {
        std::process::exit(1);
    }
    Ok(())
}
