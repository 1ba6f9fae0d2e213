mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    // Parse CLI arguments; logging starts once configuration is loaded
    let cli = Cli::parse();

    // Dispatch to appropriate command handler
    match cli.command {
        Commands::Run(args) => commands::run::run(&args),
        Commands::Cache(args) => commands::cache::cache(&args),
    }
}
