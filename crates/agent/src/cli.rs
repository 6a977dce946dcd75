//! Command-line interface.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "nebo-agent", about = "Nebo agent process", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the agent (default).
    Run,
    /// Check the environment: data dir, lock, server reachability.
    Doctor,
    /// Print the version.
    Version,
}
