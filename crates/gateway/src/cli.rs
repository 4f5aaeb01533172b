//! Command-line interface for the gateway binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "docpilot",
    about = "Conversational agent runtime for a document-processing platform"
)]
pub struct Cli {
    /// Path to config.toml (defaults are used when omitted).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP gateway (the default when no subcommand is given).
    Serve,
    /// Load and validate the configuration, then exit.
    ConfigValidate,
    /// Print the version.
    Version,
}
