//! Command-line interface for the gateway binary.
//!
//! Every flag overrides the matching setting from the configuration file.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use gate_server::StrategyKind;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, Parser)]
#[command(name = "gate", version, about = "Session-aware TCP gateway for game nodes")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "gate.toml")]
    pub config: PathBuf,

    /// Client-facing listen address (e.g., 0.0.0.0:7000)
    #[arg(short, long, value_name = "ADDRESS")]
    pub listen: Option<SocketAddr>,

    /// Shortcut for a debug log level
    #[arg(short, long)]
    pub debug: bool,

    /// Output logs in JSON format
    #[arg(long)]
    pub json_logs: bool,

    /// Login route strategy (round_robin, random, consistent_hash, designated)
    #[arg(short, long, value_name = "STRATEGY")]
    pub strategy: Option<StrategyKind>,
}
