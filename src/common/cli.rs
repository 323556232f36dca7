//! CLI argument parsing for the codec binaries
//!
//! Common arguments are shared via `#[command(flatten)]`; each binary
//! embeds `CommonArgs` in its own Args struct.

use clap::Parser;
use std::path::PathBuf;

use super::ScanDirection;

/// Common arguments shared across all binaries
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// Path to configuration file
    #[arg(short = 'f', long = "config", default_value = "config.toml")]
    pub config_file: String,
}

/// Arguments for `cpv_decode`
#[derive(Parser, Debug, Clone)]
pub struct DecodeArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Raw files to decode (processed in parallel)
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Print every digit as a JSON line
    #[arg(long)]
    pub json: bool,

    /// Dump the first words of every payload
    #[arg(long)]
    pub dump: bool,

    /// Override the configured scan direction (forward|backward)
    #[arg(long)]
    pub direction: Option<ScanDirection>,
}

/// Arguments for `cpv_simulate`
#[derive(Parser, Debug, Clone)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Output raw file
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,

    /// Number of triggers to generate
    #[arg(short = 'n', long)]
    pub triggers: Option<u32>,

    /// Random seed (overrides the config file)
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Also write the generated digits as JSON lines to this file
    #[arg(long)]
    pub digits: Option<PathBuf>,
}
