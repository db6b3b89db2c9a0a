use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// YAML file holding the bridge and display settings
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// How many VMUs the simulated emulation core plugs in
    #[arg(long, default_value_t = 1, global = true)]
    pub slots: usize,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Poll the bridge headlessly, logging what the second screen would show
    Run(RunArgs),
    /// Inspect and poke the bridge from a prompt
    Console,
    /// Show the VMU screen in a window
    #[cfg(feature = "display")]
    Window,
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Stop after this many seconds. Runs until interrupted otherwise
    #[arg(short, long)]
    pub seconds: Option<u64>,

    /// Save every displayed frame as a PNG in this directory
    #[arg(long)]
    pub snapshot_dir: Option<PathBuf>,
}
