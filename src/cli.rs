use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "sing-box subscription and core manager")]
pub struct Args {
    /// Path to configuration file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Sub‑commands (run, core, etc.)
    #[command(subcommand)]
    pub sub: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Sync subscriptions, then update the core (default if no sub‑command)
    Run,
    /// Update the sing-box core only
    Core {
        /// Consider prereleases regardless of the config
        #[arg(long)]
        prerelease: bool,
    },
    /// Sync subscriptions only
    Subscriptions,
    /// Print the detected platform and the asset extensions it accepts
    Platform,
}
