use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "streamvault")]
#[command(author, version, about = "Live-stream timeshift buffering and ABR transcoding")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Buffer a single live stream until interrupted
    Run {
        /// Numeric stream identifier
        #[arg(required = true)]
        stream_id: u32,

        /// Source URL of the live feed
        #[arg(required = true)]
        url: String,

        /// Also start an ABR transcode session with the default ladder
        #[arg(long)]
        abr: bool,

        /// Print session status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
