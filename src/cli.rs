use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ripforge")]
#[command(author, version, about = "Batch disc/file transcoding queue runner")]
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
    /// Process one or more sources through the full stage chain
    Run {
        /// Input sources (files or disc structure roots)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Target container: mkv, mp4 or ts
        #[arg(short, long, default_value = "mkv")]
        target: String,

        /// Directory for final outputs (defaults to the work directory)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Probe a media file and display stream information
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that the wrapped external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
