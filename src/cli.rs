use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reframe")]
#[command(author, version, about = "MP4 demux, transcode and remux tool")]
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
    /// Demux a file and list its tracks
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a file through the pipeline and write a new MP4
    Remux {
        /// Input MP4
        #[arg(required = true)]
        input: PathBuf,

        /// Output path
        #[arg(required = true)]
        output: PathBuf,

        /// Output codec string (defaults to the source codec)
        #[arg(long)]
        codec: Option<String>,

        /// Output bitrate in bits per second
        #[arg(long)]
        bitrate: Option<u64>,

        /// Interleave window in seconds
        #[arg(long)]
        chunk_duration: Option<f64>,

        /// Frames allowed in flight in the decoder
        #[arg(long)]
        lookahead: Option<usize>,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
