use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vidbridge")]
#[command(author, version, about = "Bridge hardware H.264 capture to a NAL unit consumer")]
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
    /// Extract SPS/PPS from a finished MP4 recording
    Extract {
        /// Recording to read
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Demux a captured live stream and list its NAL units
    Demux {
        /// Raw stream as written to the socket (ftyp, free, mdat)
        #[arg(required = true)]
        file: PathBuf,

        /// SPS/PPS source recording (uses the cache if not specified)
        #[arg(long)]
        params_from: Option<PathBuf>,

        /// Frame rate for timestamps (uses config if not specified)
        #[arg(long)]
        frame_rate: Option<i32>,
    },

    /// Run the full bridge with a replay encoder and consume its output
    Run {
        /// Finished recording replayed as the probe
        #[arg(long)]
        probe_file: PathBuf,

        /// Raw stream replayed into the socket
        #[arg(long)]
        stream_file: PathBuf,

        /// Stop after this many NAL units
        #[arg(long, default_value = "100")]
        frames: usize,

        /// Delay between replayed chunks, in milliseconds
        #[arg(long, default_value = "0")]
        pace_ms: u64,
    },

    /// Inspect or clear the parameter-set cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Write a synthetic sample recording and live stream
    Fixture {
        /// Output directory
        #[arg(required = true)]
        dir: PathBuf,

        /// Frames in the live stream
        #[arg(long, default_value = "60")]
        frames: usize,

        /// Frames between IDR pictures
        #[arg(long, default_value = "30")]
        gop: usize,
    },

    /// Write a default configuration file
    InitConfig {
        /// Where to write it
        #[arg(default_value = "vidbridge.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Update the capture section of a configuration file
    SetCapture {
        #[arg(long)]
        width: u32,

        #[arg(long)]
        height: u32,

        #[arg(long, default_value = "15")]
        frame_rate: i32,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Print the cached resolution and parameter sets
    Show,
    /// Remove the cached parameter sets
    Clear,
}
