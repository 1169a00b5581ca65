use audioshrink::engine::AudioFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "audioshrink")]
#[command(about = "Shrink audio files with ffmpeg, with live progress", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log at debug level (overrides config)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Re-encode a file at a lower bitrate
    Compress {
        /// Path to the audio file
        file: PathBuf,

        /// Target bitrate in kb/s (overrides config)
        #[arg(short, long)]
        bitrate: Option<u32>,

        /// Target format: mp3, ogg, aac or wma (inferred from the extension by default)
        #[arg(short, long)]
        format: Option<AudioFormat>,

        /// Directory for the encoded file (defaults to the input's directory)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// ffmpeg binary to use
        #[arg(long)]
        encoder: Option<PathBuf>,

        /// Abort the encode after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Copy the original through when it is already below the target bitrate
        #[arg(long)]
        keep_original: bool,

        /// Report progress exactly as derived from the encoder log
        #[arg(long)]
        raw_progress: bool,

        /// Encode even when the source bitrate is already at or below the target
        #[arg(long)]
        no_guard: bool,
    },

    /// Show the ffmpeg command without executing (dry run)
    DryRun {
        /// Path to the audio file
        file: PathBuf,

        #[arg(short, long)]
        bitrate: Option<u32>,

        #[arg(short, long)]
        format: Option<AudioFormat>,
    },

    /// Probe an audio file for its duration and bitrate
    Probe {
        /// Path to the audio file
        file: PathBuf,
    },

    /// Check that ffmpeg is installed and which target encoders it has
    CheckFfmpeg,

    /// Show config status and location, or create default config if missing
    InitConfig,
}

pub fn parse() -> Cli {
    Cli::parse()
}
